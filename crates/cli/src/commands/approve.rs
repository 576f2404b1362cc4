// `scriptdesk approve`: fold a pending suggestion into the canonical document.

use clap::Args;
use scriptdesk_engine::suggestion::ApprovalOutcome;
use serde::Serialize;
use uuid::Uuid;

use super::{document_lines, format_lines, short_id, CommonArgs, DocumentLine};
use crate::context::{self, CliContext};
use crate::output::OutputFormat;

#[derive(Debug, Args)]
pub struct ApproveArgs {
    pub suggestion: Uuid,

    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApproveResult {
    pub suggestion_id: Uuid,
    pub script_id: Uuid,
    pub author_id: String,
    pub content_hash: String,
    pub lines: Vec<DocumentLine>,
}

impl From<ApprovalOutcome> for ApproveResult {
    fn from(outcome: ApprovalOutcome) -> Self {
        Self {
            suggestion_id: outcome.suggestion.id,
            script_id: outcome.suggestion.script_id,
            author_id: outcome.suggestion.author_id,
            content_hash: outcome.snapshot.content_hash,
            lines: document_lines(&outcome.document),
        }
    }
}

pub fn run(args: ApproveArgs) -> anyhow::Result<()> {
    let format = OutputFormat::detect(args.common.json);
    let result = approve(args);
    context::finish(format, result, format_human)
}

fn approve(args: ApproveArgs) -> anyhow::Result<ApproveResult> {
    let ctx = CliContext::load(args.common.as_user)?;
    let actor = ctx.actor()?;
    let outcome = context::block_on(ctx.service.approve(&actor, args.suggestion))??;
    Ok(outcome.into())
}

fn format_human(result: &ApproveResult) -> String {
    format!(
        "Approved {} by {} (sha256 {})\n\n{}",
        result.suggestion_id,
        result.author_id,
        short_id(&result.content_hash),
        format_lines(&result.lines, false)
    )
}
