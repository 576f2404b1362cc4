// `scriptdesk pending`: list suggestions awaiting review.

use clap::Args;
use scriptdesk_common::delta::{Delta, Op};
use scriptdesk_common::types::Suggestion;
use serde::Serialize;
use uuid::Uuid;

use super::CommonArgs;
use crate::context::{self, CliContext};
use crate::output::OutputFormat;

#[derive(Debug, Args)]
pub struct PendingArgs {
    pub script: Uuid,

    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Debug, Clone, Serialize)]
pub struct PendingResult {
    pub script_id: Uuid,
    pub suggestions: Vec<Suggestion>,
}

pub fn run(args: PendingArgs) -> anyhow::Result<()> {
    let format = OutputFormat::detect(args.common.json);
    let result = list(args);
    context::finish(format, result, format_human)
}

fn list(args: PendingArgs) -> anyhow::Result<PendingResult> {
    let ctx = CliContext::load(args.common.as_user)?;
    let suggestions = context::block_on(ctx.service.list_pending(args.script))??;
    Ok(PendingResult { script_id: args.script, suggestions })
}

fn format_human(result: &PendingResult) -> String {
    if result.suggestions.is_empty() {
        return format!("No pending suggestions for {}", result.script_id);
    }
    result
        .suggestions
        .iter()
        .map(|s| {
            format!(
                "{}  {:<16}  {}  {}",
                s.id,
                s.author_id,
                s.created_at.format("%Y-%m-%d %H:%M"),
                change_summary(&s.diff_operations)
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// `+inserted -deleted` character counts of a patch.
fn change_summary(patch: &Delta) -> String {
    let (inserted, deleted) = patch.ops().iter().fold((0, 0), |(ins, del), op| match op {
        Op::Insert { .. } => (ins + op.len(), del),
        Op::Delete { len } => (ins, del + len),
        Op::Retain { .. } => (ins, del),
    });
    format!("+{inserted} -{deleted}")
}
