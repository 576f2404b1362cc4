// `scriptdesk show`: print the canonical document of a script.

use clap::Args;
use serde::Serialize;
use uuid::Uuid;

use super::{document_lines, format_lines, CommonArgs, DocumentLine};
use crate::context::{self, CliContext};
use crate::output::OutputFormat;

#[derive(Debug, Args)]
pub struct ShowArgs {
    pub script: Uuid,

    /// Include each line's identifier.
    #[arg(long)]
    ids: bool,

    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Debug, Clone, Serialize)]
pub struct ShowResult {
    pub script_id: Uuid,
    pub lines: Vec<DocumentLine>,
    #[serde(skip)]
    with_ids: bool,
}

pub fn run(args: ShowArgs) -> anyhow::Result<()> {
    let format = OutputFormat::detect(args.common.json);
    let result = load(&args);
    context::finish(format, result, format_human)
}

fn load(args: &ShowArgs) -> anyhow::Result<ShowResult> {
    let ctx = CliContext::load(args.common.as_user.clone())?;
    let document = context::block_on(ctx.service.canonical_document(args.script))??;
    Ok(ShowResult { script_id: args.script, lines: document_lines(&document), with_ids: args.ids })
}

fn format_human(result: &ShowResult) -> String {
    format_lines(&result.lines, result.with_ids)
}
