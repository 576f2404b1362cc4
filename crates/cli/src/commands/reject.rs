// `scriptdesk reject`: close a pending suggestion with a reason.

use clap::Args;
use scriptdesk_common::types::Suggestion;
use uuid::Uuid;

use super::CommonArgs;
use crate::context::{self, CliContext};
use crate::output::OutputFormat;

#[derive(Debug, Args)]
pub struct RejectArgs {
    pub suggestion: Uuid,

    /// Why the suggestion is rejected; shown to its author.
    #[arg(long, short)]
    reason: String,

    #[command(flatten)]
    common: CommonArgs,
}

pub fn run(args: RejectArgs) -> anyhow::Result<()> {
    let format = OutputFormat::detect(args.common.json);
    let result = reject(args);
    context::finish(format, result, format_human)
}

fn reject(args: RejectArgs) -> anyhow::Result<Suggestion> {
    let ctx = CliContext::load(args.common.as_user)?;
    let actor = ctx.actor()?;
    Ok(context::block_on(ctx.service.reject(&actor, args.suggestion, &args.reason))??)
}

fn format_human(suggestion: &Suggestion) -> String {
    format!(
        "Rejected {} by {}: {}",
        suggestion.id,
        suggestion.author_id,
        suggestion.rejection_reason.as_deref().unwrap_or_default()
    )
}
