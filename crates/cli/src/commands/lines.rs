// `scriptdesk lines`: preview how an edit maps onto existing line identities.

use std::path::PathBuf;

use clap::Args;
use scriptdesk_common::delta::Delta;
use scriptdesk_engine::lines::{
    reconcile_lines, DocumentSurface, LineTracker, MatchOptions, MatchRule, ReconcileStats,
};
use serde::Serialize;
use uuid::Uuid;

use super::{short_id, CommonArgs};
use crate::context::{self, CliContext};
use crate::output::OutputFormat;

#[derive(Debug, Args)]
pub struct LinesArgs {
    pub script: Uuid,

    /// The edited script, as text or a `.json` operation document.
    pub file: PathBuf,

    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Debug, Clone, Serialize)]
pub struct PreviewLine {
    pub number: usize,
    pub identifier: String,
    pub text: String,
    pub rule: MatchRule,
    /// Line number in the canonical document this line was matched to.
    pub previous_line: Option<usize>,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LinesResult {
    pub script_id: Uuid,
    pub stats: ReconcileStats,
    pub lines: Vec<PreviewLine>,
}

pub fn run(args: LinesArgs) -> anyhow::Result<()> {
    let format = OutputFormat::detect(args.common.json);
    let result = load(args);
    context::finish(format, result, format_human)
}

fn load(args: LinesArgs) -> anyhow::Result<LinesResult> {
    let edited = context::read_document(&args.file)?;
    let ctx = CliContext::load(args.common.as_user)?;
    let user = ctx.actor().ok().map(|actor| actor.user_id);
    let canonical = context::block_on(ctx.service.canonical_document(args.script))??;
    Ok(preview(args.script, canonical, edited, user.as_deref(), ctx.config.match_options()))
}

/// Reconciles the canonical document's lines against `edited` without
/// writing anything back.
fn preview(
    script_id: Uuid,
    canonical: Delta,
    edited: Delta,
    user: Option<&str>,
    options: MatchOptions,
) -> LinesResult {
    let mut tracker = LineTracker::for_document(canonical, options);
    let previous = tracker.reconcile(user).map(|r| r.lines).unwrap_or_default();

    let observed = DocumentSurface::new(edited).observe();
    let result = reconcile_lines(&previous, &observed, user, options);
    let lines = result
        .lines
        .into_iter()
        .zip(result.matches)
        .map(|(line, found)| PreviewLine {
            number: line.line_number,
            identifier: line.identifier,
            text: line.content,
            rule: found.rule,
            previous_line: found.previous.map(|index| previous[index].line_number),
            score: found.score,
        })
        .collect();

    LinesResult { script_id, stats: result.stats, lines }
}

fn format_human(result: &LinesResult) -> String {
    let mut out: Vec<String> = result
        .lines
        .iter()
        .map(|line| {
            let origin = line.previous_line.map_or_else(|| "new".to_string(), |n| format!("<-{n}"));
            format!(
                "{:>4}  {}  {:<5}  {:<19}  {}",
                line.number,
                short_id(&line.identifier),
                origin,
                rule_label(line.rule),
                line.text
            )
        })
        .collect();
    out.push(String::new());
    out.push(format!(
        "{} preserved ({} edited), {} new",
        result.stats.preserved, result.stats.edited, result.stats.regenerated
    ));
    out.join("\n")
}

fn rule_label(rule: MatchRule) -> &'static str {
    match rule {
        MatchRule::ExactText => "exact",
        MatchRule::SurfaceIdentifier => "identifier",
        MatchRule::NearbyFuzzy => "fuzzy (nearby)",
        MatchRule::GlobalFuzzy => "fuzzy (anywhere)",
        MatchRule::SamePosition => "same position",
        MatchRule::EmptySamePosition => "empty, same position",
        MatchRule::EmptyElsewhere => "empty, moved",
        MatchRule::Regenerated => "regenerated",
    }
}
