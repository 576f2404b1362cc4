// `scriptdesk history`: version snapshots of a script, newest first.

use chrono::{DateTime, Utc};
use clap::Args;
use scriptdesk_common::types::VersionSnapshot;
use serde::Serialize;
use uuid::Uuid;

use super::{short_id, CommonArgs};
use crate::context::{self, CliContext};
use crate::output::OutputFormat;

#[derive(Debug, Args)]
pub struct HistoryArgs {
    pub script: Uuid,

    /// Show at most this many snapshots.
    #[arg(long, short = 'n')]
    limit: Option<usize>,

    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub id: Uuid,
    pub version_name: Option<String>,
    pub content_hash: String,
    pub line_count: usize,
    pub created_at: DateTime<Utc>,
}

impl From<&VersionSnapshot> for HistoryEntry {
    fn from(snapshot: &VersionSnapshot) -> Self {
        Self {
            id: snapshot.id,
            version_name: snapshot.version_name.clone(),
            content_hash: snapshot.content_hash.clone(),
            line_count: snapshot.content.lines().len(),
            created_at: snapshot.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryResult {
    pub script_id: Uuid,
    pub versions: Vec<HistoryEntry>,
}

pub fn run(args: HistoryArgs) -> anyhow::Result<()> {
    let format = OutputFormat::detect(args.common.json);
    let result = history(args);
    context::finish(format, result, format_human)
}

fn history(args: HistoryArgs) -> anyhow::Result<HistoryResult> {
    let ctx = CliContext::load(args.common.as_user)?;
    let snapshots = context::block_on(ctx.service.history(args.script))??;
    let limit = args.limit.unwrap_or(usize::MAX);
    Ok(HistoryResult {
        script_id: args.script,
        versions: snapshots.iter().take(limit).map(HistoryEntry::from).collect(),
    })
}

fn format_human(result: &HistoryResult) -> String {
    if result.versions.is_empty() {
        return format!("No versions recorded for {}", result.script_id);
    }
    result
        .versions
        .iter()
        .map(|v| {
            format!(
                "{}  {}  {:>5} lines  {}",
                v.created_at.format("%Y-%m-%d %H:%M:%S"),
                short_id(&v.content_hash),
                v.line_count,
                v.version_name.as_deref().unwrap_or("-")
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}
