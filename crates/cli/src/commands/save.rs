// `scriptdesk save`: replace the canonical document without review.

use std::path::PathBuf;

use clap::Args;
use scriptdesk_common::types::VersionSnapshot;
use serde::Serialize;
use uuid::Uuid;

use super::{short_id, CommonArgs};
use crate::context::{self, CliContext};
use crate::output::OutputFormat;

#[derive(Debug, Args)]
pub struct SaveArgs {
    pub script: Uuid,

    /// Text or `.json` operation document file.
    pub file: PathBuf,

    /// Name for the version snapshot.
    #[arg(long)]
    name: Option<String>,

    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Debug, Clone, Serialize)]
pub struct SaveResult {
    pub script_id: Uuid,
    pub snapshot_id: Uuid,
    pub version_name: Option<String>,
    pub content_hash: String,
}

impl From<VersionSnapshot> for SaveResult {
    fn from(snapshot: VersionSnapshot) -> Self {
        Self {
            script_id: snapshot.script_id,
            snapshot_id: snapshot.id,
            version_name: snapshot.version_name,
            content_hash: snapshot.content_hash,
        }
    }
}

pub fn run(args: SaveArgs) -> anyhow::Result<()> {
    let format = OutputFormat::detect(args.common.json);
    let result = save(args);
    context::finish(format, result, format_human)
}

fn save(args: SaveArgs) -> anyhow::Result<SaveResult> {
    let document = context::read_document(&args.file)?;
    let ctx = CliContext::load(args.common.as_user)?;
    let actor = ctx.actor()?;
    let snapshot = context::block_on(ctx.service.save_direct(
        &actor,
        args.script,
        &document,
        args.name.as_deref(),
    ))??;
    Ok(snapshot.into())
}

fn format_human(result: &SaveResult) -> String {
    let name = result.version_name.as_deref().map(|n| format!(" `{n}`")).unwrap_or_default();
    format!("Saved script {}{name} (sha256 {})", result.script_id, short_id(&result.content_hash))
}
