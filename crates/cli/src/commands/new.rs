// `scriptdesk new`: create a script with an initial canonical document.

use std::path::PathBuf;

use clap::Args;
use scriptdesk_common::delta::Delta;
use scriptdesk_common::types::Actor;
use scriptdesk_engine::store::PersistenceAdapter;
use scriptdesk_engine::suggestion::SuggestionService;
use serde::Serialize;
use uuid::Uuid;

use super::CommonArgs;
use crate::context::{self, CliContext};
use crate::output::OutputFormat;

#[derive(Debug, Args)]
pub struct NewArgs {
    /// Seed the script from a text or `.json` operation document file.
    #[arg(long, value_name = "FILE")]
    from: Option<PathBuf>,

    /// Name of the first version snapshot.
    #[arg(long, default_value = "initial")]
    name: String,

    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewResult {
    pub script_id: Uuid,
    pub content_hash: String,
    pub line_count: usize,
}

pub fn run(args: NewArgs) -> anyhow::Result<()> {
    let format = OutputFormat::detect(args.common.json);
    let result = create(args);
    context::finish(format, result, format_human)
}

fn create(args: NewArgs) -> anyhow::Result<NewResult> {
    let document = match &args.from {
        Some(path) => context::read_document(path)?,
        None => Delta::empty_document(),
    };
    let ctx = CliContext::load(args.common.as_user)?;
    let actor = ctx.actor()?;
    context::block_on(create_script(&ctx.service, &actor, document, &args.name))?
}

pub(crate) async fn create_script<P: PersistenceAdapter>(
    service: &SuggestionService<P>,
    actor: &Actor,
    document: Delta,
    name: &str,
) -> anyhow::Result<NewResult> {
    let script_id = Uuid::new_v4();
    let snapshot = service.save_direct(actor, script_id, &document, Some(name)).await?;
    Ok(NewResult {
        script_id,
        content_hash: snapshot.content_hash,
        line_count: document.lines().len(),
    })
}

fn format_human(result: &NewResult) -> String {
    format!("Created script {} ({} lines)", result.script_id, result.line_count)
}
