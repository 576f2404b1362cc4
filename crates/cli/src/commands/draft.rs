// `scriptdesk draft`: the caller's unsubmitted working copy of a script.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use chrono::{DateTime, Utc};
use clap::{Args, Subcommand};
use scriptdesk_common::delta::Delta;
use scriptdesk_common::types::Draft;
use scriptdesk_engine::drafts::{
    run_autosave, AutosaveConfig, DraftEdit, DraftKey, DraftLoad, DraftSync, SaveOutcome,
};
use scriptdesk_engine::store::PersistenceAdapter;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};
use uuid::Uuid;

use super::{document_lines, format_lines, CommonArgs, DocumentLine};
use crate::context::{self, CliContext};
use crate::output::OutputFormat;

#[derive(Debug, Args)]
pub struct DraftArgs {
    #[command(subcommand)]
    action: DraftAction,

    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Debug, Subcommand)]
enum DraftAction {
    /// Store a file as your draft of a script
    Save { script: Uuid, file: PathBuf },
    /// Print your draft of a script
    Show { script: Uuid },
    /// Delete your draft of a script
    Discard { script: Uuid },
    /// Autosave a file as your draft whenever it changes, until Ctrl-C
    Watch {
        script: Uuid,
        file: PathBuf,
        /// How often to check the file for changes.
        #[arg(long, default_value_t = 500)]
        poll_ms: u64,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum DraftResult {
    Saved { script_id: Uuid, author_id: String, updated_at: DateTime<Utc> },
    /// Another save for the same draft was running; nothing was written.
    Skipped { script_id: Uuid, author_id: String },
    Shown { script_id: Uuid, author_id: String, draft: Option<ShownDraft> },
    Discarded { script_id: Uuid, author_id: String, removed: bool },
    Watched { script_id: Uuid, author_id: String, edits: usize },
}

#[derive(Debug, Clone, Serialize)]
pub struct ShownDraft {
    pub updated_at: DateTime<Utc>,
    pub lines: Vec<DocumentLine>,
}

impl From<Draft> for ShownDraft {
    fn from(draft: Draft) -> Self {
        Self { updated_at: draft.updated_at, lines: document_lines(&draft.content) }
    }
}

pub fn run(args: DraftArgs) -> anyhow::Result<()> {
    let format = OutputFormat::detect(args.common.json);
    let result = execute(args);
    context::finish(format, result, format_human)
}

fn execute(args: DraftArgs) -> anyhow::Result<DraftResult> {
    let ctx = CliContext::load(args.common.as_user)?;
    let author_id = ctx.actor()?.user_id;
    let sync = Arc::new(DraftSync::new(Arc::clone(ctx.store())));

    match args.action {
        DraftAction::Save { script, file } => {
            let content = context::read_document(&file)?;
            context::block_on(save(&sync, script, author_id, &content))?
        }
        DraftAction::Show { script } => context::block_on(show(&sync, script, author_id))?,
        DraftAction::Discard { script } => {
            let removed = context::block_on(sync.delete(script, &author_id))??;
            Ok(DraftResult::Discarded { script_id: script, author_id, removed })
        }
        DraftAction::Watch { script, file, poll_ms } => {
            let key = DraftKey::new(script, author_id.clone());
            let config = ctx.config.autosave_config();
            let poll = Duration::from_millis(poll_ms.max(50));
            let edits = context::block_on(watch_file(sync, key, file, config, poll, async {
                if let Err(err) = tokio::signal::ctrl_c().await {
                    warn!(error = %err, "could not listen for Ctrl-C");
                    std::future::pending::<()>().await;
                }
            }))??;
            Ok(DraftResult::Watched { script_id: script, author_id, edits })
        }
    }
}

async fn save<P: PersistenceAdapter>(
    sync: &DraftSync<P>,
    script_id: Uuid,
    author_id: String,
    content: &Delta,
) -> anyhow::Result<DraftResult> {
    Ok(match sync.save(script_id, &author_id, content).await? {
        SaveOutcome::Saved(draft) => {
            DraftResult::Saved { script_id, author_id, updated_at: draft.updated_at }
        }
        SaveOutcome::AlreadyInFlight => DraftResult::Skipped { script_id, author_id },
    })
}

async fn show<P: PersistenceAdapter>(
    sync: &DraftSync<P>,
    script_id: Uuid,
    author_id: String,
) -> anyhow::Result<DraftResult> {
    match sync.load(script_id, &author_id).await? {
        DraftLoad::Loaded(draft) => {
            Ok(DraftResult::Shown { script_id, author_id, draft: draft.map(ShownDraft::from) })
        }
        DraftLoad::Cancelled => bail!("draft load was superseded by a newer request"),
    }
}

/// Feeds every change to `file` into the autosave loop until `stop`
/// resolves, then waits for the loop to save what is still pending.
/// Returns how many changed versions were sent.
async fn watch_file<P: PersistenceAdapter>(
    sync: Arc<DraftSync<P>>,
    key: DraftKey,
    file: PathBuf,
    config: AutosaveConfig,
    poll: Duration,
    stop: impl Future<Output = ()>,
) -> anyhow::Result<usize> {
    let (edits_tx, edits_rx) = mpsc::channel(16);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let autosave = tokio::spawn(run_autosave(sync, edits_rx, config, shutdown_rx));
    info!(file = %file.display(), script = %key.script_id, "watching draft file");

    tokio::pin!(stop);
    let mut ticker = tokio::time::interval(poll);
    let mut last: Option<Delta> = None;
    let mut sent = 0;

    let outcome = loop {
        tokio::select! {
            _ = &mut stop => break Ok(()),
            _ = ticker.tick() => {}
        }
        let content = match read_if_changed(&file, last.as_ref()) {
            Ok(Some(content)) => content,
            Ok(None) => continue,
            Err(err) => break Err(err),
        };
        last = Some(content.clone());
        if edits_tx.send(DraftEdit { key: key.clone(), content }).await.is_err() {
            break Err(anyhow::anyhow!("autosave stopped unexpectedly"));
        }
        sent += 1;
    };

    // Closing the channel lets the loop take every queued edit before it
    // flushes and exits.
    drop(edits_tx);
    if let Err(err) = autosave.await {
        warn!(error = %err, "autosave task failed");
    }
    drop(shutdown_tx);
    outcome.map(|()| sent)
}

fn read_if_changed(file: &Path, last: Option<&Delta>) -> anyhow::Result<Option<Delta>> {
    let content = context::read_document(file)?;
    Ok((last != Some(&content)).then_some(content))
}

fn format_human(result: &DraftResult) -> String {
    match result {
        DraftResult::Saved { script_id, updated_at, .. } => {
            format!("Saved draft of {script_id} at {}", updated_at.format("%Y-%m-%d %H:%M:%S"))
        }
        DraftResult::Skipped { script_id, .. } => {
            format!("A save of your draft of {script_id} is already running; nothing written")
        }
        DraftResult::Shown { script_id, draft: None, .. } => {
            format!("No draft of {script_id}")
        }
        DraftResult::Shown { draft: Some(draft), .. } => format_lines(&draft.lines, false),
        DraftResult::Discarded { script_id, removed: true, .. } => {
            format!("Discarded draft of {script_id}")
        }
        DraftResult::Discarded { script_id, removed: false, .. } => {
            format!("No draft of {script_id} to discard")
        }
        DraftResult::Watched { edits, .. } => format!("Stopped watching after {edits} change(s)"),
    }
}
