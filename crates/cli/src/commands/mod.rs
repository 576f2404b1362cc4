// CLI subcommand dispatch.

use clap::{Args, Subcommand};
use scriptdesk_common::delta::Delta;
use serde::Serialize;

pub mod approve;
pub mod draft;
pub mod history;
pub mod init;
pub mod lines;
pub mod new;
pub mod pending;
pub mod reject;
pub mod save;
pub mod show;
pub mod suggest;

#[derive(Subcommand)]
pub enum Command {
    /// Write identity and database settings to ~/.scriptdesk/config.toml
    Init(init::InitArgs),
    /// Create a script, optionally seeded from a file (admin)
    New(new::NewArgs),
    /// Print the canonical document of a script
    Show(show::ShowArgs),
    /// Replace the canonical document directly (admin)
    Save(save::SaveArgs),
    /// Propose an edited version of a script for review
    Suggest(suggest::SuggestArgs),
    /// List pending suggestions for a script
    Pending(pending::PendingArgs),
    /// Apply a pending suggestion to the canonical document (admin)
    Approve(approve::ApproveArgs),
    /// Reject a pending suggestion with a reason (admin)
    Reject(reject::RejectArgs),
    /// List version snapshots, newest first
    History(history::HistoryArgs),
    /// Preview which line identities an edit keeps
    Lines(lines::LinesArgs),
    /// Save, show, discard or autosave your working draft
    Draft(draft::DraftArgs),
}

/// Flags shared by every command that touches the database.
#[derive(Debug, Clone, Args)]
pub struct CommonArgs {
    /// Act as this user instead of the configured one.
    #[arg(long = "as", value_name = "USER", global = true)]
    pub as_user: Option<String>,

    /// Force JSON output.
    #[arg(long, global = true)]
    pub json: bool,
}

pub fn run(cmd: Command) -> anyhow::Result<()> {
    match cmd {
        Command::Init(args) => init::run(args),
        Command::New(args) => new::run(args),
        Command::Show(args) => show::run(args),
        Command::Save(args) => save::run(args),
        Command::Suggest(args) => suggest::run(args),
        Command::Pending(args) => pending::run(args),
        Command::Approve(args) => approve::run(args),
        Command::Reject(args) => reject::run(args),
        Command::History(args) => history::run(args),
        Command::Lines(args) => lines::run(args),
        Command::Draft(args) => draft::run(args),
    }
}

// ── Shared rendering ───────────────────────────────────────────────

/// One line of a document as printed by `show`, `approve` and `draft show`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentLine {
    pub number: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    pub text: String,
}

pub fn document_lines(document: &Delta) -> Vec<DocumentLine> {
    document
        .lines()
        .iter()
        .enumerate()
        .map(|(index, line)| DocumentLine {
            number: index + 1,
            identifier: line.identifier().map(str::to_owned),
            text: line.text(),
        })
        .collect()
}

pub fn format_lines(lines: &[DocumentLine], with_ids: bool) -> String {
    let width = lines.len().to_string().len();
    lines
        .iter()
        .map(|line| match (&line.identifier, with_ids) {
            (Some(id), true) => format!("{:>width$}  {}  {}", line.number, short_id(id), line.text),
            (None, true) => format!("{:>width$}  {:8}  {}", line.number, "-", line.text),
            _ => format!("{:>width$}  {}", line.number, line.text),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// First eight characters of an identifier, for tables.
pub fn short_id(id: &str) -> &str {
    id.char_indices().nth(8).map_or(id, |(end, _)| &id[..end])
}
