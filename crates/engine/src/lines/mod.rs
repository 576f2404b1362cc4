// Line identity: stable identifiers for logical lines across edits.
//
// `surface` abstracts where identifiers are stored, `reconcile` re-derives
// the identifier assignment after an edit, and `tracker` owns the
// per-session position -> identifier state.

pub mod reconcile;
pub mod surface;
pub mod tracker;

pub use reconcile::{reconcile_lines, MatchOptions, MatchRule, ReconcileStats, Reconciliation};
pub use surface::{DocumentSurface, LineSurface};
pub use tracker::{ChangeReport, HistoryEntry, LineRecord, LineTracker, TrackerState};

/// One line as currently shown by the editing surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineObservation {
    /// Plain text of the line, without its line break.
    pub content: String,
    /// Identifier found in the line's structural slot, if any.
    pub identifier: Option<String>,
}

impl LineObservation {
    pub fn new(content: impl Into<String>) -> Self {
        Self { content: content.into(), identifier: None }
    }

    pub fn tagged(content: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self { content: content.into(), identifier: Some(identifier.into()) }
    }
}
