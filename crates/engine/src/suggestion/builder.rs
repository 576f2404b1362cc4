use chrono::{DateTime, Utc};
use scriptdesk_common::delta::{Delta, DeltaError, Op};
use scriptdesk_common::types::{Suggestion, SuggestionStatus};
use serde::Serialize;
use uuid::Uuid;

/// A suggestion that has been diffed but not yet persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SuggestionDraft {
    pub script_id: Uuid,
    pub author_id: String,
    pub diff_operations: Delta,
    pub status: SuggestionStatus,
    pub created_at: DateTime<Utc>,
}

impl SuggestionDraft {
    /// Gives the draft an identity, ready for `insert_suggestion`.
    pub fn into_suggestion(self) -> Suggestion {
        Suggestion {
            id: Uuid::new_v4(),
            script_id: self.script_id,
            author_id: self.author_id,
            diff_operations: self.diff_operations,
            status: self.status,
            rejection_reason: None,
            created_at: self.created_at,
            updated_at: self.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BuildOutcome {
    Changes(SuggestionDraft),
    /// The edit reproduces the base document; nothing to submit.
    NoChanges,
}

/// Diffs `edited` against `base` and packages the result as a pending
/// suggestion by `author_id`.
pub fn build_suggestion(
    script_id: Uuid,
    base: &Delta,
    edited: &Delta,
    author_id: &str,
) -> Result<BuildOutcome, DeltaError> {
    let diff_operations = base.diff(edited)?;
    if is_noop(&diff_operations, base.length()) {
        return Ok(BuildOutcome::NoChanges);
    }
    Ok(BuildOutcome::Changes(SuggestionDraft {
        script_id,
        author_id: author_id.to_owned(),
        diff_operations,
        status: SuggestionStatus::Pending,
        created_at: Utc::now(),
    }))
}

/// Empty, or a single unformatted retain over the whole document.
fn is_noop(diff: &Delta, document_length: usize) -> bool {
    match diff.ops() {
        [] => true,
        [Op::Retain { len, attributes: None }] => *len == document_length,
        _ => false,
    }
}
