// Suggestions: building a patch from an edit, and the pending -> approved /
// rejected lifecycle that folds approved patches into the canonical document.

pub mod builder;
pub mod lifecycle;

use scriptdesk_common::delta::DeltaError;
use scriptdesk_common::types::SuggestionStatus;
use thiserror::Error;
use uuid::Uuid;

use crate::store::StoreError;

pub use builder::{build_suggestion, BuildOutcome, SuggestionDraft};
pub use lifecycle::{ApprovalOutcome, SubmitOutcome, SuggestionService};

#[derive(Debug, Error)]
pub enum SuggestionError {
    #[error("{user_id} is not allowed to {action}")]
    Forbidden { user_id: String, action: &'static str },
    #[error("suggestion {0} not found")]
    NotFound(Uuid),
    #[error("suggestion {id} is {from} and cannot become {to}")]
    InvalidTransition { id: Uuid, from: SuggestionStatus, to: SuggestionStatus },
    #[error("{0}")]
    Validation(String),
    #[error("suggestion {0} is already being approved or rejected")]
    InFlight(Uuid),
    #[error("a submission by {author_id} for script {script_id} is already in flight")]
    SubmissionInFlight { script_id: Uuid, author_id: String },
    #[error("suggestion does not apply to the document: {0}")]
    PreconditionViolation(#[from] DeltaError),
    #[error(transparent)]
    Store(#[from] StoreError),
}
