// Consistent exit codes for the scriptdesk CLI.
//
//   0  = success
//   1  = general error
//   2  = usage/validation error
//   10 = not found
//   11 = forbidden (admin role required)
//   12 = conflict (in flight, already decided, stale base)
//   13 = storage error

use std::process;

use scriptdesk_engine::drafts::DraftError;
use scriptdesk_engine::store::StoreError;
use scriptdesk_engine::suggestion::SuggestionError;

use crate::context::MissingIdentity;

/// Named exit codes for the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,
    Error = 1,
    Usage = 2,
    NotFound = 10,
    Forbidden = 11,
    Conflict = 12,
    Storage = 13,
}

impl ExitCode {
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Map an anyhow error to an exit code by inspecting the error chain.
    pub fn from_error(err: &anyhow::Error) -> Self {
        for cause in err.chain() {
            if cause.downcast_ref::<MissingIdentity>().is_some() {
                return Self::Usage;
            }
            if let Some(error) = cause.downcast_ref::<SuggestionError>() {
                return Self::from_suggestion_error(error);
            }
            if let Some(error) = cause.downcast_ref::<DraftError>() {
                return match error {
                    DraftError::NotADocument => Self::Usage,
                    DraftError::Store(error) => Self::from_store_error(error),
                };
            }
            if let Some(error) = cause.downcast_ref::<StoreError>() {
                return Self::from_store_error(error);
            }
        }
        Self::Error
    }

    pub fn from_suggestion_error(error: &SuggestionError) -> Self {
        match error {
            SuggestionError::Forbidden { .. } => Self::Forbidden,
            SuggestionError::NotFound(_) => Self::NotFound,
            SuggestionError::Validation(_) => Self::Usage,
            SuggestionError::InvalidTransition { .. }
            | SuggestionError::InFlight(_)
            | SuggestionError::SubmissionInFlight { .. }
            | SuggestionError::PreconditionViolation(_) => Self::Conflict,
            SuggestionError::Store(error) => Self::from_store_error(error),
        }
    }

    fn from_store_error(error: &StoreError) -> Self {
        match error {
            StoreError::SuggestionNotFound(_) => Self::NotFound,
            StoreError::NotPending { .. } => Self::Conflict,
            StoreError::Transport(_) => Self::Storage,
        }
    }
}

impl From<ExitCode> for process::ExitCode {
    fn from(code: ExitCode) -> Self {
        process::ExitCode::from(code.code() as u8)
    }
}
