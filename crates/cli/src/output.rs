// Output format auto-detection for the CLI.
//
// TTY → human-readable text. Piped/redirected → structured JSON.
// `--json` flag forces JSON output regardless of terminal.

use scriptdesk_engine::config::ConfigError;
use scriptdesk_engine::drafts::DraftError;
use scriptdesk_engine::suggestion::SuggestionError;
use serde::Serialize;
use std::io::{self, IsTerminal, Write};

use crate::context::MissingIdentity;

const ANSI_RED: &str = "\x1b[31m";
const ANSI_YELLOW: &str = "\x1b[33m";
const ANSI_RESET: &str = "\x1b[0m";

/// Output format for CLI commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable text.
    Human,
    /// Machine-readable JSON (one object per response).
    Json,
}

impl OutputFormat {
    /// Auto-detect format: JSON if `--json` was passed or stdout is not a TTY.
    pub fn detect(json_flag: bool) -> Self {
        if json_flag {
            return Self::Json;
        }
        Self::detect_from_terminal(io::stdout().is_terminal())
    }

    /// Testable variant that takes an explicit `is_tty` flag.
    pub fn detect_from_terminal(is_tty: bool) -> Self {
        if is_tty {
            Self::Human
        } else {
            Self::Json
        }
    }
}

/// Write a value to stdout in the selected format.
pub fn print_output<T, F>(format: OutputFormat, value: &T, human_fn: F) -> io::Result<()>
where
    T: Serialize,
    F: FnOnce(&T) -> String,
{
    let mut out = io::stdout().lock();
    write_output(&mut out, format, value, human_fn)
}

/// Write a value to a provided writer (useful for testing).
pub fn write_output<W, T, F>(
    writer: &mut W,
    format: OutputFormat,
    value: &T,
    human_fn: F,
) -> io::Result<()>
where
    W: Write,
    T: Serialize,
    F: FnOnce(&T) -> String,
{
    match format {
        OutputFormat::Human => {
            writeln!(writer, "{}", human_fn(value))
        }
        OutputFormat::Json => {
            serde_json::to_writer(&mut *writer, value).map_err(io::Error::other)?;
            writeln!(writer)
        }
    }
}

/// Write an error to stderr in the selected format.
pub fn print_error(format: OutputFormat, code: &str, message: &str) {
    print_stderr(format, "error", code, message, ANSI_RED);
}

/// Write a warning to stderr in the selected format.
pub fn print_warning(format: OutputFormat, code: &str, message: &str) {
    print_stderr(format, "warning", code, message, ANSI_YELLOW);
}

/// Print a mapped, actionable error for a command failure.
pub fn print_anyhow_error(format: OutputFormat, error: &anyhow::Error) {
    let (code, message) = actionable_error(error);
    print_error(format, code, &message);
}

fn print_stderr(format: OutputFormat, label: &str, code: &str, message: &str, color: &str) {
    let mut err = io::stderr().lock();
    match format {
        OutputFormat::Human => {
            let line = render_human_stderr_line(label, message, io::stderr().is_terminal(), color);
            let _ = writeln!(err, "{line}");
        }
        OutputFormat::Json => {
            let mut obj = serde_json::Map::new();
            obj.insert(label.to_string(), serde_json::json!({ "code": code, "message": message }));
            let _ = serde_json::to_writer(&mut err, &obj);
            let _ = writeln!(err);
        }
    }
}

fn actionable_error(error: &anyhow::Error) -> (&'static str, String) {
    let message = format!("{error:#}");

    for cause in error.chain() {
        if cause.downcast_ref::<MissingIdentity>().is_some() {
            return (
                "NO_IDENTITY",
                "No user configured. Run: scriptdesk init --user <name>, or pass --as <name>"
                    .to_string(),
            );
        }
        if let Some(error) = cause.downcast_ref::<SuggestionError>() {
            return suggestion_error(error, message);
        }
        if let Some(error) = cause.downcast_ref::<DraftError>() {
            return match error {
                DraftError::NotADocument => ("VALIDATION_FAILED", message),
                DraftError::Store(_) => ("STORAGE_ERROR", message),
            };
        }
        if cause.downcast_ref::<ConfigError>().is_some() {
            return ("CONFIG_ERROR", message);
        }
    }

    ("ERROR", message)
}

fn suggestion_error(error: &SuggestionError, message: String) -> (&'static str, String) {
    match error {
        SuggestionError::Forbidden { user_id, .. } => (
            "FORBIDDEN",
            format!(
                "{message}. {user_id} is not an admin; admins set role = \"admin\" in ~/.scriptdesk/config.toml"
            ),
        ),
        SuggestionError::NotFound(_) => (
            "SUGGESTION_NOT_FOUND",
            format!("{message}. Run: scriptdesk pending <script> to list open suggestions"),
        ),
        SuggestionError::InvalidTransition { .. } => ("INVALID_TRANSITION", message),
        SuggestionError::Validation(_) => ("VALIDATION_FAILED", message),
        SuggestionError::InFlight(_) | SuggestionError::SubmissionInFlight { .. } => {
            ("IN_FLIGHT", message)
        }
        SuggestionError::PreconditionViolation(_) => (
            "PRECONDITION_FAILED",
            format!("{message}. The canonical document changed; reject and resubmit the suggestion"),
        ),
        SuggestionError::Store(_) => ("STORAGE_ERROR", message),
    }
}

fn render_human_stderr_line(label: &str, message: &str, is_tty: bool, color: &str) -> String {
    if is_tty {
        format!("{color}{label}:{ANSI_RESET} {message}")
    } else {
        format!("{label}: {message}")
    }
}
