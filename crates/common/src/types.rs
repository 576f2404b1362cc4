// Core domain types shared across all scriptdesk crates.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::delta::Delta;

/// What a user may do with a script.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Owns the canonical document: approves, rejects, saves directly.
    Admin,
    #[default]
    Contributor,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Contributor => "contributor",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "admin" => Some(Self::Admin),
            "contributor" => Some(Self::Contributor),
            _ => None,
        }
    }
}

/// The user on whose behalf an operation runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Actor {
    pub user_id: String,
    pub role: Role,
}

impl Actor {
    pub fn admin(user_id: impl Into<String>) -> Self {
        Self { user_id: user_id.into(), role: Role::Admin }
    }

    pub fn contributor(user_id: impl Into<String>) -> Self {
        Self { user_id: user_id.into(), role: Role::Contributor }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SuggestionStatus {
    Draft,
    Pending,
    Approved,
    Rejected,
}

impl SuggestionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "draft" => Some(Self::Draft),
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Approved | Self::Rejected)
    }

    /// `draft -> pending -> {approved, rejected}`; nothing leaves a terminal state.
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Draft, Self::Pending) | (Self::Pending, Self::Approved | Self::Rejected)
        )
    }
}

impl fmt::Display for SuggestionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A proposed patch against a script's canonical document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Suggestion {
    pub id: Uuid,
    pub script_id: Uuid,
    pub author_id: String,
    pub diff_operations: Delta,
    pub status: SuggestionStatus,
    pub rejection_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An author's unsubmitted working copy; one per (script, author).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Draft {
    pub script_id: Uuid,
    pub author_id: String,
    pub content: Delta,
    pub updated_at: DateTime<Utc>,
}

/// Copy of the canonical document taken on every canonical write.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VersionSnapshot {
    pub id: Uuid,
    pub script_id: Uuid,
    pub content: Delta,
    pub version_name: Option<String>,
    /// sha256 of the document's plain text, lowercase hex.
    pub content_hash: String,
    pub created_at: DateTime<Utc>,
}

/// Identity and attribution of one line, as produced by reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LineData {
    pub identifier: String,
    /// 1-based.
    pub line_number: usize,
    pub content: String,
    pub author: Option<String>,
    /// Users who changed this line after it was created, in first-edit order.
    #[serde(default)]
    pub edited_by: Vec<String>,
}
