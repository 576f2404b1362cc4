// Persistence boundary: canonical documents, drafts, suggestions and
// version snapshots.
//
// The engine only talks to storage through `PersistenceAdapter`. Failures
// surface to the caller as `StoreError`; nothing in the engine retries.

pub mod memory;
pub mod meta_db;
pub mod sqlite;

use std::future::Future;

use scriptdesk_common::delta::Delta;
use scriptdesk_common::types::{Draft, Suggestion, SuggestionStatus, VersionSnapshot};
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("suggestion {0} not found")]
    SuggestionNotFound(Uuid),
    /// A status change found the suggestion already out of `pending`.
    #[error("suggestion {id} is {status}, not pending")]
    NotPending { id: Uuid, status: SuggestionStatus },
    /// Anything the backing store could not do: I/O, SQL, network.
    #[error(transparent)]
    Transport(#[from] anyhow::Error),
}

/// Storage operations the engine consumes.
///
/// All methods return `Send` futures so callers can run on a
/// multi-threaded tokio runtime.
pub trait PersistenceAdapter: Send + Sync + 'static {
    /// `None` when the script has never been saved.
    fn load_canonical_document(
        &self,
        script_id: Uuid,
    ) -> impl Future<Output = Result<Option<Delta>, StoreError>> + Send;

    fn save_canonical_document(
        &self,
        script_id: Uuid,
        document: &Delta,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn load_draft(
        &self,
        script_id: Uuid,
        author_id: &str,
    ) -> impl Future<Output = Result<Option<Draft>, StoreError>> + Send;

    /// Upserts the (script, author) draft; last write wins.
    fn save_draft(
        &self,
        script_id: Uuid,
        author_id: &str,
        content: &Delta,
    ) -> impl Future<Output = Result<Draft, StoreError>> + Send;

    /// Returns whether a draft existed.
    fn delete_draft(
        &self,
        script_id: Uuid,
        author_id: &str,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Pending suggestions of a script, oldest first.
    fn list_pending_suggestions(
        &self,
        script_id: Uuid,
    ) -> impl Future<Output = Result<Vec<Suggestion>, StoreError>> + Send;

    fn insert_suggestion(
        &self,
        suggestion: &Suggestion,
    ) -> impl Future<Output = Result<Uuid, StoreError>> + Send;

    /// Moves a pending suggestion to `status`. Fails with
    /// `SuggestionNotFound` for an unknown id and `NotPending` when the
    /// suggestion has already left `pending`.
    fn update_suggestion_status(
        &self,
        id: Uuid,
        status: SuggestionStatus,
        reason: Option<&str>,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn append_version_snapshot(
        &self,
        script_id: Uuid,
        document: &Delta,
        version_name: Option<&str>,
    ) -> impl Future<Output = Result<VersionSnapshot, StoreError>> + Send;

    /// Writes the approved document, appends its snapshot and marks the
    /// suggestion approved as one unit. Nothing is written unless the
    /// suggestion is still pending, so a retried approval cannot compose
    /// its patch twice.
    fn commit_approval(
        &self,
        suggestion_id: Uuid,
        script_id: Uuid,
        document: &Delta,
    ) -> impl Future<Output = Result<VersionSnapshot, StoreError>> + Send;

    fn load_suggestion(
        &self,
        id: Uuid,
    ) -> impl Future<Output = Result<Option<Suggestion>, StoreError>> + Send;

    /// Snapshots of a script, newest first.
    fn list_version_snapshots(
        &self,
        script_id: Uuid,
    ) -> impl Future<Output = Result<Vec<VersionSnapshot>, StoreError>> + Send;
}

/// SHA-256 of the document's plain text, lowercase hex.
pub fn content_hash(document: &Delta) -> String {
    let digest = Sha256::digest(document.plain_text().as_bytes());
    hex_encode(&digest)
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for &b in bytes {
        s.push_str(&format!("{b:02x}"));
    }
    s
}
