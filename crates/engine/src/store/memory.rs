// In-memory persistence adapter.
//
// Backs tests and embedders that keep everything in process. Records every
// call so tests can assert on what was (not) persisted, and can be told to
// fail specific operations or to answer slowly.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use chrono::Utc;
use scriptdesk_common::delta::Delta;
use scriptdesk_common::types::{Draft, Suggestion, SuggestionStatus, VersionSnapshot};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{content_hash, PersistenceAdapter, StoreError};

#[derive(Default)]
struct MemoryState {
    documents: HashMap<Uuid, Delta>,
    drafts: HashMap<(Uuid, String), Draft>,
    suggestions: Vec<Suggestion>,
    snapshots: Vec<VersionSnapshot>,
}

impl MemoryState {
    fn pending_mut(&mut self, id: Uuid) -> Result<&mut Suggestion, StoreError> {
        let suggestion = self
            .suggestions
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or(StoreError::SuggestionNotFound(id))?;
        if suggestion.status != SuggestionStatus::Pending {
            return Err(StoreError::NotPending { id, status: suggestion.status });
        }
        Ok(suggestion)
    }
}

fn new_snapshot(script_id: Uuid, document: &Delta, version_name: Option<&str>) -> VersionSnapshot {
    VersionSnapshot {
        id: Uuid::new_v4(),
        script_id,
        content: document.clone(),
        version_name: version_name.map(str::to_owned),
        content_hash: content_hash(document),
        created_at: Utc::now(),
    }
}

#[derive(Default)]
struct Faults {
    failing: HashSet<&'static str>,
    latency: Option<Duration>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    calls: Arc<Mutex<Vec<&'static str>>>,
    faults: Arc<Mutex<Faults>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of the adapter methods called so far, in order.
    pub async fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().await.clone()
    }

    pub async fn call_count(&self, operation: &str) -> usize {
        self.calls.lock().await.iter().filter(|call| **call == operation).count()
    }

    /// Makes every later call of `operation` fail with a transport error.
    pub async fn fail_on(&self, operation: &'static str) {
        self.faults.lock().await.failing.insert(operation);
    }

    pub async fn clear_failures(&self) {
        self.faults.lock().await.failing.clear();
    }

    /// Delays every later call by `latency` before it touches state.
    pub async fn set_latency(&self, latency: Option<Duration>) {
        self.faults.lock().await.latency = latency;
    }

    async fn enter(&self, operation: &'static str) -> Result<(), StoreError> {
        self.calls.lock().await.push(operation);
        let (fails, latency) = {
            let faults = self.faults.lock().await;
            (faults.failing.contains(operation), faults.latency)
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if fails {
            return Err(StoreError::Transport(anyhow!("injected failure in {operation}")));
        }
        Ok(())
    }
}

impl PersistenceAdapter for MemoryStore {
    async fn load_canonical_document(&self, script_id: Uuid) -> Result<Option<Delta>, StoreError> {
        self.enter("load_canonical_document").await?;
        Ok(self.state.lock().await.documents.get(&script_id).cloned())
    }

    async fn save_canonical_document(
        &self,
        script_id: Uuid,
        document: &Delta,
    ) -> Result<(), StoreError> {
        self.enter("save_canonical_document").await?;
        self.state.lock().await.documents.insert(script_id, document.clone());
        Ok(())
    }

    async fn load_draft(
        &self,
        script_id: Uuid,
        author_id: &str,
    ) -> Result<Option<Draft>, StoreError> {
        self.enter("load_draft").await?;
        let state = self.state.lock().await;
        Ok(state.drafts.get(&(script_id, author_id.to_owned())).cloned())
    }

    async fn save_draft(
        &self,
        script_id: Uuid,
        author_id: &str,
        content: &Delta,
    ) -> Result<Draft, StoreError> {
        self.enter("save_draft").await?;
        let draft = Draft {
            script_id,
            author_id: author_id.to_owned(),
            content: content.clone(),
            updated_at: Utc::now(),
        };
        self.state.lock().await.drafts.insert((script_id, author_id.to_owned()), draft.clone());
        Ok(draft)
    }

    async fn delete_draft(&self, script_id: Uuid, author_id: &str) -> Result<bool, StoreError> {
        self.enter("delete_draft").await?;
        let mut state = self.state.lock().await;
        Ok(state.drafts.remove(&(script_id, author_id.to_owned())).is_some())
    }

    async fn list_pending_suggestions(
        &self,
        script_id: Uuid,
    ) -> Result<Vec<Suggestion>, StoreError> {
        self.enter("list_pending_suggestions").await?;
        let state = self.state.lock().await;
        Ok(state
            .suggestions
            .iter()
            .filter(|s| s.script_id == script_id && s.status == SuggestionStatus::Pending)
            .cloned()
            .collect())
    }

    async fn insert_suggestion(&self, suggestion: &Suggestion) -> Result<Uuid, StoreError> {
        self.enter("insert_suggestion").await?;
        self.state.lock().await.suggestions.push(suggestion.clone());
        Ok(suggestion.id)
    }

    async fn update_suggestion_status(
        &self,
        id: Uuid,
        status: SuggestionStatus,
        reason: Option<&str>,
    ) -> Result<(), StoreError> {
        self.enter("update_suggestion_status").await?;
        let mut state = self.state.lock().await;
        let suggestion = state.pending_mut(id)?;
        suggestion.status = status;
        suggestion.rejection_reason = reason.map(str::to_owned);
        suggestion.updated_at = Utc::now();
        Ok(())
    }

    async fn append_version_snapshot(
        &self,
        script_id: Uuid,
        document: &Delta,
        version_name: Option<&str>,
    ) -> Result<VersionSnapshot, StoreError> {
        self.enter("append_version_snapshot").await?;
        let snapshot = new_snapshot(script_id, document, version_name);
        self.state.lock().await.snapshots.push(snapshot.clone());
        Ok(snapshot)
    }

    async fn commit_approval(
        &self,
        suggestion_id: Uuid,
        script_id: Uuid,
        document: &Delta,
    ) -> Result<VersionSnapshot, StoreError> {
        self.enter("commit_approval").await?;
        let mut state = self.state.lock().await;
        let suggestion = state.pending_mut(suggestion_id)?;
        suggestion.status = SuggestionStatus::Approved;
        suggestion.rejection_reason = None;
        suggestion.updated_at = Utc::now();

        let snapshot = new_snapshot(script_id, document, None);
        state.documents.insert(script_id, document.clone());
        state.snapshots.push(snapshot.clone());
        Ok(snapshot)
    }

    async fn load_suggestion(&self, id: Uuid) -> Result<Option<Suggestion>, StoreError> {
        self.enter("load_suggestion").await?;
        let state = self.state.lock().await;
        Ok(state.suggestions.iter().find(|s| s.id == id).cloned())
    }

    async fn list_version_snapshots(
        &self,
        script_id: Uuid,
    ) -> Result<Vec<VersionSnapshot>, StoreError> {
        self.enter("list_version_snapshots").await?;
        let state = self.state.lock().await;
        Ok(state.snapshots.iter().rev().filter(|s| s.script_id == script_id).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending(script_id: Uuid, author: &str) -> Suggestion {
        let now = Utc::now();
        Suggestion {
            id: Uuid::new_v4(),
            script_id,
            author_id: author.to_owned(),
            diff_operations: Delta::new().retain(1, None).insert("x", None),
            status: SuggestionStatus::Pending,
            rejection_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn drafts_upsert_per_script_and_author() {
        let store = MemoryStore::new();
        let script = Uuid::new_v4();
        store.save_draft(script, "ada", &Delta::new().insert("one\n", None)).await.unwrap();
        store.save_draft(script, "ada", &Delta::new().insert("two\n", None)).await.unwrap();
        store.save_draft(script, "bob", &Delta::new().insert("bob\n", None)).await.unwrap();

        let draft = store.load_draft(script, "ada").await.unwrap().expect("saved");
        assert_eq!(draft.content.plain_text(), "two\n");
        assert!(store.delete_draft(script, "ada").await.unwrap());
        assert!(!store.delete_draft(script, "ada").await.unwrap());
        assert!(store.load_draft(script, "bob").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn only_pending_suggestions_are_listed() {
        let store = MemoryStore::new();
        let script = Uuid::new_v4();
        let first = pending(script, "ada");
        let second = pending(script, "bob");
        store.insert_suggestion(&first).await.unwrap();
        store.insert_suggestion(&second).await.unwrap();
        store.insert_suggestion(&pending(Uuid::new_v4(), "ada")).await.unwrap();

        store
            .update_suggestion_status(first.id, SuggestionStatus::Rejected, Some("off tone"))
            .await
            .unwrap();

        let listed = store.list_pending_suggestions(script).await.unwrap();
        assert_eq!(listed.iter().map(|s| s.id).collect::<Vec<_>>(), vec![second.id]);
        let rejected = store.load_suggestion(first.id).await.unwrap().expect("stored");
        assert_eq!(rejected.rejection_reason.as_deref(), Some("off tone"));
    }

    #[tokio::test]
    async fn unknown_suggestion_update_is_not_found() {
        let store = MemoryStore::new();
        let id = Uuid::new_v4();
        let err = store
            .update_suggestion_status(id, SuggestionStatus::Approved, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::SuggestionNotFound(missing) if missing == id));
    }

    #[tokio::test]
    async fn commit_approval_writes_everything_or_nothing() {
        let store = MemoryStore::new();
        let script = Uuid::new_v4();
        let suggestion = pending(script, "ada");
        store.insert_suggestion(&suggestion).await.unwrap();
        let document = Delta::new().insert("Ax\n", None);

        let snapshot = store.commit_approval(suggestion.id, script, &document).await.unwrap();
        assert_eq!(snapshot.content, document);
        assert_eq!(store.load_canonical_document(script).await.unwrap(), Some(document.clone()));
        let approved = store.load_suggestion(suggestion.id).await.unwrap().expect("stored");
        assert_eq!(approved.status, SuggestionStatus::Approved);

        let err = store
            .commit_approval(suggestion.id, script, &Delta::new().insert("Axx\n", None))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::NotPending { status: SuggestionStatus::Approved, .. }
        ));
        assert_eq!(store.load_canonical_document(script).await.unwrap(), Some(document));
        assert_eq!(store.list_version_snapshots(script).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn terminal_suggestions_keep_their_status() {
        let store = MemoryStore::new();
        let suggestion = pending(Uuid::new_v4(), "ada");
        store.insert_suggestion(&suggestion).await.unwrap();
        store
            .update_suggestion_status(suggestion.id, SuggestionStatus::Rejected, Some("no"))
            .await
            .unwrap();

        let err = store
            .update_suggestion_status(suggestion.id, SuggestionStatus::Approved, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotPending { status: SuggestionStatus::Rejected, .. }));
        let stored = store.load_suggestion(suggestion.id).await.unwrap().expect("stored");
        assert_eq!(stored.rejection_reason.as_deref(), Some("no"));
    }

    #[tokio::test]
    async fn snapshots_are_listed_newest_first() {
        let store = MemoryStore::new();
        let script = Uuid::new_v4();
        store.append_version_snapshot(script, &Delta::empty_document(), Some("v1")).await.unwrap();
        store
            .append_version_snapshot(script, &Delta::new().insert("Act I\n", None), None)
            .await
            .unwrap();

        let names: Vec<_> = store
            .list_version_snapshots(script)
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.version_name)
            .collect();
        assert_eq!(names, vec![None, Some("v1".to_owned())]);
    }

    #[tokio::test]
    async fn injected_failures_surface_and_are_recorded() {
        let store = MemoryStore::new();
        store.fail_on("save_canonical_document").await;

        let err = store
            .save_canonical_document(Uuid::nil(), &Delta::empty_document())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Transport(_)));
        assert_eq!(store.calls().await, vec!["save_canonical_document"]);
        assert!(store.load_canonical_document(Uuid::nil()).await.unwrap().is_none());

        store.clear_failures().await;
        store.save_canonical_document(Uuid::nil(), &Delta::empty_document()).await.unwrap();
        assert_eq!(store.call_count("save_canonical_document").await, 2);
    }
}
