// Suggestion lifecycle manager.
//
// draft -> pending -> {approved, rejected}; both end states are final.
// Approval composes the suggestion's patch onto the canonical document
// exactly once: a per-suggestion guard turns a concurrent second approve or
// reject into `InFlight`, and a sequential second call finds the suggestion
// terminal and fails with `InvalidTransition` before touching the document.
//
// Other pending suggestions are not rebased after an approval; they may no
// longer apply and will then fail with `PreconditionViolation`.

use std::sync::Arc;

use chrono::Utc;
use scriptdesk_common::delta::Delta;
use scriptdesk_common::normalize::normalize;
use scriptdesk_common::types::{Actor, Suggestion, SuggestionStatus, VersionSnapshot};
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::builder::{build_suggestion, BuildOutcome, SuggestionDraft};
use super::SuggestionError;
use crate::guard::KeyedGuard;
use crate::store::{PersistenceAdapter, StoreError};

#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    Submitted(Suggestion),
    /// The edit matched the canonical document; nothing was persisted.
    NoChanges,
}

/// What an approval produced. `document` is the new canonical document,
/// for refreshing whatever editing surface the approver has open.
#[derive(Debug, Clone, PartialEq)]
pub struct ApprovalOutcome {
    pub suggestion: Suggestion,
    pub document: Delta,
    pub snapshot: VersionSnapshot,
}

pub struct SuggestionService<P> {
    store: Arc<P>,
    transitions: KeyedGuard<Uuid>,
    submissions: KeyedGuard<(Uuid, String)>,
}

impl<P: PersistenceAdapter> SuggestionService<P> {
    pub fn new(store: Arc<P>) -> Self {
        Self { store, transitions: KeyedGuard::new(), submissions: KeyedGuard::new() }
    }

    pub fn store(&self) -> &Arc<P> {
        &self.store
    }

    /// Canonical document of a script, or the empty document if none is stored.
    pub async fn canonical_document(&self, script_id: Uuid) -> Result<Delta, SuggestionError> {
        let stored = self.store.load_canonical_document(script_id).await?;
        Ok(stored.unwrap_or_else(Delta::empty_document))
    }

    /// Persists `draft` as a pending suggestion and removes the author's
    /// working draft, which the suggestion supersedes.
    pub async fn submit(
        &self,
        actor: &Actor,
        draft: SuggestionDraft,
    ) -> Result<Suggestion, SuggestionError> {
        let _token = self.acquire_submission(draft.script_id, &draft.author_id)?;
        self.submit_locked(actor, draft).await
    }

    /// Normalizes `edited`, diffs it against the canonical document and
    /// submits the result. Returns `NoChanges` when there is nothing to propose.
    pub async fn submit_edit(
        &self,
        script_id: Uuid,
        actor: &Actor,
        edited: &Value,
    ) -> Result<SubmitOutcome, SuggestionError> {
        let _token = self.acquire_submission(script_id, &actor.user_id)?;
        let base = self.canonical_document(script_id).await?;
        let edited = normalize(edited);

        match build_suggestion(script_id, &base, &edited, &actor.user_id)? {
            BuildOutcome::NoChanges => {
                debug!(script = %script_id, author = %actor.user_id, "edit matches canonical document");
                Ok(SubmitOutcome::NoChanges)
            }
            BuildOutcome::Changes(draft) => {
                Ok(SubmitOutcome::Submitted(self.submit_locked(actor, draft).await?))
            }
        }
    }

    /// Approves against the stored canonical document.
    pub async fn approve(
        &self,
        actor: &Actor,
        suggestion_id: Uuid,
    ) -> Result<ApprovalOutcome, SuggestionError> {
        require_admin(actor, "approve suggestions")?;
        let _token = self.acquire_transition(suggestion_id)?;
        let suggestion = self.load_pending(suggestion_id, SuggestionStatus::Approved).await?;
        let base = self.canonical_document(suggestion.script_id).await?;
        self.approve_locked(suggestion, &base).await
    }

    /// Approves against `base`, the document the approver is looking at.
    pub async fn approve_with_base(
        &self,
        actor: &Actor,
        suggestion_id: Uuid,
        base: &Delta,
    ) -> Result<ApprovalOutcome, SuggestionError> {
        require_admin(actor, "approve suggestions")?;
        let _token = self.acquire_transition(suggestion_id)?;
        let suggestion = self.load_pending(suggestion_id, SuggestionStatus::Approved).await?;
        self.approve_locked(suggestion, base).await
    }

    /// Marks a pending suggestion rejected. `reason` must not be blank; that
    /// is checked before anything is read or written.
    pub async fn reject(
        &self,
        actor: &Actor,
        suggestion_id: Uuid,
        reason: &str,
    ) -> Result<Suggestion, SuggestionError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(SuggestionError::Validation("a rejection reason is required".into()));
        }
        require_admin(actor, "reject suggestions")?;
        let _token = self.acquire_transition(suggestion_id)?;
        let mut suggestion = self.load_pending(suggestion_id, SuggestionStatus::Rejected).await?;

        self.store
            .update_suggestion_status(suggestion_id, SuggestionStatus::Rejected, Some(reason))
            .await
            .map_err(|err| transition_error(err, SuggestionStatus::Rejected))?;
        self.discard_draft(suggestion.script_id, &suggestion.author_id).await;

        info!(suggestion = %suggestion_id, script = %suggestion.script_id, "suggestion rejected");
        suggestion.status = SuggestionStatus::Rejected;
        suggestion.rejection_reason = Some(reason.to_owned());
        suggestion.updated_at = Utc::now();
        Ok(suggestion)
    }

    /// Admin edit written straight to the canonical document, bypassing
    /// suggestions.
    pub async fn save_direct(
        &self,
        actor: &Actor,
        script_id: Uuid,
        document: &Delta,
        version_name: Option<&str>,
    ) -> Result<VersionSnapshot, SuggestionError> {
        require_admin(actor, "edit the canonical document")?;
        if !document.is_document() {
            return Err(SuggestionError::Validation(
                "direct saves take a full document, not a patch".into(),
            ));
        }

        self.store.save_canonical_document(script_id, document).await?;
        let snapshot =
            self.store.append_version_snapshot(script_id, document, version_name).await?;
        info!(
            script = %script_id,
            author = %actor.user_id,
            hash = %snapshot.content_hash,
            "canonical document saved directly"
        );
        Ok(snapshot)
    }

    pub async fn list_pending(&self, script_id: Uuid) -> Result<Vec<Suggestion>, SuggestionError> {
        Ok(self.store.list_pending_suggestions(script_id).await?)
    }

    /// Version snapshots of a script, newest first.
    pub async fn history(&self, script_id: Uuid) -> Result<Vec<VersionSnapshot>, SuggestionError> {
        Ok(self.store.list_version_snapshots(script_id).await?)
    }

    // ── Internals ──────────────────────────────────────────────────

    fn acquire_submission(
        &self,
        script_id: Uuid,
        author_id: &str,
    ) -> Result<crate::guard::GuardToken<(Uuid, String)>, SuggestionError> {
        self.submissions.try_acquire((script_id, author_id.to_owned())).ok_or_else(|| {
            SuggestionError::SubmissionInFlight { script_id, author_id: author_id.to_owned() }
        })
    }

    fn acquire_transition(
        &self,
        suggestion_id: Uuid,
    ) -> Result<crate::guard::GuardToken<Uuid>, SuggestionError> {
        self.transitions.try_acquire(suggestion_id).ok_or_else(|| {
            warn!(suggestion = %suggestion_id, "transition already in flight");
            SuggestionError::InFlight(suggestion_id)
        })
    }

    async fn submit_locked(
        &self,
        actor: &Actor,
        draft: SuggestionDraft,
    ) -> Result<Suggestion, SuggestionError> {
        if draft.author_id != actor.user_id {
            return Err(SuggestionError::Forbidden {
                user_id: actor.user_id.clone(),
                action: "submit suggestions for another author",
            });
        }
        if draft.status != SuggestionStatus::Pending {
            return Err(SuggestionError::Validation(format!(
                "only pending suggestions can be submitted, got {}",
                draft.status
            )));
        }

        let suggestion = draft.into_suggestion();
        self.store.insert_suggestion(&suggestion).await?;
        self.discard_draft(suggestion.script_id, &suggestion.author_id).await;

        info!(
            suggestion = %suggestion.id,
            script = %suggestion.script_id,
            author = %suggestion.author_id,
            ops = suggestion.diff_operations.ops().len(),
            "suggestion submitted"
        );
        Ok(suggestion)
    }

    /// Loads a suggestion that is about to move to `target`; it must still be pending.
    async fn load_pending(
        &self,
        suggestion_id: Uuid,
        target: SuggestionStatus,
    ) -> Result<Suggestion, SuggestionError> {
        let suggestion = self
            .store
            .load_suggestion(suggestion_id)
            .await?
            .ok_or(SuggestionError::NotFound(suggestion_id))?;

        if !suggestion.status.can_transition_to(target) {
            warn!(
                suggestion = %suggestion_id,
                from = suggestion.status.as_str(),
                to = target.as_str(),
                "invalid suggestion transition"
            );
            return Err(SuggestionError::InvalidTransition {
                id: suggestion_id,
                from: suggestion.status,
                to: target,
            });
        }
        Ok(suggestion)
    }

    async fn approve_locked(
        &self,
        mut suggestion: Suggestion,
        base: &Delta,
    ) -> Result<ApprovalOutcome, SuggestionError> {
        let document = base.try_compose(&suggestion.diff_operations).inspect_err(|err| {
            warn!(suggestion = %suggestion.id, error = %err, "suggestion does not apply");
        })?;

        let snapshot = self
            .store
            .commit_approval(suggestion.id, suggestion.script_id, &document)
            .await
            .map_err(|err| transition_error(err, SuggestionStatus::Approved))?;
        self.discard_draft(suggestion.script_id, &suggestion.author_id).await;

        info!(
            suggestion = %suggestion.id,
            script = %suggestion.script_id,
            author = %suggestion.author_id,
            hash = %snapshot.content_hash,
            "suggestion approved"
        );
        suggestion.status = SuggestionStatus::Approved;
        suggestion.updated_at = Utc::now();
        Ok(ApprovalOutcome { suggestion, document, snapshot })
    }

    /// Draft cleanup after a committed change; failure is logged, not returned.
    async fn discard_draft(&self, script_id: Uuid, author_id: &str) {
        if let Err(err) = self.store.delete_draft(script_id, author_id).await {
            warn!(script = %script_id, author = %author_id, error = %err, "failed to delete draft");
        }
    }
}

/// A suggestion that left `pending` after `load_pending` looked at it.
fn transition_error(err: StoreError, to: SuggestionStatus) -> SuggestionError {
    match err {
        StoreError::NotPending { id, status } => {
            SuggestionError::InvalidTransition { id, from: status, to }
        }
        err => SuggestionError::Store(err),
    }
}

fn require_admin(actor: &Actor, action: &'static str) -> Result<(), SuggestionError> {
    if actor.is_admin() {
        return Ok(());
    }
    warn!(user = %actor.user_id, action, "admin role required");
    Err(SuggestionError::Forbidden { user_id: actor.user_id.clone(), action })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::store::MemoryStore;

    fn doc(text: &str) -> Delta {
        Delta::new().insert(text, None)
    }

    async fn service_with(text: &str) -> (SuggestionService<MemoryStore>, Arc<MemoryStore>, Uuid) {
        let store = Arc::new(MemoryStore::new());
        let script = Uuid::new_v4();
        store.save_canonical_document(script, &doc(text)).await.unwrap();
        (SuggestionService::new(Arc::clone(&store)), store, script)
    }

    async fn submitted(
        service: &SuggestionService<MemoryStore>,
        script: Uuid,
        author: &str,
        edited: &str,
    ) -> Suggestion {
        match service
            .submit_edit(script, &Actor::contributor(author), &json!(edited))
            .await
            .unwrap()
        {
            SubmitOutcome::Submitted(suggestion) => suggestion,
            SubmitOutcome::NoChanges => panic!("expected a suggestion"),
        }
    }

    #[tokio::test]
    async fn approve_composes_and_snapshots() {
        let (service, store, script) = service_with("Hello\nWorld\n").await;
        let suggestion = submitted(&service, script, "ada", "Hello\nWorld!\n").await;
        assert_eq!(suggestion.status, SuggestionStatus::Pending);

        let outcome = service.approve(&Actor::admin("root"), suggestion.id).await.unwrap();
        assert_eq!(outcome.document.line_texts(), vec!["Hello", "World!"]);
        assert_eq!(outcome.suggestion.status, SuggestionStatus::Approved);
        assert_eq!(
            store.load_canonical_document(script).await.unwrap(),
            Some(outcome.document.clone())
        );
        assert_eq!(service.history(script).await.unwrap().len(), 1);
        assert!(service.list_pending(script).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn submission_removes_the_authors_draft() {
        let (service, store, script) = service_with("Hello\n").await;
        store.save_draft(script, "ada", &doc("Hello there\n")).await.unwrap();

        submitted(&service, script, "ada", "Hello there\n").await;
        assert!(store.load_draft(script, "ada").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unchanged_edit_persists_nothing() {
        let (service, store, script) = service_with("Same\n").await;
        let outcome =
            service.submit_edit(script, &Actor::contributor("ada"), &json!("Same")).await.unwrap();
        assert_eq!(outcome, SubmitOutcome::NoChanges);
        assert_eq!(store.call_count("insert_suggestion").await, 0);
    }

    #[tokio::test]
    async fn contributors_cannot_approve_or_save_directly() {
        let (service, store, script) = service_with("Hello\n").await;
        let suggestion = submitted(&service, script, "ada", "Hello!\n").await;

        let err = service.approve(&Actor::contributor("ada"), suggestion.id).await.unwrap_err();
        assert!(matches!(err, SuggestionError::Forbidden { .. }));
        let err = service
            .save_direct(&Actor::contributor("ada"), script, &doc("mine\n"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, SuggestionError::Forbidden { .. }));
        assert_eq!(store.call_count("save_canonical_document").await, 1);
    }

    #[tokio::test]
    async fn blank_rejection_reason_makes_no_store_calls() {
        let (service, store, script) = service_with("Hello\n").await;
        let suggestion = submitted(&service, script, "ada", "Hello!\n").await;
        let before = store.calls().await.len();

        let err = service.reject(&Actor::admin("root"), suggestion.id, "   ").await.unwrap_err();
        assert!(matches!(err, SuggestionError::Validation(_)));
        assert_eq!(store.calls().await.len(), before);
    }

    #[tokio::test]
    async fn reject_records_reason_and_is_final() {
        let (service, _store, script) = service_with("Hello\n").await;
        let suggestion = submitted(&service, script, "ada", "Hello!\n").await;
        let admin = Actor::admin("root");

        let rejected = service.reject(&admin, suggestion.id, "  not in voice ").await.unwrap();
        assert_eq!(rejected.rejection_reason.as_deref(), Some("not in voice"));

        let err = service.approve(&admin, suggestion.id).await.unwrap_err();
        assert!(matches!(
            err,
            SuggestionError::InvalidTransition { from: SuggestionStatus::Rejected, .. }
        ));
    }

    #[tokio::test]
    async fn stale_patch_fails_without_touching_the_document() {
        let (service, store, script) = service_with("Hello\nWorld\n").await;
        let suggestion = submitted(&service, script, "ada", "Hello\nWorld, again\n").await;
        let admin = Actor::admin("root");

        let err = service
            .approve_with_base(&admin, suggestion.id, &doc("Hi\n"))
            .await
            .unwrap_err();
        assert!(matches!(err, SuggestionError::PreconditionViolation(_)));
        assert_eq!(store.call_count("save_canonical_document").await, 1);
        let reloaded = store.load_suggestion(suggestion.id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, SuggestionStatus::Pending);
    }

    #[tokio::test]
    async fn store_failure_surfaces_and_leaves_suggestion_pending() {
        let (service, store, script) = service_with("Hello\n").await;
        let suggestion = submitted(&service, script, "ada", "Hello!\n").await;
        store.fail_on("commit_approval").await;

        let err = service.approve(&Actor::admin("root"), suggestion.id).await.unwrap_err();
        assert!(matches!(err, SuggestionError::Store(_)));
        let reloaded = store.load_suggestion(suggestion.id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, SuggestionStatus::Pending);

        store.clear_failures().await;
        service.approve(&Actor::admin("root"), suggestion.id).await.unwrap();
    }

    #[tokio::test]
    async fn retry_after_failed_commit_composes_the_patch_once() {
        let (service, store, script) = service_with("Hello\n").await;
        let suggestion = submitted(&service, script, "ada", "Hello!\n").await;
        let admin = Actor::admin("root");
        store.fail_on("commit_approval").await;

        assert!(service.approve(&admin, suggestion.id).await.is_err());
        assert_eq!(
            store.load_canonical_document(script).await.unwrap().unwrap().plain_text(),
            "Hello\n"
        );
        assert!(service.history(script).await.unwrap().is_empty());

        store.clear_failures().await;
        let outcome = service.approve(&admin, suggestion.id).await.unwrap();
        assert_eq!(outcome.document.plain_text(), "Hello!\n");
        assert_eq!(
            store.load_canonical_document(script).await.unwrap().unwrap().plain_text(),
            "Hello!\n"
        );
        assert_eq!(service.history(script).await.unwrap().len(), 1);

        let err = service.approve(&admin, suggestion.id).await.unwrap_err();
        assert!(matches!(
            err,
            SuggestionError::InvalidTransition { from: SuggestionStatus::Approved, .. }
        ));
    }

    #[tokio::test]
    async fn status_change_racing_past_the_pending_check_is_a_transition_error() {
        let (service, store, script) = service_with("Hello\n").await;
        let suggestion = submitted(&service, script, "ada", "Hello!\n").await;
        let pending = service.load_pending(suggestion.id, SuggestionStatus::Approved).await.unwrap();
        store
            .update_suggestion_status(suggestion.id, SuggestionStatus::Rejected, Some("late"))
            .await
            .unwrap();

        let err = service.approve_locked(pending, &doc("Hello\n")).await.unwrap_err();
        assert!(matches!(
            err,
            SuggestionError::InvalidTransition { from: SuggestionStatus::Rejected, .. }
        ));
        assert_eq!(
            store.load_canonical_document(script).await.unwrap().unwrap().plain_text(),
            "Hello\n"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_approvals_of_one_suggestion_compose_once() {
        let (service, store, script) = service_with("Hello\n").await;
        let suggestion = submitted(&service, script, "ada", "Hello!\n").await;
        store.set_latency(Some(Duration::from_millis(50))).await;
        let admin = Actor::admin("root");

        let (first, second) = tokio::join!(
            service.approve(&admin, suggestion.id),
            service.approve(&admin, suggestion.id)
        );
        assert!(first.is_ok());
        assert!(matches!(second, Err(SuggestionError::InFlight(id)) if id == suggestion.id));
        assert_eq!(
            store.load_canonical_document(script).await.unwrap().unwrap().plain_text(),
            "Hello!\n"
        );
    }

    #[tokio::test]
    async fn draft_cleanup_failure_does_not_fail_approval() {
        let (service, store, script) = service_with("Hello\n").await;
        let suggestion = submitted(&service, script, "ada", "Hello!\n").await;
        store.fail_on("delete_draft").await;

        let outcome = service.approve(&Actor::admin("root"), suggestion.id).await.unwrap();
        assert_eq!(outcome.suggestion.status, SuggestionStatus::Approved);
    }

    #[tokio::test]
    async fn authors_cannot_submit_for_someone_else() {
        let (service, _store, script) = service_with("Hello\n").await;
        let BuildOutcome::Changes(draft) =
            build_suggestion(script, &doc("Hello\n"), &doc("Hello?\n"), "bob").unwrap()
        else {
            panic!("expected changes");
        };
        let err = service.submit(&Actor::contributor("ada"), draft).await.unwrap_err();
        assert!(matches!(err, SuggestionError::Forbidden { .. }));
    }

    #[tokio::test]
    async fn missing_script_diffs_against_the_empty_document() {
        let store = Arc::new(MemoryStore::new());
        let service = SuggestionService::new(Arc::clone(&store));
        let script = Uuid::new_v4();

        let suggestion = submitted(&service, script, "ada", "FADE IN:\n").await;
        assert_eq!(suggestion.diff_operations, Delta::new().insert("FADE IN:", None));

        let outcome = service.approve(&Actor::admin("root"), suggestion.id).await.unwrap();
        assert_eq!(outcome.document, doc("FADE IN:\n"));
    }
}
