// Draft persistence: per-author working copies of a script.
//
// Loads are cancellable: a newer load, save or delete for the same
// (script, author) key cancels the load in flight, and a cancelled load's
// result is dropped even if the store already answered. Saves are guarded:
// while one save for a key is running, a second reports `AlreadyInFlight`
// without reaching the store.

pub mod debounce;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use scriptdesk_common::delta::Delta;
use scriptdesk_common::types::Draft;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::guard::KeyedGuard;
use crate::store::{PersistenceAdapter, StoreError};

pub use debounce::{AutosaveConfig, AutosaveDebouncer, DraftKey, ReadySnapshot};

#[derive(Debug, Error)]
pub enum DraftError {
    #[error("draft content must be a full document")]
    NotADocument,
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum DraftLoad {
    Loaded(Option<Draft>),
    /// Superseded by a newer request for the same key; result discarded.
    Cancelled,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SaveOutcome {
    Saved(Draft),
    AlreadyInFlight,
}

/// Result of flushing debounced snapshots.
#[derive(Debug, Default)]
pub struct FlushReport {
    pub saved: Vec<Draft>,
    /// Snapshots put back because a save for their key was still running.
    pub deferred: usize,
    pub failed: Vec<(DraftKey, DraftError)>,
}

struct InFlightLoad {
    generation: u64,
    cancel: watch::Sender<bool>,
}

#[derive(Default)]
struct LoadRegistry {
    next_generation: u64,
    active: HashMap<DraftKey, InFlightLoad>,
}

pub struct DraftSync<P> {
    store: Arc<P>,
    saves: KeyedGuard<DraftKey>,
    loads: Mutex<LoadRegistry>,
}

impl<P: PersistenceAdapter> DraftSync<P> {
    pub fn new(store: Arc<P>) -> Self {
        Self { store, saves: KeyedGuard::new(), loads: Mutex::new(LoadRegistry::default()) }
    }

    pub async fn load(&self, script_id: Uuid, author_id: &str) -> Result<DraftLoad, DraftError> {
        let key = DraftKey::new(script_id, author_id);
        let (generation, mut cancelled) = self.begin_load(&key);

        let result = tokio::select! {
            biased;
            _ = cancelled.wait_for(|cancelled| *cancelled) => None,
            result = self.store.load_draft(script_id, author_id) => Some(result),
        };
        self.finish_load(&key, generation);

        let superseded = *cancelled.borrow();
        match result {
            Some(result) if !superseded => Ok(DraftLoad::Loaded(result?)),
            _ => {
                debug!(script = %script_id, author = %author_id, "draft load cancelled");
                Ok(DraftLoad::Cancelled)
            }
        }
    }

    /// Upserts the draft unless a save for the same key is already running.
    pub async fn save(
        &self,
        script_id: Uuid,
        author_id: &str,
        content: &Delta,
    ) -> Result<SaveOutcome, DraftError> {
        if !content.is_document() {
            return Err(DraftError::NotADocument);
        }
        let key = DraftKey::new(script_id, author_id);
        let Some(_token) = self.saves.try_acquire(key.clone()) else {
            debug!(script = %script_id, author = %author_id, "draft save already in flight");
            return Ok(SaveOutcome::AlreadyInFlight);
        };
        self.cancel_load(&key);

        let draft = self.store.save_draft(script_id, author_id, content).await?;
        debug!(script = %script_id, author = %author_id, "draft saved");
        Ok(SaveOutcome::Saved(draft))
    }

    pub async fn delete(&self, script_id: Uuid, author_id: &str) -> Result<bool, DraftError> {
        self.cancel_load(&DraftKey::new(script_id, author_id));
        Ok(self.store.delete_draft(script_id, author_id).await?)
    }

    /// Saves every debounced snapshot whose window has elapsed.
    pub async fn flush_ready(&self, debouncer: &mut AutosaveDebouncer) -> FlushReport {
        let ready = debouncer.drain_ready();
        self.flush_snapshots(ready, debouncer).await
    }

    async fn flush_snapshots(
        &self,
        ready: Vec<ReadySnapshot>,
        debouncer: &mut AutosaveDebouncer,
    ) -> FlushReport {
        let mut report = FlushReport::default();
        for snapshot in ready {
            let key = &snapshot.key;
            let result = self.save(key.script_id, &key.author_id, &snapshot.content).await;
            match result {
                Ok(SaveOutcome::Saved(draft)) => report.saved.push(draft),
                Ok(SaveOutcome::AlreadyInFlight) => {
                    report.deferred += 1;
                    debouncer.push(snapshot.key, snapshot.content);
                }
                Err(err) => report.failed.push((snapshot.key, err)),
            }
        }
        report
    }

    // ── Load registry ──────────────────────────────────────────────

    fn registry(&self) -> std::sync::MutexGuard<'_, LoadRegistry> {
        self.loads.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn begin_load(&self, key: &DraftKey) -> (u64, watch::Receiver<bool>) {
        let (cancel, cancelled) = watch::channel(false);
        let mut registry = self.registry();
        let generation = registry.next_generation;
        registry.next_generation += 1;
        let load = InFlightLoad { generation, cancel };
        if let Some(previous) = registry.active.insert(key.clone(), load) {
            let _ = previous.cancel.send(true);
            debug!(script = %key.script_id, author = %key.author_id, "superseded draft load");
        }
        (generation, cancelled)
    }

    fn cancel_load(&self, key: &DraftKey) {
        if let Some(previous) = self.registry().active.remove(key) {
            let _ = previous.cancel.send(true);
        }
    }

    fn finish_load(&self, key: &DraftKey, generation: u64) {
        let mut registry = self.registry();
        if registry.active.get(key).is_some_and(|load| load.generation == generation) {
            registry.active.remove(key);
        }
    }
}

// ── Autosave loop ──────────────────────────────────────────────────

/// Latest content of a draft, as sent by an editor on every change.
#[derive(Debug, Clone)]
pub struct DraftEdit {
    pub key: DraftKey,
    pub content: Delta,
}

/// Debounces incoming edits and saves each draft once it has been quiet
/// for the configured window. On shutdown, or when every sender is gone,
/// pending snapshots are saved immediately.
pub async fn run_autosave<P: PersistenceAdapter>(
    sync: Arc<DraftSync<P>>,
    mut edits: mpsc::Receiver<DraftEdit>,
    config: AutosaveConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut debouncer = AutosaveDebouncer::new(config);
    info!("draft autosave started");

    loop {
        let deadline = debouncer.next_deadline();
        tokio::select! {
            biased;

            _ = shutdown.changed() => {
                info!("draft autosave shutting down");
                break;
            }

            maybe_edit = edits.recv() => match maybe_edit {
                Some(edit) => debouncer.push_at(edit.key, edit.content, clock_now()),
                None => {
                    debug!("draft edit channel closed, autosave exiting");
                    break;
                }
            },

            _ = sleep_until(deadline) => {}
        }

        let ready = debouncer.drain_ready_at(clock_now());
        if !ready.is_empty() {
            log_flush(&sync.flush_snapshots(ready, &mut debouncer).await);
        }
    }

    let remaining = debouncer.drain_all();
    if !remaining.is_empty() {
        log_flush(&sync.flush_snapshots(remaining, &mut debouncer).await);
    }
}

/// Reads tokio's clock so paused-time tests drive the debouncer too.
fn clock_now() -> Instant {
    tokio::time::Instant::now().into_std()
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline.into()).await,
        None => std::future::pending().await,
    }
}

fn log_flush(report: &FlushReport) {
    if !report.saved.is_empty() || report.deferred > 0 {
        debug!(saved = report.saved.len(), deferred = report.deferred, "autosave flush");
    }
    for (key, err) in &report.failed {
        warn!(script = %key.script_id, author = %key.author_id, error = %err, "autosave failed");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::store::MemoryStore;

    fn doc(text: &str) -> Delta {
        Delta::new().insert(text, None)
    }

    fn sync_over(store: &Arc<MemoryStore>) -> DraftSync<MemoryStore> {
        DraftSync::new(Arc::clone(store))
    }

    #[tokio::test]
    async fn save_then_load_returns_the_draft() {
        let store = Arc::new(MemoryStore::new());
        let sync = sync_over(&store);
        let script = Uuid::new_v4();

        assert_eq!(sync.load(script, "ada").await.unwrap(), DraftLoad::Loaded(None));
        let SaveOutcome::Saved(saved) = sync.save(script, "ada", &doc("Beat.\n")).await.unwrap()
        else {
            panic!("expected a save");
        };
        assert_eq!(sync.load(script, "ada").await.unwrap(), DraftLoad::Loaded(Some(saved)));

        assert!(sync.delete(script, "ada").await.unwrap());
        assert_eq!(sync.load(script, "ada").await.unwrap(), DraftLoad::Loaded(None));
    }

    #[tokio::test]
    async fn patches_are_not_saved_as_drafts() {
        let store = Arc::new(MemoryStore::new());
        let err = sync_over(&store)
            .save(Uuid::nil(), "ada", &Delta::new().retain(2, None))
            .await
            .unwrap_err();
        assert!(matches!(err, DraftError::NotADocument));
        assert!(store.calls().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn newer_load_cancels_the_one_in_flight() {
        let store = Arc::new(MemoryStore::new());
        let sync = sync_over(&store);
        let script = Uuid::new_v4();
        store.save_draft(script, "ada", &doc("latest\n")).await.unwrap();
        store.set_latency(Some(Duration::from_millis(100))).await;

        let (first, second) = tokio::join!(sync.load(script, "ada"), sync.load(script, "ada"));
        assert_eq!(first.unwrap(), DraftLoad::Cancelled);
        assert!(matches!(second.unwrap(), DraftLoad::Loaded(Some(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn save_cancels_a_pending_load() {
        let store = Arc::new(MemoryStore::new());
        let sync = sync_over(&store);
        let script = Uuid::new_v4();
        store.set_latency(Some(Duration::from_millis(100))).await;

        let content = doc("new\n");
        let (load, save) =
            tokio::join!(sync.load(script, "ada"), sync.save(script, "ada", &content));
        assert_eq!(load.unwrap(), DraftLoad::Cancelled);
        assert!(matches!(save.unwrap(), SaveOutcome::Saved(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn loads_for_other_authors_are_independent() {
        let store = Arc::new(MemoryStore::new());
        let sync = sync_over(&store);
        store.set_latency(Some(Duration::from_millis(100))).await;

        let (ada, bob) = tokio::join!(sync.load(Uuid::nil(), "ada"), sync.load(Uuid::nil(), "bob"));
        assert_eq!(ada.unwrap(), DraftLoad::Loaded(None));
        assert_eq!(bob.unwrap(), DraftLoad::Loaded(None));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_save_reports_in_flight_without_calling_the_store() {
        let store = Arc::new(MemoryStore::new());
        let sync = sync_over(&store);
        store.set_latency(Some(Duration::from_millis(100))).await;

        let (one, two) = (doc("one\n"), doc("two\n"));
        let (first, second) = tokio::join!(
            sync.save(Uuid::nil(), "ada", &one),
            sync.save(Uuid::nil(), "ada", &two)
        );
        assert!(matches!(first.unwrap(), SaveOutcome::Saved(_)));
        assert_eq!(second.unwrap(), SaveOutcome::AlreadyInFlight);
        assert_eq!(store.call_count("save_draft").await, 1);
    }

    #[tokio::test]
    async fn flush_ready_saves_due_snapshots_and_reports_failures() {
        let store = Arc::new(MemoryStore::new());
        let sync = sync_over(&store);
        let mut debouncer = AutosaveDebouncer::new(AutosaveConfig::default());
        let long_ago = Instant::now() - Duration::from_secs(10);

        debouncer.push_at(DraftKey::new(Uuid::nil(), "ada"), doc("due\n"), long_ago);
        debouncer.push(DraftKey::new(Uuid::nil(), "bob"), doc("not yet\n"));

        let report = sync.flush_ready(&mut debouncer).await;
        assert_eq!(report.saved.len(), 1);
        assert_eq!(report.saved[0].author_id, "ada");
        assert_eq!(debouncer.pending_count(), 1);

        store.fail_on("save_draft").await;
        debouncer.push_at(DraftKey::new(Uuid::nil(), "ada"), doc("again\n"), long_ago);
        let report = sync.flush_ready(&mut debouncer).await;
        assert_eq!(report.failed.len(), 1);
        assert!(matches!(report.failed[0].1, DraftError::Store(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn autosave_loop_saves_the_last_edit_once() {
        let store = Arc::new(MemoryStore::new());
        let sync = Arc::new(sync_over(&store));
        let (edits_tx, edits_rx) = mpsc::channel(16);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run_autosave(
            Arc::clone(&sync),
            edits_rx,
            AutosaveConfig::default(),
            shutdown_rx,
        ));

        let key = DraftKey::new(Uuid::nil(), "ada");
        for text in ["I\n", "IN\n", "INT.\n"] {
            edits_tx.send(DraftEdit { key: key.clone(), content: doc(text) }).await.unwrap();
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        tokio::time::sleep(Duration::from_millis(1_500)).await;

        assert_eq!(store.call_count("save_draft").await, 1);
        let draft = store.load_draft(Uuid::nil(), "ada").await.unwrap().expect("autosaved");
        assert_eq!(draft.content, doc("INT.\n"));

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn autosave_flushes_pending_edits_on_shutdown() {
        let store = Arc::new(MemoryStore::new());
        let sync = Arc::new(sync_over(&store));
        let (edits_tx, edits_rx) = mpsc::channel(16);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run_autosave(
            sync,
            edits_rx,
            AutosaveConfig::with_millis(5_000),
            shutdown_rx,
        ));

        let key = DraftKey::new(Uuid::nil(), "bob");
        edits_tx.send(DraftEdit { key, content: doc("EXT. ROOF\n") }).await.unwrap();
        tokio::task::yield_now().await;
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();

        let draft = store.load_draft(Uuid::nil(), "bob").await.unwrap().expect("flushed");
        assert_eq!(draft.content, doc("EXT. ROOF\n"));
    }
}
