// Autosave debouncer for drafts.
//
// Coalesces rapid edits of the same (script, author) pair within a
// configurable window (default 1s, range 250ms–5s). The latest snapshot wins.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use scriptdesk_common::delta::Delta;
use uuid::Uuid;

const DEFAULT_AUTOSAVE_MS: u64 = 1_000;
const MIN_AUTOSAVE_MS: u64 = 250;
const MAX_AUTOSAVE_MS: u64 = 5_000;

#[derive(Debug, Clone)]
pub struct AutosaveConfig {
    pub window: Duration,
}

impl Default for AutosaveConfig {
    fn default() -> Self {
        Self { window: Duration::from_millis(DEFAULT_AUTOSAVE_MS) }
    }
}

impl AutosaveConfig {
    /// Create a config with the given window in milliseconds, clamped to [250, 5000].
    pub fn with_millis(ms: u64) -> Self {
        let clamped = ms.clamp(MIN_AUTOSAVE_MS, MAX_AUTOSAVE_MS);
        Self { window: Duration::from_millis(clamped) }
    }
}

/// One draft per author per script.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DraftKey {
    pub script_id: Uuid,
    pub author_id: String,
}

impl DraftKey {
    pub fn new(script_id: Uuid, author_id: impl Into<String>) -> Self {
        Self { script_id, author_id: author_id.into() }
    }
}

/// A snapshot whose quiet period has elapsed.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadySnapshot {
    pub key: DraftKey,
    pub content: Delta,
}

struct PendingSnapshot {
    content: Delta,
    last_seen: Instant,
}

/// Holds the newest unsaved snapshot per draft key until it has been quiet
/// for a full window.
///
/// Call `push()` on every edit, then `drain_ready()` periodically to collect
/// snapshots that are due for saving.
pub struct AutosaveDebouncer {
    config: AutosaveConfig,
    pending: HashMap<DraftKey, PendingSnapshot>,
}

impl AutosaveDebouncer {
    pub fn new(config: AutosaveConfig) -> Self {
        Self { config, pending: HashMap::new() }
    }

    /// Record the latest content for `key`. Replaces any pending snapshot
    /// and restarts its timer.
    pub fn push(&mut self, key: DraftKey, content: Delta) {
        self.push_at(key, content, Instant::now());
    }

    pub(crate) fn push_at(&mut self, key: DraftKey, content: Delta, now: Instant) {
        self.pending.insert(key, PendingSnapshot { content, last_seen: now });
    }

    /// Drops the pending snapshot for `key`, e.g. after a submission made it moot.
    pub fn cancel(&mut self, key: &DraftKey) -> bool {
        self.pending.remove(key).is_some()
    }

    pub fn drain_ready(&mut self) -> Vec<ReadySnapshot> {
        self.drain_ready_at(Instant::now())
    }

    pub(crate) fn drain_ready_at(&mut self, now: Instant) -> Vec<ReadySnapshot> {
        let window = self.config.window;
        let mut ready = Vec::new();

        self.pending.retain(|key, pending| {
            if now.duration_since(pending.last_seen) >= window {
                ready.push(ReadySnapshot {
                    key: key.clone(),
                    content: std::mem::take(&mut pending.content),
                });
                false
            } else {
                true
            }
        });

        ready
    }

    /// Every pending snapshot regardless of its timer, e.g. on shutdown.
    pub fn drain_all(&mut self) -> Vec<ReadySnapshot> {
        self.pending
            .drain()
            .map(|(key, pending)| ReadySnapshot { key, content: pending.content })
            .collect()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// When the next pending snapshot becomes ready, or None if empty.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|p| p.last_seen + self.config.window).min()
    }
}
