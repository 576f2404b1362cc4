// Per-session line identity tracker.
//
// Lifecycle: not-ready -> initializing -> ready. The first content change
// moves the tracker to initializing; it becomes ready once the observed
// line count matches the surface's. Until then identifier writes are
// deferred (ignored) so layout churn cannot corrupt the mapping.

use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use scriptdesk_common::delta::{Delta, DeltaError};
use scriptdesk_common::types::LineData;
use serde::Serialize;
use tracing::debug;

use super::reconcile::{reconcile_lines, MatchOptions, Reconciliation};
use super::surface::{DocumentSurface, LineSurface};
use super::LineObservation;

/// Entries kept per identifier in the change history.
const HISTORY_LIMIT: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackerState {
    NotReady,
    Initializing,
    Ready,
}

impl TrackerState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotReady => "not-ready",
            Self::Initializing => "initializing",
            Self::Ready => "ready",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineRecord {
    pub line_index: usize,
    pub identifier: Option<String>,
    pub content: String,
    pub last_observed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub identifier: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    sequence: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LineCountChange {
    pub previous: usize,
    pub current: usize,
}

/// What a content-change event did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChangeReport {
    pub state: TrackerState,
    /// The surface was still laying out; nothing was re-synced.
    pub deferred: bool,
    /// Lines whose dropped identifier was restored from their content.
    pub recovered: usize,
    pub line_count_change: Option<LineCountChange>,
}

/// Result of [`LineTracker::apply_edit`].
#[derive(Debug, Clone, PartialEq)]
pub struct EditOutcome {
    pub report: ChangeReport,
    pub reconciliation: Option<Reconciliation>,
}

pub struct LineTracker<S> {
    surface: S,
    state: TrackerState,
    records: Vec<LineRecord>,
    /// Line data from the last reconciliation; the "previous" side of the next one.
    baseline: Vec<LineData>,
    history: HashMap<String, Vec<HistoryEntry>>,
    last_line_count: usize,
    sequence: u64,
    options: MatchOptions,
}

impl<S: LineSurface> LineTracker<S> {
    pub fn new(surface: S) -> Self {
        Self::with_options(surface, MatchOptions::default())
    }

    pub fn with_options(surface: S, options: MatchOptions) -> Self {
        Self {
            surface,
            state: TrackerState::NotReady,
            records: Vec::new(),
            baseline: Vec::new(),
            history: HashMap::new(),
            last_line_count: 0,
            sequence: 0,
            options,
        }
    }

    pub fn state(&self) -> TrackerState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == TrackerState::Ready
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn into_surface(self) -> S {
        self.surface
    }

    pub fn records(&self) -> &[LineRecord] {
        &self.records
    }

    /// Line data as of the last reconciliation.
    pub fn line_data(&self) -> &[LineData] {
        &self.baseline
    }

    /// Change history of `identifier`, oldest first.
    pub fn history(&self, identifier: &str) -> &[HistoryEntry] {
        self.history.get(identifier).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Reads identifiers already present on `lines` (or the surface) and maps
    /// them 1:1 by position. Lines without one stay unassigned.
    pub fn initialize(&mut self, lines: &[LineObservation]) -> TrackerState {
        if self.state == TrackerState::NotReady {
            self.state = TrackerState::Initializing;
        }
        self.adopt(lines);
        if self.state == TrackerState::Initializing && lines.len() == self.surface.line_count() {
            self.become_ready(lines.len());
        }
        self.state
    }

    pub fn on_content_changed(&mut self, lines: &[LineObservation]) -> ChangeReport {
        if self.state == TrackerState::NotReady {
            self.state = TrackerState::Initializing;
        }

        let surface_lines = self.surface.line_count();
        if lines.len() != surface_lines {
            debug!(
                observed = lines.len(),
                surface = surface_lines,
                "deferring line sync until the surface settles"
            );
            return ChangeReport {
                state: self.state,
                deferred: true,
                recovered: 0,
                line_count_change: None,
            };
        }

        if self.state == TrackerState::Initializing {
            self.adopt(lines);
            self.become_ready(lines.len());
            return ChangeReport {
                state: self.state,
                deferred: false,
                recovered: 0,
                line_count_change: None,
            };
        }

        let recovered = self.resync(lines);
        let line_count_change = self.detect_line_count_change();
        ChangeReport { state: self.state, deferred: false, recovered, line_count_change }
    }

    pub fn get_identifier(&self, line_index: usize) -> Option<&str> {
        self.records.get(line_index)?.identifier.as_deref()
    }

    /// Assigns `identifier` to a line, writing it to the surface and the
    /// history. Returns false (and does nothing) while not ready.
    pub fn set_identifier(&mut self, line_index: usize, identifier: &str) -> bool {
        if !self.is_ready() {
            debug!(line_index, state = self.state.as_str(), "identifier assignment deferred");
            return false;
        }
        if line_index >= self.records.len() {
            return false;
        }

        let previous = self.records[line_index].identifier.clone();
        self.write_identifier(line_index, identifier);

        // Baseline positions are only refreshed by `reconcile`, so the line
        // is found by the identifier it carried, never by its index.
        if previous.as_deref() != Some(identifier) {
            self.baseline.retain(|line| line.identifier != identifier);
        }
        let existing = previous.as_deref().and_then(|previous| {
            self.baseline.iter_mut().find(|line| line.identifier == previous)
        });
        match existing {
            Some(line) => line.identifier = identifier.to_owned(),
            None => {
                self.baseline.push(LineData {
                    identifier: identifier.to_owned(),
                    line_number: line_index + 1,
                    content: self.records[line_index].content.clone(),
                    author: None,
                    edited_by: Vec::new(),
                });
                self.baseline.sort_by_key(|line| line.line_number);
            }
        }
        true
    }

    /// Compares the surface's line count with the last known one.
    pub fn detect_line_count_change(&mut self) -> Option<LineCountChange> {
        let current = self.surface.line_count();
        if current == self.last_line_count {
            return None;
        }
        let change = LineCountChange { previous: self.last_line_count, current };
        debug!(previous = change.previous, current = change.current, "line count changed");
        self.last_line_count = current;
        Some(change)
    }

    /// Re-derives identifiers for the current lines and writes changed ones
    /// back to the surface. `None` while not ready.
    pub fn reconcile(&mut self, user_id: Option<&str>) -> Option<Reconciliation> {
        if !self.is_ready() {
            debug!(state = self.state.as_str(), "reconciliation deferred");
            return None;
        }

        let observations: Vec<LineObservation> = self
            .records
            .iter()
            .map(|record| LineObservation {
                content: record.content.clone(),
                identifier: record.identifier.clone(),
            })
            .collect();
        let result = reconcile_lines(&self.baseline, &observations, user_id, self.options);

        for (index, line) in result.lines.iter().enumerate() {
            if self.records[index].identifier.as_deref() != Some(line.identifier.as_str()) {
                self.write_identifier(index, &line.identifier);
            }
        }
        self.baseline = result.lines.clone();
        Some(result)
    }

    /// Forgets everything, including history.
    pub fn reset(&mut self) {
        self.state = TrackerState::NotReady;
        self.records.clear();
        self.baseline.clear();
        self.history.clear();
        self.last_line_count = 0;
        self.sequence = 0;
    }

    // ── Internals ──────────────────────────────────────────────────

    fn become_ready(&mut self, line_count: usize) {
        self.state = TrackerState::Ready;
        self.last_line_count = line_count;
        debug!(lines = line_count, "line tracker ready");
    }

    fn observed_identifier(&self, index: usize, line: &LineObservation) -> Option<String> {
        line.identifier.clone().or_else(|| self.surface.line_tag(index))
    }

    /// Takes identifiers as observed; a repeated identifier only stays on its
    /// first line.
    fn adopt(&mut self, lines: &[LineObservation]) {
        let now = Utc::now();
        let mut seen = HashSet::new();
        let mut records = Vec::with_capacity(lines.len());
        for (index, line) in lines.iter().enumerate() {
            let identifier = self.observed_identifier(index, line).filter(|identifier| {
                let first = seen.insert(identifier.clone());
                if !first {
                    debug!(line_index = index, identifier = %identifier, "duplicate line identifier ignored");
                }
                first
            });
            records.push(LineRecord {
                line_index: index,
                identifier,
                content: line.content.clone(),
                last_observed_at: now,
            });
        }

        self.baseline = records
            .iter()
            .filter_map(|record| {
                Some(LineData {
                    identifier: record.identifier.clone()?,
                    line_number: record.line_index + 1,
                    content: record.content.clone(),
                    author: None,
                    edited_by: Vec::new(),
                })
            })
            .collect();
        self.records = records;
    }

    /// Maps positions to identifiers again, restoring identifiers that the
    /// surface dropped from lines whose content merely moved.
    fn resync(&mut self, lines: &[LineObservation]) -> usize {
        let previous_content: HashMap<String, String> = self
            .records
            .iter()
            .filter_map(|record| Some((record.identifier.clone()?, record.content.clone())))
            .collect();
        let mut previous_by_content: HashMap<&str, Vec<(usize, String)>> = HashMap::new();
        for record in &self.records {
            if let (Some(identifier), false) = (&record.identifier, record.content.is_empty()) {
                previous_by_content
                    .entry(record.content.as_str())
                    .or_default()
                    .push((record.line_index, identifier.clone()));
            }
        }

        let mut claimed = HashSet::new();
        let mut identifiers: Vec<Option<String>> = lines
            .iter()
            .enumerate()
            .map(|(index, line)| {
                self.observed_identifier(index, line)
                    .filter(|identifier| claimed.insert(identifier.clone()))
            })
            .collect();

        let mut restored = Vec::new();
        for (index, line) in lines.iter().enumerate() {
            if identifiers[index].is_some() || line.content.is_empty() {
                continue;
            }
            let Some(candidates) = previous_by_content.get(line.content.as_str()) else {
                continue;
            };
            let chosen = candidates
                .iter()
                .filter(|(_, identifier)| !claimed.contains(identifier))
                .max_by_key(|(position, identifier)| {
                    (self.latest_sequence(identifier, &line.content), Reverse(*position))
                })
                .map(|(_, identifier)| identifier.clone());
            if let Some(identifier) = chosen {
                claimed.insert(identifier.clone());
                identifiers[index] = Some(identifier.clone());
                restored.push((index, identifier));
            }
        }

        let now = Utc::now();
        self.records = lines
            .iter()
            .zip(identifiers)
            .enumerate()
            .map(|(index, (line, identifier))| LineRecord {
                line_index: index,
                identifier,
                content: line.content.clone(),
                last_observed_at: now,
            })
            .collect();

        let edited: Vec<(String, String, String)> = self
            .records
            .iter()
            .filter_map(|record| {
                let identifier = record.identifier.as_ref()?;
                let before = previous_content.get(identifier)?;
                (*before != record.content).then(|| {
                    (identifier.clone(), before.clone(), record.content.clone())
                })
            })
            .collect();
        for (identifier, before, after) in edited {
            if self.history(&identifier).is_empty() {
                self.push_history(&identifier, before);
            }
            self.push_history(&identifier, after);
        }

        let recovered = restored.len();
        for (index, identifier) in restored {
            self.write_identifier(index, &identifier);
        }
        if recovered > 0 {
            debug!(recovered, "restored identifiers of moved lines");
        }
        recovered
    }

    /// Sequence of the newest history entry of `identifier` with `content`.
    fn latest_sequence(&self, identifier: &str, content: &str) -> Option<u64> {
        self.history(identifier)
            .iter()
            .filter(|entry| entry.content == content)
            .map(|entry| entry.sequence)
            .max()
    }

    fn write_identifier(&mut self, index: usize, identifier: &str) {
        self.surface.set_line_tag(index, identifier);
        let record = &mut self.records[index];
        record.identifier = Some(identifier.to_owned());
        let content = record.content.clone();
        self.push_history(identifier, content);
    }

    fn push_history(&mut self, identifier: &str, content: String) {
        self.sequence += 1;
        let entry = HistoryEntry {
            identifier: identifier.to_owned(),
            content,
            timestamp: Utc::now(),
            sequence: self.sequence,
        };
        let entries = self.history.entry(identifier.to_owned()).or_default();
        entries.push(entry);
        if entries.len() > HISTORY_LIMIT {
            entries.remove(0);
        }
    }
}

impl LineTracker<DocumentSurface> {
    /// Tracker over `document`, initialized from the identifiers it carries.
    pub fn for_document(document: Delta, options: MatchOptions) -> Self {
        let surface = DocumentSurface::new(document);
        let lines = surface.observe();
        let mut tracker = Self::with_options(surface, options);
        tracker.initialize(&lines);
        tracker
    }

    pub fn document(&self) -> &Delta {
        self.surface.document()
    }

    /// Starts over on a freshly loaded document, e.g. after an approval.
    pub fn load_document(&mut self, document: Delta) -> TrackerState {
        self.reset();
        self.surface.replace(document);
        let lines = self.surface.observe();
        self.initialize(&lines)
    }

    /// Applies `change` to the document, then re-syncs and reconciles.
    pub fn apply_edit(
        &mut self,
        change: &Delta,
        user_id: Option<&str>,
    ) -> Result<EditOutcome, DeltaError> {
        self.surface.apply(change)?;
        let lines = self.surface.observe();
        let report = self.on_content_changed(&lines);
        let reconciliation = self.reconcile(user_id);
        Ok(EditOutcome { report, reconciliation })
    }
}
