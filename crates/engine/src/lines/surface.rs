use scriptdesk_common::delta::{attributes, Delta, DeltaError, LINE_ID_ATTRIBUTE};
use serde_json::Value;

use super::LineObservation;

/// The editing surface as seen by the tracker: a list of lines, each with
/// one string slot for its identifier.
pub trait LineSurface {
    fn line_count(&self) -> usize;

    fn line_tag(&self, index: usize) -> Option<String>;

    /// Writes `tag` into line `index`. Returns false if the line does not exist.
    fn set_line_tag(&mut self, index: usize, tag: &str) -> bool;
}

/// A surface backed by an operation document. Identifiers live in the
/// `line-id` attribute of each line's terminating `"\n"`, so they survive
/// serialization.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentSurface {
    document: Delta,
}

impl DocumentSurface {
    pub fn new(document: Delta) -> Self {
        Self { document }
    }

    pub fn document(&self) -> &Delta {
        &self.document
    }

    pub fn into_document(self) -> Delta {
        self.document
    }

    /// Applies an edit patch to the underlying document.
    pub fn apply(&mut self, change: &Delta) -> Result<(), DeltaError> {
        self.document = self.document.try_compose(change)?;
        Ok(())
    }

    pub fn replace(&mut self, document: Delta) {
        self.document = document;
    }

    /// Current lines with whatever identifiers their line breaks carry.
    pub fn observe(&self) -> Vec<LineObservation> {
        self.document
            .lines()
            .into_iter()
            .filter(|line| line.terminated)
            .map(|line| LineObservation {
                content: line.text(),
                identifier: line.identifier().map(str::to_owned),
            })
            .collect()
    }
}

impl LineSurface for DocumentSurface {
    fn line_count(&self) -> usize {
        self.document.lines().iter().filter(|line| line.terminated).count()
    }

    fn line_tag(&self, index: usize) -> Option<String> {
        self.document.lines().get(index)?.identifier().map(str::to_owned)
    }

    fn set_line_tag(&mut self, index: usize, tag: &str) -> bool {
        let Some(offset) = self.document.line_break_offset(index) else {
            return false;
        };
        let patch = Delta::new().retain(offset, None).retain(
            1,
            Some(attributes([(LINE_ID_ATTRIBUTE, Value::String(tag.to_owned()))])),
        );
        self.document = self.document.compose(&patch);
        true
    }
}
