// Operation documents: ordered insert / retain / delete lists with formatting attributes.
//
// A document is a delta made only of inserts and ending in "\n". A patch is
// any delta; applying a patch to a document is `compose`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

mod compose;
mod diff;
mod iter;
mod text;

pub use compose::compose_attributes;
pub use iter::{OpIter, OpKind};
pub use text::{Line, EMBED_PLACEHOLDER};

/// Attribute key holding a line's stable identifier on its terminating `"\n"`.
pub const LINE_ID_ATTRIBUTE: &str = "line-id";

/// Formatting attributes. Keys are unique and kept sorted for stable output.
pub type AttributeMap = BTreeMap<String, Value>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeltaError {
    #[error("malformed operation: {0}")]
    MalformedOp(String),
    #[error("{side} delta is not a document (contains retain or delete operations)")]
    NotADocument { side: &'static str },
    #[error("patch expects a base of {expected} positions but the document has {actual}")]
    LengthMismatch { expected: usize, actual: usize },
}

/// Payload of an insert: a text run or an embedded object such as `{"image": "..."}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InsertContent {
    Text(String),
    Embed(Map<String, Value>),
}

impl InsertContent {
    /// Length in content units: chars for text, 1 for an embed.
    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.chars().count(),
            Self::Embed(_) => 1,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Embed(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawOp", into = "RawOp")]
pub enum Op {
    Insert { content: InsertContent, attributes: Option<AttributeMap> },
    Retain { len: usize, attributes: Option<AttributeMap> },
    Delete { len: usize },
}

impl Op {
    pub fn insert_text(text: impl Into<String>, attributes: Option<AttributeMap>) -> Self {
        Self::Insert { content: InsertContent::Text(text.into()), attributes: non_empty(attributes) }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Insert { content, .. } => content.len(),
            Self::Retain { len, .. } | Self::Delete { len } => *len,
        }
    }

    pub fn kind(&self) -> OpKind {
        match self {
            Self::Insert { .. } => OpKind::Insert,
            Self::Retain { .. } => OpKind::Retain,
            Self::Delete { .. } => OpKind::Delete,
        }
    }

    pub fn attributes(&self) -> Option<&AttributeMap> {
        match self {
            Self::Insert { attributes, .. } | Self::Retain { attributes, .. } => attributes.as_ref(),
            Self::Delete { .. } => None,
        }
    }

    pub fn is_insert(&self) -> bool {
        matches!(self, Self::Insert { .. })
    }
}

/// Wire shape of a single op: exactly one of `insert`, `retain`, `delete`.
#[derive(Serialize, Deserialize)]
struct RawOp {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    insert: Option<InsertContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    retain: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    delete: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    attributes: Option<AttributeMap>,
}

impl TryFrom<RawOp> for Op {
    type Error = DeltaError;

    fn try_from(raw: RawOp) -> Result<Self, Self::Error> {
        let attributes = non_empty(raw.attributes);
        match (raw.insert, raw.retain, raw.delete) {
            (Some(content), None, None) => {
                if content.len() == 0 {
                    return Err(DeltaError::MalformedOp("insert with empty text".into()));
                }
                Ok(Self::Insert { content, attributes })
            }
            (None, Some(len), None) if len > 0 => Ok(Self::Retain { len, attributes }),
            (None, None, Some(len)) if len > 0 => {
                if attributes.is_some() {
                    return Err(DeltaError::MalformedOp("delete cannot carry attributes".into()));
                }
                Ok(Self::Delete { len })
            }
            (None, Some(_), None) | (None, None, Some(_)) => {
                Err(DeltaError::MalformedOp("zero-length retain or delete".into()))
            }
            _ => Err(DeltaError::MalformedOp(
                "expected exactly one of `insert`, `retain`, `delete`".into(),
            )),
        }
    }
}

impl From<Op> for RawOp {
    fn from(op: Op) -> Self {
        match op {
            Op::Insert { content, attributes } => {
                Self { insert: Some(content), retain: None, delete: None, attributes }
            }
            Op::Retain { len, attributes } => {
                Self { insert: None, retain: Some(len), delete: None, attributes }
            }
            Op::Delete { len } => {
                Self { insert: None, retain: None, delete: Some(len), attributes: None }
            }
        }
    }
}

/// An ordered, canonical list of operations. Serialises as `{"ops": [...]}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Delta {
    ops: Vec<Op>,
}

impl Delta {
    pub fn new() -> Self {
        Self { ops: Vec::new() }
    }

    /// The empty document: a single line break.
    pub fn empty_document() -> Self {
        Self::new().insert("\n", None)
    }

    /// Builds a delta by pushing each op, so the result is canonical.
    pub fn from_ops(ops: impl IntoIterator<Item = Op>) -> Self {
        let mut delta = Self::new();
        for op in ops {
            delta.push(op);
        }
        delta
    }

    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<Op> {
        self.ops
    }

    pub fn iter(&self) -> OpIter<'_> {
        OpIter::new(&self.ops)
    }

    pub fn insert(mut self, text: impl Into<String>, attributes: Option<AttributeMap>) -> Self {
        self.push(Op::insert_text(text, attributes));
        self
    }

    pub fn insert_embed(mut self, embed: Map<String, Value>, attributes: Option<AttributeMap>) -> Self {
        self.push(Op::Insert { content: InsertContent::Embed(embed), attributes: non_empty(attributes) });
        self
    }

    pub fn retain(mut self, len: usize, attributes: Option<AttributeMap>) -> Self {
        self.push(Op::Retain { len, attributes: non_empty(attributes) });
        self
    }

    pub fn delete(mut self, len: usize) -> Self {
        self.push(Op::Delete { len });
        self
    }

    /// Appends `op`, merging it into the tail where possible.
    ///
    /// Adjacent deletes merge, adjacent inserts/retains with equal attributes
    /// merge, and an insert arriving after a delete is placed before it.
    pub fn push(&mut self, op: Op) {
        if op.len() == 0 {
            return;
        }

        if let (Some(Op::Delete { len: last_len }), Op::Delete { len }) = (self.ops.last_mut(), &op)
        {
            *last_len += len;
            return;
        }

        let mut index = self.ops.len();
        if op.is_insert() && matches!(self.ops.last(), Some(Op::Delete { .. })) {
            index -= 1;
        }

        if index > 0 {
            if let Some(merged) = merge_ops(&self.ops[index - 1], &op) {
                self.ops[index - 1] = merged;
                return;
            }
        }

        self.ops.insert(index, op);
    }

    /// Drops a trailing attribute-less retain; it is a no-op at the end of a patch.
    pub fn chop(mut self) -> Self {
        if matches!(self.ops.last(), Some(Op::Retain { attributes: None, .. })) {
            self.ops.pop();
        }
        self
    }

    /// Total length of all ops.
    pub fn length(&self) -> usize {
        self.ops.iter().map(Op::len).sum()
    }

    /// Net change in document length when this delta is applied as a patch.
    pub fn change_length(&self) -> isize {
        self.ops.iter().fold(0isize, |acc, op| match op {
            Op::Insert { .. } => acc + op.len() as isize,
            Op::Delete { len } => acc - *len as isize,
            Op::Retain { .. } => acc,
        })
    }

    /// Number of base positions this patch walks over (retained plus deleted).
    pub fn base_length(&self) -> usize {
        self.ops
            .iter()
            .filter(|op| !op.is_insert())
            .map(Op::len)
            .sum()
    }

    /// True when the delta contains only inserts.
    pub fn is_document(&self) -> bool {
        self.ops.iter().all(Op::is_insert)
    }

    /// Ops covering positions `start..end`.
    pub fn slice(&self, start: usize, end: usize) -> Delta {
        let mut sliced = Delta::new();
        let mut iter = self.iter();
        let mut index = 0usize;
        while index < end && iter.has_next() {
            if index < start {
                let skipped = iter.next_slice(start - index);
                index += skipped.len();
            } else {
                let op = iter.next_slice(end - index);
                index += op.len();
                sliced.push(op);
            }
        }
        sliced
    }

    /// Applies `patch` after checking that this is a document long enough for it.
    pub fn try_compose(&self, patch: &Delta) -> Result<Delta, DeltaError> {
        if !self.is_document() {
            return Err(DeltaError::NotADocument { side: "base" });
        }
        let expected = patch.base_length();
        let actual = self.length();
        if expected > actual {
            return Err(DeltaError::LengthMismatch { expected, actual });
        }
        Ok(self.compose(patch))
    }

    /// Serialises to the `{"ops": [...]}` wire shape.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| String::from("{\"ops\":[]}"))
    }
}

fn merge_ops(previous: &Op, next: &Op) -> Option<Op> {
    match (previous, next) {
        (
            Op::Insert { content: InsertContent::Text(left), attributes: left_attrs },
            Op::Insert { content: InsertContent::Text(right), attributes: right_attrs },
        ) if left_attrs == right_attrs => Some(Op::Insert {
            content: InsertContent::Text(format!("{left}{right}")),
            attributes: left_attrs.clone(),
        }),
        (
            Op::Retain { len: left, attributes: left_attrs },
            Op::Retain { len: right, attributes: right_attrs },
        ) if left_attrs == right_attrs => {
            Some(Op::Retain { len: left + right, attributes: left_attrs.clone() })
        }
        _ => None,
    }
}

fn non_empty(attributes: Option<AttributeMap>) -> Option<AttributeMap> {
    attributes.filter(|map| !map.is_empty())
}

/// Shorthand for building attribute maps in code and tests.
pub fn attributes<const N: usize>(pairs: [(&str, Value); N]) -> AttributeMap {
    pairs.into_iter().map(|(key, value)| (key.to_owned(), value)).collect()
}
