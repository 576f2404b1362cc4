use super::{InsertContent, Op};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Insert,
    Retain,
    Delete,
}

/// Walks a list of ops, handing out slices of at most a requested length.
///
/// Past the end the iterator behaves as an endless attribute-less retain,
/// which is what `compose` and `diff` expect of an exhausted side.
#[derive(Debug, Clone)]
pub struct OpIter<'a> {
    ops: &'a [Op],
    index: usize,
    offset: usize,
}

impl<'a> OpIter<'a> {
    pub fn new(ops: &'a [Op]) -> Self {
        Self { ops, index: 0, offset: 0 }
    }

    pub fn has_next(&self) -> bool {
        self.index < self.ops.len()
    }

    pub fn peek(&self) -> Option<&'a Op> {
        self.ops.get(self.index)
    }

    /// Remaining length of the current op, `usize::MAX` when exhausted.
    pub fn peek_len(&self) -> usize {
        match self.peek() {
            Some(op) => op.len() - self.offset,
            None => usize::MAX,
        }
    }

    pub fn peek_kind(&self) -> OpKind {
        self.peek().map(Op::kind).unwrap_or(OpKind::Retain)
    }

    /// Takes up to `max_len` positions from the current op.
    pub fn next_slice(&mut self, max_len: usize) -> Op {
        let Some(op) = self.ops.get(self.index) else {
            return Op::Retain { len: max_len, attributes: None };
        };

        let offset = self.offset;
        let remaining = op.len() - offset;
        let taken = if max_len >= remaining {
            self.index += 1;
            self.offset = 0;
            remaining
        } else {
            self.offset += max_len;
            max_len
        };

        match op {
            Op::Delete { .. } => Op::Delete { len: taken },
            Op::Retain { attributes, .. } => Op::Retain { len: taken, attributes: attributes.clone() },
            Op::Insert { content: InsertContent::Text(text), attributes } => {
                let sliced = if offset == 0 && taken == remaining {
                    text.clone()
                } else {
                    text.chars().skip(offset).take(taken).collect()
                };
                Op::Insert { content: InsertContent::Text(sliced), attributes: attributes.clone() }
            }
            Op::Insert { content: InsertContent::Embed(_), .. } => op.clone(),
        }
    }

    /// Everything not yet consumed, with a partially consumed op sliced.
    pub fn rest(&mut self) -> Vec<Op> {
        let mut rest = Vec::new();
        while self.has_next() {
            rest.push(self.next_slice(usize::MAX));
        }
        rest
    }
}
