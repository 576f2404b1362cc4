use super::{AttributeMap, Delta, InsertContent, Op, LINE_ID_ATTRIBUTE};

/// Stand-in for an embed when a document is flattened to plain text.
pub const EMBED_PLACEHOLDER: char = '\u{FFFC}';

/// One logical line of a document.
#[derive(Debug, Clone, PartialEq)]
pub struct Line {
    /// Content ops, without the terminating line break.
    pub content: Delta,
    /// Attributes of the terminating `"\n"` (line-level formatting, identifier).
    pub attributes: Option<AttributeMap>,
    /// False only for trailing content that has no line break after it.
    pub terminated: bool,
}

impl Line {
    pub fn text(&self) -> String {
        self.content.plain_text()
    }

    /// Length in content units, excluding the line break.
    pub fn len(&self) -> usize {
        self.content.length()
    }

    pub fn identifier(&self) -> Option<&str> {
        self.attributes.as_ref()?.get(LINE_ID_ATTRIBUTE)?.as_str()
    }
}

impl Delta {
    /// Concatenated text of all inserts; embeds become [`EMBED_PLACEHOLDER`].
    ///
    /// For display and comparison only, never parsed back into a document.
    pub fn plain_text(&self) -> String {
        let mut text = String::new();
        for op in &self.ops {
            match op {
                Op::Insert { content: InsertContent::Text(run), .. } => text.push_str(run),
                Op::Insert { content: InsertContent::Embed(_), .. } => {
                    text.push(EMBED_PLACEHOLDER)
                }
                Op::Retain { .. } | Op::Delete { .. } => {}
            }
        }
        text
    }

    /// True for a document with no text, or exactly one `"\n"` insert.
    pub fn is_empty(&self) -> bool {
        if self.plain_text().is_empty() {
            return true;
        }
        matches!(
            self.ops.as_slice(),
            [Op::Insert { content: InsertContent::Text(text), .. }] if text == "\n"
        )
    }

    /// Splits a document into lines. Retain and delete ops are ignored.
    pub fn lines(&self) -> Vec<Line> {
        let mut lines = Vec::new();
        let mut current = Delta::new();

        for op in &self.ops {
            match op {
                Op::Insert { content: InsertContent::Text(text), attributes } => {
                    let mut rest = text.as_str();
                    while let Some(position) = rest.find('\n') {
                        let head = &rest[..position];
                        if !head.is_empty() {
                            current.push(Op::insert_text(head, attributes.clone()));
                        }
                        lines.push(Line {
                            content: std::mem::take(&mut current),
                            attributes: attributes.clone(),
                            terminated: true,
                        });
                        rest = &rest[position + 1..];
                    }
                    if !rest.is_empty() {
                        current.push(Op::insert_text(rest, attributes.clone()));
                    }
                }
                Op::Insert { content: InsertContent::Embed(_), .. } => current.push(op.clone()),
                Op::Retain { .. } | Op::Delete { .. } => {}
            }
        }

        if !current.ops.is_empty() {
            lines.push(Line { content: current, attributes: None, terminated: false });
        }
        lines
    }

    /// Plain text of every line, without line breaks.
    pub fn line_texts(&self) -> Vec<String> {
        self.lines().iter().map(Line::text).collect()
    }

    /// Offset of the line break ending line `index`, if that line is terminated.
    pub fn line_break_offset(&self, index: usize) -> Option<usize> {
        let lines = self.lines();
        let line = lines.get(index)?;
        if !line.terminated {
            return None;
        }
        let before: usize = lines[..index].iter().map(|line| line.len() + 1).sum();
        Some(before + line.len())
    }
}
