use super::text::EMBED_PLACEHOLDER;
use super::{Delta, DeltaError, InsertContent, Op};

/// Edit distance beyond which the middle span is replaced wholesale instead of
/// searched further. Keeps the Myers trace bounded on very large rewrites.
const MAX_EDIT_DISTANCE: usize = 2_048;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EditKind {
    Equal,
    Insert,
    Delete,
}

impl Delta {
    /// Computes the patch turning `self` into `other`.
    ///
    /// Both sides must be documents. The common prefix and suffix are kept as
    /// retains and the middle is diffed char by char. A span whose text is
    /// unchanged but whose attributes differ is emitted as insert + delete.
    pub fn diff(&self, other: &Delta) -> Result<Delta, DeltaError> {
        if !self.is_document() {
            return Err(DeltaError::NotADocument { side: "before" });
        }
        if !other.is_document() {
            return Err(DeltaError::NotADocument { side: "after" });
        }
        if self == other {
            return Ok(Delta::new());
        }

        let before = diff_chars(self);
        let after = diff_chars(other);
        let runs = edit_runs(&before, &after);

        let mut before_iter = self.iter();
        let mut after_iter = other.iter();
        let mut patch = Delta::new();

        for (kind, mut remaining) in runs {
            while remaining > 0 {
                let taken = match kind {
                    EditKind::Insert => {
                        let len = after_iter.peek_len().min(remaining);
                        patch.push(after_iter.next_slice(len));
                        len
                    }
                    EditKind::Delete => {
                        let len = before_iter.peek_len().min(remaining);
                        before_iter.next_slice(len);
                        patch.push(Op::Delete { len });
                        len
                    }
                    EditKind::Equal => {
                        let len =
                            before_iter.peek_len().min(after_iter.peek_len()).min(remaining);
                        let before_op = before_iter.next_slice(len);
                        let after_op = after_iter.next_slice(len);
                        if before_op == after_op {
                            patch.push(Op::Retain { len, attributes: None });
                        } else {
                            patch.push(after_op);
                            patch.push(Op::Delete { len });
                        }
                        len
                    }
                };
                remaining -= taken;
            }
        }

        Ok(patch.chop())
    }
}

fn diff_chars(document: &Delta) -> Vec<char> {
    let mut chars = Vec::with_capacity(document.length());
    for op in document.ops() {
        match op {
            Op::Insert { content: InsertContent::Text(text), .. } => chars.extend(text.chars()),
            Op::Insert { content: InsertContent::Embed(_), .. } => chars.push(EMBED_PLACEHOLDER),
            Op::Retain { .. } | Op::Delete { .. } => {}
        }
    }
    chars
}

/// Run-length encoded edit script: common prefix, diffed middle, common suffix.
fn edit_runs(old_chars: &[char], new_chars: &[char]) -> Vec<(EditKind, usize)> {
    let prefix = old_chars.iter().zip(new_chars).take_while(|(a, b)| a == b).count();
    let old_rest = &old_chars[prefix..];
    let new_rest = &new_chars[prefix..];
    let suffix = old_rest
        .iter()
        .rev()
        .zip(new_rest.iter().rev())
        .take_while(|(a, b)| a == b)
        .count();

    let old_middle = &old_rest[..old_rest.len() - suffix];
    let new_middle = &new_rest[..new_rest.len() - suffix];

    let mut runs = Vec::new();
    push_run(&mut runs, EditKind::Equal, prefix);
    match myers_edits(old_middle, new_middle) {
        Some(edits) => {
            for kind in edits {
                push_run(&mut runs, kind, 1);
            }
        }
        None => {
            push_run(&mut runs, EditKind::Delete, old_middle.len());
            push_run(&mut runs, EditKind::Insert, new_middle.len());
        }
    }
    push_run(&mut runs, EditKind::Equal, suffix);
    runs
}

fn push_run(runs: &mut Vec<(EditKind, usize)>, kind: EditKind, len: usize) {
    if len == 0 {
        return;
    }
    match runs.last_mut() {
        Some((last_kind, last_len)) if *last_kind == kind => *last_len += len,
        _ => runs.push((kind, len)),
    }
}

/// Shortest edit script between two char slices, or `None` when the edit
/// distance exceeds [`MAX_EDIT_DISTANCE`].
fn myers_edits(old_chars: &[char], new_chars: &[char]) -> Option<Vec<EditKind>> {
    let old_len = old_chars.len();
    let new_len = new_chars.len();

    if old_len == 0 {
        return Some(vec![EditKind::Insert; new_len]);
    }
    if new_len == 0 {
        return Some(vec![EditKind::Delete; old_len]);
    }

    let max = old_len + new_len;
    let limit = max.min(MAX_EDIT_DISTANCE);
    let offset = max as isize;
    let mut v = vec![0isize; 2 * max + 1];
    // trace[d] holds v[-d..=d] as it stood before round d.
    let mut trace: Vec<Vec<isize>> = Vec::with_capacity(limit + 1);

    for d in 0..=limit {
        let d_isize = d as isize;
        trace.push(v[(offset - d_isize) as usize..=(offset + d_isize) as usize].to_vec());

        let mut k = -d_isize;
        while k <= d_isize {
            let mut x = if k == -d_isize
                || (k != d_isize && v[(k - 1 + offset) as usize] < v[(k + 1 + offset) as usize])
            {
                v[(k + 1 + offset) as usize]
            } else {
                v[(k - 1 + offset) as usize] + 1
            };
            let mut y = x - k;

            while x < old_len as isize
                && y < new_len as isize
                && old_chars[x as usize] == new_chars[y as usize]
            {
                x += 1;
                y += 1;
            }

            v[(k + offset) as usize] = x;

            if x >= old_len as isize && y >= new_len as isize {
                return Some(backtrack_edits(old_len, new_len, &trace, d));
            }

            k += 2;
        }
    }

    None
}

fn backtrack_edits(
    old_len: usize,
    new_len: usize,
    trace: &[Vec<isize>],
    solved_d: usize,
) -> Vec<EditKind> {
    let at = |row: &[isize], d: isize, k: isize| row[(k + d) as usize];

    let mut edits = Vec::new();
    let mut x = old_len as isize;
    let mut y = new_len as isize;

    for d in (0..=solved_d).rev() {
        let row = &trace[d];
        let k = x - y;
        let d_isize = d as isize;

        let prev_k = if d == 0 {
            0
        } else if k == -d_isize
            || (k != d_isize && at(row, d_isize, k - 1) < at(row, d_isize, k + 1))
        {
            k + 1
        } else {
            k - 1
        };
        let prev_x = if d == 0 { 0 } else { at(row, d_isize, prev_k) };
        let prev_y = prev_x - prev_k;

        while x > prev_x && y > prev_y {
            edits.push(EditKind::Equal);
            x -= 1;
            y -= 1;
        }

        if d == 0 {
            break;
        }

        if x == prev_x {
            edits.push(EditKind::Insert);
            y -= 1;
        } else {
            edits.push(EditKind::Delete);
            x -= 1;
        }
    }

    edits.reverse();
    edits
}
