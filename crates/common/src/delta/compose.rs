use super::{AttributeMap, Delta, Op, OpKind};

impl Delta {
    /// Applies `patch` on top of `self`.
    ///
    /// Retains copy from `self` (merging attributes), inserts add content,
    /// deletes remove it. No length validation happens here; callers holding
    /// untrusted patches go through [`Delta::try_compose`].
    pub fn compose(&self, patch: &Delta) -> Delta {
        let mut base_iter = self.iter();
        let mut patch_iter = patch.iter();
        let mut composed = Delta::new();

        while base_iter.has_next() || patch_iter.has_next() {
            if patch_iter.peek_kind() == OpKind::Insert {
                composed.push(patch_iter.next_slice(usize::MAX));
            } else if base_iter.peek_kind() == OpKind::Delete {
                composed.push(base_iter.next_slice(usize::MAX));
            } else {
                let length = base_iter.peek_len().min(patch_iter.peek_len());
                let base_op = base_iter.next_slice(length);
                let patch_op = patch_iter.next_slice(length);

                match (base_op, patch_op) {
                    (
                        Op::Retain { attributes: base_attrs, .. },
                        Op::Retain { attributes: patch_attrs, .. },
                    ) => composed.push(Op::Retain {
                        len: length,
                        attributes: compose_attributes(
                            base_attrs.as_ref(),
                            patch_attrs.as_ref(),
                            true,
                        ),
                    }),
                    (
                        Op::Insert { content, attributes: base_attrs },
                        Op::Retain { attributes: patch_attrs, .. },
                    ) => composed.push(Op::Insert {
                        content,
                        attributes: compose_attributes(
                            base_attrs.as_ref(),
                            patch_attrs.as_ref(),
                            false,
                        ),
                    }),
                    (Op::Retain { .. }, Op::Delete { len }) => composed.push(Op::Delete { len }),
                    // Deleting freshly inserted content cancels out.
                    (Op::Insert { .. }, Op::Delete { .. }) => {}
                    // Handled by the branches above.
                    (Op::Delete { .. }, _) | (_, Op::Insert { .. }) => {}
                }
            }
        }

        composed.chop()
    }
}

/// Merges `patch` attributes over `base`.
///
/// A `null` in `patch` removes the key. With `keep_null` the null survives so
/// that a later compose onto real content can still apply the removal.
pub fn compose_attributes(
    base: Option<&AttributeMap>,
    patch: Option<&AttributeMap>,
    keep_null: bool,
) -> Option<AttributeMap> {
    let mut attributes = patch.cloned().unwrap_or_default();
    if !keep_null {
        attributes.retain(|_, value| !value.is_null());
    }

    if let Some(base) = base {
        for (key, value) in base {
            let overridden = patch.is_some_and(|patch| patch.contains_key(key));
            if !overridden {
                attributes.insert(key.clone(), value.clone());
            }
        }
    }

    if attributes.is_empty() {
        None
    } else {
        Some(attributes)
    }
}
