// Content normalizer: turns whatever was persisted into a usable document.
//
// Accepted shapes: `{"ops": [...]}` objects, bare op arrays, JSON strings
// holding either of those (double-encoded), JSON null, and plain text. Text
// that parses as JSON but carries no ops (`[1, 2]`, `"Hi"`) stays plain
// text. The result is always a non-empty document ending in "\n"; anything
// else falls back to the empty document.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;
use tracing::debug;

use crate::delta::{Delta, InsertContent, Op};

/// How many layers of JSON-in-a-string are unwrapped before giving up.
const MAX_ENCODING_DEPTH: usize = 3;

/// Normalizes a JSON value read from storage or the wire.
pub fn normalize(raw: &Value) -> Delta {
    normalize_value(raw, 0)
}

/// Normalizes stored text, which may be serialized ops or plain text.
pub fn normalize_str(raw: &str) -> Delta {
    normalize_text(raw, 0)
}

fn normalize_value(raw: &Value, depth: usize) -> Delta {
    match raw {
        Value::String(text) => normalize_text(text, depth),
        Value::Array(_) => normalize_ops(raw),
        Value::Object(object) => match object.get("ops") {
            Some(ops @ Value::Array(_)) => normalize_ops(ops),
            _ => fallback("object without an `ops` array"),
        },
        Value::Null => fallback("null content"),
        Value::Bool(_) | Value::Number(_) => fallback("scalar content"),
    }
}

fn normalize_text(raw: &str, depth: usize) -> Delta {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Delta::empty_document();
    }

    if let Some(value) = decode_ops(trimmed) {
        if depth >= MAX_ENCODING_DEPTH {
            return fallback("too many layers of encoded JSON");
        }
        return normalize_value(&value, depth + 1);
    }

    plain_text_document(raw)
}

/// Parses `text` if it is serialized ops, possibly wrapped in JSON strings.
fn decode_ops(text: &str) -> Option<Value> {
    if !looks_like_json(text) {
        return None;
    }
    let value: Value = serde_json::from_str(text).ok()?;
    carries_ops(&value).then_some(value)
}

fn carries_ops(value: &Value) -> bool {
    match value {
        Value::Array(items) => items.iter().all(Value::is_object),
        Value::Object(object) => object.contains_key("ops"),
        // Every layer is strictly shorter than the one around it.
        Value::String(inner) => decode_ops(inner.trim()).is_some(),
        Value::Null | Value::Bool(_) | Value::Number(_) => false,
    }
}

fn looks_like_json(text: &str) -> bool {
    matches!(text.as_bytes().first(), Some(b'{' | b'[' | b'"'))
}

fn normalize_ops(ops: &Value) -> Delta {
    let parsed: Vec<Op> = match serde_json::from_value(ops.clone()) {
        Ok(parsed) => parsed,
        Err(error) => return fallback(&format!("undecodable ops: {error}")),
    };

    if parsed.iter().any(|op| !op.is_insert()) {
        return fallback("ops contain retain or delete");
    }

    let document = Delta::from_ops(parsed);
    if document.ops().is_empty() {
        return Delta::empty_document();
    }
    ensure_trailing_break(document)
}

fn plain_text_document(raw: &str) -> Delta {
    let unified = raw.replace("\r\n", "\n");
    let text = if unified.contains('<') {
        debug!("stripping markup tags from plain-text content");
        markup_tag_pattern().replace_all(&unified, "").into_owned()
    } else {
        unified
    };

    if text.trim().is_empty() {
        return Delta::empty_document();
    }
    ensure_trailing_break(Delta::new().insert(text, None))
}

fn ensure_trailing_break(document: Delta) -> Delta {
    let terminated = matches!(
        document.ops().last(),
        Some(Op::Insert { content: InsertContent::Text(text), .. }) if text.ends_with('\n')
    );
    if terminated {
        document
    } else {
        document.insert("\n", None)
    }
}

fn markup_tag_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"</?[A-Za-z!][^<>]*>").unwrap_or_else(|_| unreachable!("static pattern"))
    })
}

fn fallback(reason: &str) -> Delta {
    debug!(reason, "content normalizer fell back to empty document");
    Delta::empty_document()
}
