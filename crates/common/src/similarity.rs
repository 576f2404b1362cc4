// Cheap text similarity used to re-associate line identities after edits.
//
// This is a prefix / containment / positional heuristic, not an edit
// distance. Matching thresholds elsewhere are tuned against these exact
// scores, so changes here change which lines keep their identifiers.

/// Strings at or below this many chars skip the shared-prefix rule.
const PREFIX_RULE_MIN_CHARS: usize = 5;

/// Scores how alike two line texts are, in `0.0..=1.0`.
///
/// - identical: `1.0`
/// - both longer than five chars and sharing a prefix longer than half the
///   shorter one: `0.8 + prefix / min_len * 0.2`
/// - one contains the other: `0.7 + min_len / max_len * 0.3`
/// - otherwise: position-wise equal chars over `max_len`
///
/// An empty string only matches another empty string.
pub fn text_similarity(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    let min_len = a_chars.len().min(b_chars.len());
    let max_len = a_chars.len().max(b_chars.len());

    if a_chars.len() > PREFIX_RULE_MIN_CHARS && b_chars.len() > PREFIX_RULE_MIN_CHARS {
        let prefix = common_prefix_len(&a_chars, &b_chars);
        if prefix as f64 > min_len as f64 / 2.0 {
            return 0.8 + (prefix as f64 / min_len as f64) * 0.2;
        }
    }

    if a.contains(b) || b.contains(a) {
        return 0.7 + (min_len as f64 / max_len as f64) * 0.3;
    }

    let matching = a_chars.iter().zip(&b_chars).filter(|(x, y)| x == y).count();
    matching as f64 / max_len as f64
}

fn common_prefix_len(a: &[char], b: &[char]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-9,
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn identical_strings_score_one() {
        approx(text_similarity("", ""), 1.0);
        approx(text_similarity("FADE IN:", "FADE IN:"), 1.0);
    }

    #[test]
    fn empty_against_non_empty_scores_zero() {
        approx(text_similarity("", "anything"), 0.0);
        approx(text_similarity("x", ""), 0.0);
    }

    #[test]
    fn long_shared_prefix_scores_above_point_eight() {
        // the shorter string is entirely a prefix of the longer one
        approx(text_similarity("Hello world", "Hello world!"), 0.8 + (11.0 / 11.0) * 0.2);
        approx(text_similarity("Hello there", "Hello world"), 0.8 + (6.0 / 11.0) * 0.2);
    }

    #[test]
    fn short_strings_skip_prefix_rule_and_use_containment() {
        // "World" has five chars, so the prefix rule does not apply.
        approx(text_similarity("World", "World!"), 0.7 + (5.0 / 6.0) * 0.3);
    }

    #[test]
    fn containment_without_shared_prefix() {
        approx(
            text_similarity("the scene opens", "scene"),
            0.7 + (5.0 / 15.0) * 0.3,
        );
    }

    #[test]
    fn falls_back_to_positional_matches() {
        // a-b-c vs a-x-c: two of three positions agree.
        approx(text_similarity("abc", "axc"), 2.0 / 3.0);
        approx(text_similarity("abcd", "wxyz"), 0.0);
    }

    #[test]
    fn counts_chars_not_bytes() {
        approx(text_similarity("café", "cafe"), 3.0 / 4.0);
    }
}
