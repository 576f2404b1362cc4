// Line reconciliation: re-associates previous line identities with new content.
//
// Two passes. Pass 1 handles non-empty lines, trying per line and in order:
// exact text, surface identifier, nearby fuzzy, global fuzzy, same position.
// Pass 2 handles empty lines: same-position empty, any empty, then the
// fuzzy rules. Whatever is left gets a fresh identifier. Matching never
// fails; ambiguity only shows up as regenerated lines in the stats.

use scriptdesk_common::similarity::text_similarity;
use scriptdesk_common::types::LineData;
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use super::LineObservation;
use crate::config::DEFAULT_NEARBY_WINDOW;

const EXACT_TEXT_SCORE: f64 = 1.0;
const SURFACE_IDENTIFIER_SCORE: f64 = 0.95;
const NEARBY_FUZZY_THRESHOLD: f64 = 0.7;
const GLOBAL_FUZZY_THRESHOLD: f64 = 0.5;
const SAME_POSITION_THRESHOLD: f64 = 0.3;
const EMPTY_SAME_POSITION_SCORE: f64 = 1.0;
const EMPTY_ELSEWHERE_SCORE: f64 = 0.9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchOptions {
    /// Max distance, in positions, for the nearby fuzzy rule.
    pub nearby_window: usize,
}

impl Default for MatchOptions {
    fn default() -> Self {
        Self { nearby_window: DEFAULT_NEARBY_WINDOW }
    }
}

/// Which rule matched a new line to a previous one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchRule {
    ExactText,
    SurfaceIdentifier,
    NearbyFuzzy,
    GlobalFuzzy,
    SamePosition,
    EmptySamePosition,
    EmptyElsewhere,
    Regenerated,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LineMatch {
    /// Index into the previous line data, `None` when regenerated.
    pub previous: Option<usize>,
    pub rule: MatchRule,
    pub score: f64,
}

impl LineMatch {
    const REGENERATED: Self = Self { previous: None, rule: MatchRule::Regenerated, score: 0.0 };
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileStats {
    /// Lines that kept an existing identifier, edited or not.
    pub preserved: usize,
    /// Preserved lines whose text changed.
    pub edited: usize,
    /// Lines that received a fresh identifier.
    pub regenerated: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    /// New line data, numbered 1..=N in output order.
    pub lines: Vec<LineData>,
    /// How each new line was matched, parallel to `lines`.
    pub matches: Vec<LineMatch>,
    pub stats: ReconcileStats,
}

/// Matches `new_lines` against `previous` and returns the new assignment.
///
/// A previous line's position is its `line_number - 1`, so data with gaps
/// (lines never assigned) keeps its positional meaning. Each previous line
/// is claimed at most once.
pub fn reconcile_lines(
    previous: &[LineData],
    new_lines: &[LineObservation],
    user_id: Option<&str>,
    options: MatchOptions,
) -> Reconciliation {
    let mut matcher = Matcher { previous, used: vec![false; previous.len()], options };
    let mut matches = vec![LineMatch::REGENERATED; new_lines.len()];

    for (index, line) in new_lines.iter().enumerate() {
        if line.content.is_empty() {
            continue;
        }
        if let Some(found) = matcher.match_content(index, line) {
            matches[index] = found;
        }
    }

    for (index, line) in new_lines.iter().enumerate() {
        if !line.content.is_empty() {
            continue;
        }
        if let Some(found) = matcher.match_empty(index) {
            matches[index] = found;
        }
    }

    let mut stats = ReconcileStats::default();
    let lines = new_lines
        .iter()
        .zip(&matches)
        .enumerate()
        .map(|(index, (line, found))| {
            let line_number = index + 1;
            let Some(previous_index) = found.previous else {
                stats.regenerated += 1;
                return LineData {
                    identifier: Uuid::new_v4().to_string(),
                    line_number,
                    content: line.content.clone(),
                    author: user_id.map(str::to_owned),
                    edited_by: Vec::new(),
                };
            };

            let previous_line = &previous[previous_index];
            let mut edited_by = previous_line.edited_by.clone();
            stats.preserved += 1;
            if previous_line.content != line.content {
                stats.edited += 1;
                if let Some(user) = user_id {
                    if !edited_by.iter().any(|existing| existing == user) {
                        edited_by.push(user.to_owned());
                    }
                }
            }

            LineData {
                identifier: previous_line.identifier.clone(),
                line_number,
                content: line.content.clone(),
                author: previous_line.author.clone(),
                edited_by,
            }
        })
        .collect();

    debug!(
        previous = previous.len(),
        current = new_lines.len(),
        preserved = stats.preserved,
        edited = stats.edited,
        regenerated = stats.regenerated,
        "reconciled line identities"
    );

    Reconciliation { lines, matches, stats }
}

struct Matcher<'a> {
    previous: &'a [LineData],
    used: Vec<bool>,
    options: MatchOptions,
}

impl Matcher<'_> {
    fn match_content(&mut self, index: usize, line: &LineObservation) -> Option<LineMatch> {
        let content = line.content.as_str();
        let by_identifier = line
            .identifier
            .as_deref()
            .and_then(|identifier| self.first_unused(|prev| prev.identifier == identifier));

        if let Some(candidate) = by_identifier {
            if self.previous[candidate].content == content {
                return Some(self.claim(candidate, MatchRule::ExactText, EXACT_TEXT_SCORE));
            }
        }
        if let Some(candidate) = self.nearest_unused(index, |prev| prev.content == content) {
            return Some(self.claim(candidate, MatchRule::ExactText, EXACT_TEXT_SCORE));
        }
        if let Some(candidate) = by_identifier {
            return Some(self.claim(
                candidate,
                MatchRule::SurfaceIdentifier,
                SURFACE_IDENTIFIER_SCORE,
            ));
        }

        self.match_fuzzy(index, content)
    }

    /// Empty lines only take empty previous lines. The trailing fuzzy pass
    /// can never match: similarity scores empty against non-empty text as
    /// 0.0, which is below every fuzzy threshold, so an empty line that
    /// finds no empty predecessor is regenerated.
    fn match_empty(&mut self, index: usize) -> Option<LineMatch> {
        if let Some(candidate) = self.unused_at(index) {
            if self.previous[candidate].content.is_empty() {
                return Some(self.claim(
                    candidate,
                    MatchRule::EmptySamePosition,
                    EMPTY_SAME_POSITION_SCORE,
                ));
            }
        }
        if let Some(candidate) = self.nearest_unused(index, |prev| prev.content.is_empty()) {
            return Some(self.claim(candidate, MatchRule::EmptyElsewhere, EMPTY_ELSEWHERE_SCORE));
        }

        self.match_fuzzy(index, "")
    }

    fn match_fuzzy(&mut self, index: usize, content: &str) -> Option<LineMatch> {
        let window = self.options.nearby_window;

        if let Some((candidate, score)) =
            self.best_unused(index, content, |position| position.abs_diff(index) <= window)
        {
            if score > NEARBY_FUZZY_THRESHOLD {
                return Some(self.claim(candidate, MatchRule::NearbyFuzzy, score));
            }
        }

        if let Some((candidate, score)) = self.best_unused(index, content, |_| true) {
            if score > GLOBAL_FUZZY_THRESHOLD {
                return Some(self.claim(candidate, MatchRule::GlobalFuzzy, score));
            }
        }

        if let Some(candidate) = self.unused_at(index) {
            let score = text_similarity(&self.previous[candidate].content, content);
            if score > SAME_POSITION_THRESHOLD {
                return Some(self.claim(candidate, MatchRule::SamePosition, score));
            }
        }

        None
    }

    fn claim(&mut self, candidate: usize, rule: MatchRule, score: f64) -> LineMatch {
        self.used[candidate] = true;
        LineMatch { previous: Some(candidate), rule, score }
    }

    fn unused(&self) -> impl Iterator<Item = (usize, &LineData)> + '_ {
        self.previous.iter().enumerate().filter(move |(candidate, _)| !self.used[*candidate])
    }

    fn first_unused(&self, predicate: impl Fn(&LineData) -> bool) -> Option<usize> {
        self.unused().find(|(_, prev)| predicate(prev)).map(|(candidate, _)| candidate)
    }

    fn unused_at(&self, index: usize) -> Option<usize> {
        self.first_unused(|prev| position(prev) == index)
    }

    /// Closest unused match by position; ties go to the earlier line.
    fn nearest_unused(&self, index: usize, predicate: impl Fn(&LineData) -> bool) -> Option<usize> {
        self.unused()
            .filter(|(_, prev)| predicate(prev))
            .min_by_key(|(candidate, prev)| (position(prev).abs_diff(index), *candidate))
            .map(|(candidate, _)| candidate)
    }

    /// Highest-scoring unused line whose position passes `in_range`.
    fn best_unused(
        &self,
        index: usize,
        content: &str,
        in_range: impl Fn(usize) -> bool,
    ) -> Option<(usize, f64)> {
        let mut best: Option<(usize, f64, usize)> = None;
        for (candidate, prev) in self.unused() {
            let prev_position = position(prev);
            if !in_range(prev_position) {
                continue;
            }
            let score = text_similarity(&prev.content, content);
            let distance = prev_position.abs_diff(index);
            let better = match best {
                None => true,
                Some((_, best_score, best_distance)) => {
                    score > best_score || (score == best_score && distance < best_distance)
                }
            };
            if better {
                best = Some((candidate, score, distance));
            }
        }
        best.map(|(candidate, score, _)| (candidate, score))
    }
}

fn position(line: &LineData) -> usize {
    line.line_number.saturating_sub(1)
}
