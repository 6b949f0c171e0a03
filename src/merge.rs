//! Overlap and duplicate resolution across detectors.
//!
//! Spans of one block are grouped by union-find over the "overlaps more
//! than the threshold" relation, so chains of partial overlaps collapse to a
//! single winner. A final sweep guarantees the non-overlap postcondition even
//! for pairs that overlap by less than the threshold.

use std::cmp::Ordering;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::ReplacementError;
use crate::normalize::NormalizedText;
use crate::span::{ResolvedSpan, Span};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    /// Overlap ratio above which two spans are the same detection.
    pub default_threshold: f64,
    /// Per-category overrides of `default_threshold`.
    pub category_thresholds: HashMap<String, f64>,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            default_threshold: 0.5,
            category_thresholds: HashMap::new(),
        }
    }
}

impl MergeConfig {
    pub fn threshold_for(&self, category: &str) -> f64 {
        self.category_thresholds
            .get(category)
            .copied()
            .unwrap_or(self.default_threshold)
    }

    /// Two spans of different categories use the more permissive threshold.
    fn pair_threshold(&self, a: &Span, b: &Span) -> f64 {
        self.threshold_for(&a.category).min(self.threshold_for(&b.category))
    }
}

/// Result of merging the spans of one block.
#[derive(Debug, Clone, Default)]
pub struct MergeOutcome {
    /// Winners, ascending by start, pairwise non-overlapping.
    pub resolved: Vec<ResolvedSpan>,
    /// Spans that failed validation and could not be re-anchored.
    pub rejected: Vec<(Span, ReplacementError)>,
    /// Spans whose offsets were wrong but whose text was found elsewhere in
    /// the block.
    pub reanchored: usize,
    /// Spans that lost to a group winner or to the final sweep.
    pub discarded: usize,
}

#[derive(Debug, Clone, Default)]
pub struct SpanMerger {
    config: MergeConfig,
}

impl SpanMerger {
    pub fn new(config: MergeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MergeConfig {
        &self.config
    }

    /// Validate `spans` against the block text, then resolve overlaps.
    pub fn merge(&self, block_text: &str, spans: Vec<Span>) -> MergeOutcome {
        let mut outcome = MergeOutcome::default();
        let mut valid = Vec::with_capacity(spans.len());
        let normalized = NormalizedText::new(block_text);

        for span in spans {
            match span.validate(block_text) {
                Ok(()) => valid.push(span),
                Err(err @ (ReplacementError::TextMismatch { .. } | ReplacementError::OutOfBounds { .. })) => {
                    match reanchor(&span, &normalized) {
                        Some(moved) => {
                            log::debug!(
                                "{}: re-anchored {:?} from {} to {}",
                                span.block_id,
                                span.original_text,
                                span.start,
                                moved.start
                            );
                            outcome.reanchored += 1;
                            valid.push(moved);
                        }
                        None => {
                            log::warn!("{}: dropping span {:?}: {err}", span.block_id, span.original_text);
                            outcome.rejected.push((span, err));
                        }
                    }
                }
                Err(err) => {
                    log::warn!("{}: dropping span {:?}: {err}", span.block_id, span.original_text);
                    outcome.rejected.push((span, err));
                }
            }
        }

        let input = valid.len();
        outcome.resolved = self.resolve(valid);
        outcome.discarded = input - outcome.resolved.len();
        outcome
    }

    /// Resolve overlaps among already validated spans of one block.
    pub fn resolve(&self, spans: Vec<Span>) -> Vec<ResolvedSpan> {
        let spans: Vec<Span> = spans.into_iter().filter(|s| !s.is_empty()).collect();
        let n = spans.len();
        let mut groups = UnionFind::new(n);
        for i in 0..n {
            for j in (i + 1)..n {
                let (a, b) = (&spans[i], &spans[j]);
                if a.block_id == b.block_id && a.overlap_ratio(b) > self.config.pair_threshold(a, b) {
                    groups.union(i, j);
                }
            }
        }

        // Group winners.
        let mut members: HashMap<usize, Vec<usize>> = HashMap::new();
        for i in 0..n {
            members.entry(groups.find(i)).or_default().push(i);
        }
        let mut winners: Vec<(usize, usize)> = members
            .values()
            .map(|group| {
                let best = group
                    .iter()
                    .copied()
                    .max_by(|&a, &b| rank(&spans[a], a, &spans[b], b))
                    .unwrap_or(group[0]);
                if group.len() > 1 {
                    log::debug!(
                        "{}: {} overlapping spans collapsed onto {:?} ({})",
                        spans[best].block_id,
                        group.len(),
                        spans[best].original_text,
                        spans[best].source_method
                    );
                }
                (best, group.len())
            })
            .collect();

        // Strongest first, so the sweep keeps the better of any residual
        // overlapping pair.
        winners.sort_by(|&(a, _), &(b, _)| rank(&spans[b], b, &spans[a], a));
        let mut accepted: Vec<(usize, usize)> = Vec::with_capacity(winners.len());
        for (idx, size) in winners {
            let clash = accepted.iter().any(|&(other, _)| spans[idx].overlaps(&spans[other]));
            if clash {
                log::debug!(
                    "{}: {:?} dropped, overlaps a stronger span",
                    spans[idx].block_id,
                    spans[idx].original_text
                );
                continue;
            }
            accepted.push((idx, size));
        }
        accepted.sort_by_key(|&(idx, _)| (spans[idx].start, spans[idx].end));

        accepted
            .into_iter()
            .map(|(idx, group_size)| ResolvedSpan {
                winning_method: spans[idx].source_method,
                span: spans[idx].clone(),
                group_size,
            })
            .collect()
    }
}

/// Total order used to pick winners: method priority, then confidence,
/// then length, then earlier start, then earlier input position.
fn rank(a: &Span, ai: usize, b: &Span, bi: usize) -> Ordering {
    a.source_method
        .priority()
        .cmp(&b.source_method.priority())
        .then(a.confidence.total_cmp(&b.confidence))
        .then(a.len().cmp(&b.len()))
        .then(b.start.cmp(&a.start))
        .then(bi.cmp(&ai))
}

/// Move a span whose offsets are stale onto the occurrence of its text
/// nearest to where it claimed to be.
fn reanchor(span: &Span, text: &NormalizedText) -> Option<Span> {
    if span.original_text.is_empty() || !(0.0..=1.0).contains(&span.confidence) {
        return None;
    }
    let start = text
        .find_all(&span.original_text)
        .into_iter()
        .min_by_key(|&s| s.abs_diff(span.start))?;
    let len = span.original_text.chars().count();
    Some(Span {
        start,
        end: start + len,
        ..span.clone()
    })
}

struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            self.parent[ra.max(rb)] = ra.min(rb);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::DetectionMethod;

    fn span(start: usize, end: usize, text: &str, conf: f64, method: DetectionMethod) -> Span {
        Span {
            block_id: "p-0".to_string(),
            start,
            end,
            original_text: text.to_string(),
            category: "organization".to_string(),
            confidence: conf,
            source_method: method,
        }
    }

    #[test]
    fn test_dictionary_beats_more_confident_model_containing_it() {
        let text = "Limited Liability Co Horns and Hooves";
        let model = span(0, 20, "Limited Liability Co", 0.7, DetectionMethod::StatisticalModel);
        let dict = span(2, 18, "mited Liability ", 0.98, DetectionMethod::ExactDictionary);
        let outcome = SpanMerger::default().merge(text, vec![model, dict.clone()]);
        assert_eq!(outcome.resolved.len(), 1);
        assert_eq!(outcome.resolved[0].span, dict);
        assert_eq!(outcome.resolved[0].winning_method, DetectionMethod::ExactDictionary);
        assert_eq!(outcome.resolved[0].group_size, 2);
        assert_eq!(outcome.discarded, 1);
    }

    #[test]
    fn test_transitive_grouping() {
        // a~b and b~c exceed the threshold, a~c does not.
        let a = span(0, 10, "", 0.9, DetectionMethod::Heuristic);
        let b = span(4, 14, "", 0.5, DetectionMethod::StatisticalModel);
        let c = span(8, 18, "", 0.6, DetectionMethod::Heuristic);
        assert!(a.overlap_ratio(&c) < 0.5);
        let resolved = SpanMerger::default().resolve(vec![a, b.clone(), c]);
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].span, b);
        assert_eq!(resolved[0].group_size, 3);
    }

    #[test]
    fn test_tie_breaks() {
        let short = span(0, 5, "", 0.8, DetectionMethod::StructuredPattern);
        let long = span(0, 6, "", 0.8, DetectionMethod::StructuredPattern);
        let resolved = SpanMerger::default().resolve(vec![short.clone(), long.clone()]);
        assert_eq!(resolved[0].span, long);

        let confident = span(1, 6, "", 0.9, DetectionMethod::StructuredPattern);
        let resolved = SpanMerger::default().resolve(vec![long, confident.clone()]);
        assert_eq!(resolved[0].span, confident);

        // Identical candidates: the first one wins.
        let mut twin = short.clone();
        twin.category = "other".to_string();
        let resolved = SpanMerger::default().resolve(vec![short.clone(), twin]);
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].span, short);
    }

    #[test]
    fn test_small_overlap_is_swept() {
        let a = span(0, 10, "", 0.9, DetectionMethod::StructuredPattern);
        let b = span(8, 30, "", 0.9, DetectionMethod::Heuristic);
        let c = span(40, 45, "", 0.1, DetectionMethod::Heuristic);
        let resolved = SpanMerger::default().resolve(vec![b, c.clone(), a.clone()]);
        let kept: Vec<&Span> = resolved.iter().map(|r| &r.span).collect();
        assert_eq!(kept, vec![&a, &c]);
    }

    #[test]
    fn test_category_threshold() {
        let mut config = MergeConfig::default();
        config.category_thresholds.insert("organization".to_string(), 0.9);
        let a = span(0, 10, "", 0.9, DetectionMethod::Heuristic);
        let b = span(2, 12, "", 0.9, DetectionMethod::Heuristic);
        // 0.8 overlap: below the category threshold, so not grouped, but
        // the sweep still removes the weaker one.
        let resolved = SpanMerger::new(config).resolve(vec![a.clone(), b]);
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].group_size, 1);
        assert_eq!(resolved[0].span, a);
    }

    #[test]
    fn test_malformed_spans_are_dropped_or_reanchored() {
        let text = "Contact: John Smith, phone 555-1234";
        let stale = span(28, 36, "555-1234", 0.9, DetectionMethod::StructuredPattern);
        let absent = span(0, 4, "Jane", 0.9, DetectionMethod::StatisticalModel);
        let empty = span(5, 5, "", 0.9, DetectionMethod::StatisticalModel);
        let outcome = SpanMerger::default().merge(text, vec![stale, absent, empty]);
        assert_eq!(outcome.reanchored, 1);
        assert_eq!(outcome.rejected.len(), 2);
        assert_eq!(outcome.resolved.len(), 1);
        assert_eq!((outcome.resolved[0].span.start, outcome.resolved[0].span.end), (27, 35));
    }
}
