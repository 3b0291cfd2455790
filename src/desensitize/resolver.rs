// Copyright 2025
// SPDX-License-Identifier: Apache-2.0
//
// Span resolver: merges pattern and model candidates into one ordered,
// non-overlapping set
//
// Candidate order: start ascending, longer first, PATTERN before MODEL,
// higher confidence first, then entity type order. The order is total, so
// the result never depends on input order.

use std::cmp::Ordering;

use super::config::EntitySource;
use super::error::{DesensitizeError, Result};
use super::span::{ResolvedSpanSet, Span};

/// Resolve candidates from both sources into a `ResolvedSpanSet`
///
/// A model span overlapping any pattern span loses before the sweep, even
/// when it starts earlier: structured matches are exact, model spans are not.
pub fn resolve(pattern_spans: Vec<Span>, model_spans: Vec<Span>) -> Result<ResolvedSpanSet> {
    let pattern_spans = checked_source(pattern_spans, EntitySource::Pattern)?;
    let model_spans = checked_source(model_spans, EntitySource::Model)?;

    let model_total = model_spans.len();
    let model_spans: Vec<Span> = model_spans
        .into_iter()
        .filter(|span| !overlaps_any(&pattern_spans, span))
        .collect();
    let preempted = model_total - model_spans.len();

    let mut candidates = pattern_spans;
    candidates.extend(model_spans);
    candidates.sort_by(candidate_order);

    let total = candidates.len();
    let mut accepted: Vec<Span> = Vec::with_capacity(total);
    let mut last_end = 0;
    for candidate in candidates {
        if candidate.start >= last_end {
            last_end = candidate.end;
            accepted.push(candidate);
        }
    }

    tracing::debug!(
        candidates = total + preempted,
        preempted,
        dropped = total - accepted.len(),
        accepted = accepted.len(),
        "spans resolved"
    );

    ResolvedSpanSet::from_ordered(accepted)
}

/// Total order used by the sweep
pub fn candidate_order(a: &Span, b: &Span) -> Ordering {
    a.start
        .cmp(&b.start)
        .then_with(|| b.len().cmp(&a.len()))
        .then_with(|| a.source.priority_rank().cmp(&b.source.priority_rank()))
        .then_with(|| b.confidence.total_cmp(&a.confidence))
        .then_with(|| a.entity_type.cmp(&b.entity_type))
}

/// Sort one source's spans and verify the per-source invariants
fn checked_source(mut spans: Vec<Span>, source: EntitySource) -> Result<Vec<Span>> {
    for span in &spans {
        if span.source != source {
            return Err(DesensitizeError::StructuralViolation(format!(
                "{:?} span {}..{} passed as {:?} candidate",
                span.source, span.start, span.end, source
            )));
        }
        if span.start >= span.end {
            return Err(DesensitizeError::StructuralViolation(format!(
                "{:?} {} span has empty range {}..{}",
                source, span.entity_type, span.start, span.end
            )));
        }
    }

    spans.sort_by(candidate_order);
    if let Some(pair) = spans.windows(2).find(|pair| pair[0].end > pair[1].start) {
        return Err(DesensitizeError::StructuralViolation(format!(
            "{:?} spans {}..{} and {}..{} overlap within one source",
            source, pair[0].start, pair[0].end, pair[1].start, pair[1].end
        )));
    }
    Ok(spans)
}

/// `sorted` must be ordered and non-overlapping
fn overlaps_any(sorted: &[Span], span: &Span) -> bool {
    let idx = sorted.partition_point(|other| other.end <= span.start);
    sorted.get(idx).is_some_and(|other| other.start < span.end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::desensitize::config::EntityType;
    use crate::desensitize::span::test_span;

    fn pattern(start: usize, end: usize, entity_type: EntityType) -> Span {
        test_span(start, end, entity_type, EntitySource::Pattern, "x")
    }

    fn model(start: usize, end: usize, entity_type: EntityType) -> Span {
        test_span(start, end, entity_type, EntitySource::Model, "x")
    }

    fn ranges(set: &ResolvedSpanSet) -> Vec<(usize, usize, EntitySource)> {
        set.iter().map(|s| (s.start, s.end, s.source)).collect()
    }

    #[test]
    fn test_empty_candidates() {
        let set = resolve(Vec::new(), Vec::new()).unwrap();
        assert!(set.is_empty());
    }

    #[test]
    fn test_identical_range_pattern_wins() {
        let set = resolve(
            vec![pattern(8, 19, EntityType::Phone)],
            vec![model(8, 19, EntityType::Person)],
        )
        .unwrap();
        assert_eq!(ranges(&set), vec![(8, 19, EntitySource::Pattern)]);
        assert_eq!(set.as_slice()[0].entity_type, EntityType::Phone);
    }

    #[test]
    fn test_model_half_of_phone_suppressed() {
        // model span starts inside the phone number
        let set = resolve(
            vec![pattern(8, 19, EntityType::Phone)],
            vec![model(13, 19, EntityType::Person)],
        )
        .unwrap();
        assert_eq!(ranges(&set), vec![(8, 19, EntitySource::Pattern)]);
    }

    #[test]
    fn test_model_starting_earlier_still_loses() {
        let set = resolve(
            vec![pattern(5, 16, EntityType::Phone)],
            vec![model(3, 8, EntityType::Person), model(0, 2, EntityType::Person)],
        )
        .unwrap();
        assert_eq!(
            ranges(&set),
            vec![(0, 2, EntitySource::Model), (5, 16, EntitySource::Pattern)]
        );
    }

    #[test]
    fn test_disjoint_spans_kept_in_order() {
        let set = resolve(
            vec![pattern(10, 21, EntityType::Phone)],
            vec![model(3, 5, EntityType::Person), model(25, 27, EntityType::Location)],
        )
        .unwrap();
        assert_eq!(
            ranges(&set),
            vec![
                (3, 5, EntitySource::Model),
                (10, 21, EntitySource::Pattern),
                (25, 27, EntitySource::Model)
            ]
        );
    }

    #[test]
    fn test_adjacent_spans_both_kept() {
        let set = resolve(
            vec![pattern(2, 13, EntityType::Phone)],
            vec![model(0, 2, EntityType::Person)],
        )
        .unwrap();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_order_independent() {
        let patterns = vec![pattern(20, 31, EntityType::Phone), pattern(0, 4, EntityType::Email)];
        let models = vec![model(10, 12, EntityType::Person), model(5, 8, EntityType::Location)];

        let forward = resolve(patterns.clone(), models.clone()).unwrap();
        let reversed = resolve(
            patterns.into_iter().rev().collect(),
            models.into_iter().rev().collect(),
        )
        .unwrap();
        assert_eq!(forward, reversed);
    }

    #[test]
    fn test_candidate_order_longer_first() {
        let short = pattern(0, 2, EntityType::Phone);
        let long = model(0, 5, EntityType::Person);
        assert_eq!(candidate_order(&long, &short), Ordering::Less);
    }

    #[test]
    fn test_candidate_order_pattern_then_confidence() {
        let p = pattern(0, 2, EntityType::Phone);
        let mut m = model(0, 2, EntityType::Person);
        assert_eq!(candidate_order(&p, &m), Ordering::Less);

        let mut other = model(0, 2, EntityType::Location);
        m.confidence = 0.6;
        other.confidence = 0.9;
        assert_eq!(candidate_order(&other, &m), Ordering::Less);
    }

    #[test]
    fn test_overlap_within_source_is_violation() {
        let err = resolve(
            Vec::new(),
            vec![model(0, 4, EntityType::Person), model(2, 6, EntityType::Location)],
        )
        .unwrap_err();
        assert!(matches!(err, DesensitizeError::StructuralViolation(_)));
    }

    #[test]
    fn test_wrong_source_is_violation() {
        let err = resolve(vec![model(0, 4, EntityType::Person)], Vec::new()).unwrap_err();
        assert!(matches!(err, DesensitizeError::StructuralViolation(_)));
    }

    #[test]
    fn test_empty_span_is_violation() {
        let err = resolve(vec![pattern(3, 3, EntityType::Phone)], Vec::new()).unwrap_err();
        assert!(matches!(err, DesensitizeError::StructuralViolation(_)));
    }
}
