// Copyright 2025
// SPDX-License-Identifier: Apache-2.0
//
// Adapter around the external statistical entity recognizer
//
// The recognizer is a black box returning (start, end, label, score) in its
// own offset unit. Everything past this module sees code-point `Span`s only.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use super::config::{EntitySource, EntityType};
use super::error::{DesensitizeError, RecognizerError, Result};
use super::span::{CharIndex, Span};

/// Unit of the offsets a recognizer reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffsetUnit {
    /// Unicode scalar values (Python `str` indices)
    CodePoint,
    /// UTF-8 bytes (Rust `str` indices)
    Utf8Byte,
    /// UTF-16 code units (JavaScript / Java string indices)
    Utf16,
}

/// One entity as reported by the recognizer, before normalization
#[derive(Debug, Clone, PartialEq)]
pub struct RawEntity {
    pub start: usize,
    pub end: usize,
    pub label: String,
    pub score: Option<f64>,
}

impl RawEntity {
    pub fn new(start: usize, end: usize, label: impl Into<String>, score: Option<f64>) -> Self {
        Self {
            start,
            end,
            label: label.into(),
            score,
        }
    }
}

/// External named-entity recognizer
///
/// Implementations must tolerate concurrent `recognize` calls. Models that
/// cannot should be wrapped in [`SerializedRecognizer`].
pub trait EntityRecognizer: Send + Sync {
    fn offset_unit(&self) -> OffsetUnit;

    fn recognize(&self, text: &str) -> std::result::Result<Vec<RawEntity>, RecognizerError>;

    /// Human-readable name (used in log events)
    fn name(&self) -> &str {
        "recognizer"
    }
}

type RecognizeFn = dyn FnMut(&str) -> std::result::Result<Vec<RawEntity>, RecognizerError> + Send;

/// Serializes access to a recognizer that is not safe to call concurrently
pub struct SerializedRecognizer {
    inner: Mutex<Box<RecognizeFn>>,
    unit: OffsetUnit,
    name: String,
}

impl SerializedRecognizer {
    pub fn new<F>(name: impl Into<String>, unit: OffsetUnit, recognize: F) -> Self
    where
        F: FnMut(&str) -> std::result::Result<Vec<RawEntity>, RecognizerError> + Send + 'static,
    {
        Self {
            inner: Mutex::new(Box::new(recognize)),
            unit,
            name: name.into(),
        }
    }
}

impl EntityRecognizer for SerializedRecognizer {
    fn offset_unit(&self) -> OffsetUnit {
        self.unit
    }

    fn recognize(&self, text: &str) -> std::result::Result<Vec<RawEntity>, RecognizerError> {
        // A panic inside the model poisons the lock; the closure keeps no
        // state the adapter depends on, so later calls proceed
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let recognize: &mut RecognizeFn = &mut **guard;
        recognize(text)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Convert `(word, tag)` output into code-point `RawEntity`s
///
/// Taggers that emit a word sequence without offsets are located by a
/// forward search starting where the previous word ended. Words that cannot
/// be found are skipped without moving the cursor.
pub fn entities_from_word_tags<W, T>(text: &str, pairs: &[(W, T)]) -> Vec<RawEntity>
where
    W: AsRef<str>,
    T: AsRef<str>,
{
    let index = CharIndex::new(text);
    let mut cursor = 0;
    let mut entities = Vec::new();

    for (word, tag) in pairs {
        let word = word.as_ref();
        if word.is_empty() {
            continue;
        }
        let Some(found) = text[cursor..].find(word) else {
            continue;
        };
        let start = cursor + found;
        let end = start + word.len();
        cursor = end;

        if let (Some(start), Some(end)) = (index.byte_to_char(start), index.byte_to_char(end)) {
            entities.push(RawEntity::new(start, end, tag.as_ref(), None));
        }
    }

    entities
}

/// Map a recognizer label to an entity type; unsupported labels yield `None`
pub fn map_label(label: &str) -> Option<EntityType> {
    let trimmed = label.trim();
    let base = ["B-", "I-", "E-", "S-"]
        .iter()
        .find_map(|prefix| trimmed.strip_prefix(prefix))
        .unwrap_or(trimmed);

    match base {
        "PER" | "PERSON" | "nr" | "人物类_实体" => Some(EntityType::Person),
        "LOC" | "LOCATION" | "GPE" | "ns" | "地点类_实体" => Some(EntityType::Location),
        "ORG" | "ORGANIZATION" | "nt" | "组织机构类_实体" => Some(EntityType::Organization),
        "TIME" | "DATE" | "t" | "时间类_实体" => Some(EntityType::Time),
        _ => None,
    }
}

/// Upper bound on inference workers alive at once, including abandoned ones
pub const DEFAULT_MAX_INFERENCE_WORKERS: usize = 16;

/// Normalizes recognizer output into model-sourced `Span`s
#[derive(Clone)]
pub struct RecognizerAdapter {
    recognizer: Arc<dyn EntityRecognizer>,
    min_confidence: f64,
    /// Types kept from the model; `None` keeps every supported type
    entity_types: Option<Vec<EntityType>>,
    max_workers: usize,
    /// Shared by clones so the bound holds across all callers
    workers: Arc<AtomicUsize>,
}

/// Releases an inference worker slot when the worker finishes, even by panic
struct WorkerSlot(Arc<AtomicUsize>);

impl Drop for WorkerSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl RecognizerAdapter {
    pub fn new(recognizer: Arc<dyn EntityRecognizer>) -> Self {
        Self {
            recognizer,
            min_confidence: 0.0,
            entity_types: None,
            max_workers: DEFAULT_MAX_INFERENCE_WORKERS,
            workers: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Keep only these types; others are dropped before overlaps are removed
    pub fn with_entity_types(mut self, entity_types: Vec<EntityType>) -> Self {
        self.entity_types = Some(entity_types);
        self
    }

    /// Bound the number of timed inference workers alive at once
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers.max(1);
        self
    }

    /// Timed inference workers still running, abandoned ones included
    pub fn active_workers(&self) -> usize {
        self.workers.load(Ordering::SeqCst)
    }

    /// Drop model spans scoring below `min_confidence`
    pub fn with_min_confidence(mut self, min_confidence: f64) -> Self {
        self.min_confidence = min_confidence;
        self
    }

    pub fn recognizer_name(&self) -> &str {
        self.recognizer.name()
    }

    /// Run the recognizer and normalize its output
    pub fn detect(&self, text: &str, timeout: Option<Duration>) -> Result<Vec<Span>> {
        self.detect_indexed(text, &CharIndex::new(text), timeout)
    }

    pub fn detect_indexed(
        &self,
        text: &str,
        index: &CharIndex,
        timeout: Option<Duration>,
    ) -> Result<Vec<Span>> {
        let raw = self.call(text, timeout)?;
        Ok(self.normalize(text, index, raw))
    }

    fn call(&self, text: &str, timeout: Option<Duration>) -> Result<Vec<RawEntity>> {
        let Some(timeout) = timeout else {
            return match panic::catch_unwind(AssertUnwindSafe(|| self.recognizer.recognize(text)))
            {
                Ok(result) => result.map_err(Into::into),
                Err(_) => Err(DesensitizeError::RecognizerUnavailable(format!(
                    "{} panicked during inference",
                    self.recognizer.name()
                ))),
            };
        };

        // A worker that outlives its timeout cannot be stopped, only counted:
        // once `max_workers` are busy, calls fail fast instead of spawning more
        let reserved = self
            .workers
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < self.max_workers).then_some(n + 1)
            })
            .is_ok();
        if !reserved {
            return Err(DesensitizeError::RecognizerUnavailable(format!(
                "{} has {} inference workers still running",
                self.recognizer.name(),
                self.max_workers
            )));
        }
        let slot = WorkerSlot(Arc::clone(&self.workers));

        // The worker owns its inputs so an abandoned call cannot outlive borrowed data
        let (tx, rx) = mpsc::sync_channel(1);
        let recognizer = Arc::clone(&self.recognizer);
        let owned = text.to_owned();
        thread::Builder::new()
            .name("ner-inference".to_string())
            .spawn(move || {
                let _slot = slot;
                let _ = tx.send(recognizer.recognize(&owned));
            })
            .map_err(|e| {
                DesensitizeError::RecognizerUnavailable(format!(
                    "failed to spawn inference worker: {}",
                    e
                ))
            })?;

        match rx.recv_timeout(timeout) {
            Ok(result) => result.map_err(Into::into),
            Err(RecvTimeoutError::Timeout) => Err(DesensitizeError::RecognizerUnavailable(format!(
                "{} timed out after {} ms",
                self.recognizer.name(),
                timeout.as_millis()
            ))),
            Err(RecvTimeoutError::Disconnected) => {
                Err(DesensitizeError::RecognizerUnavailable(format!(
                    "{} worker exited without a result",
                    self.recognizer.name()
                )))
            }
        }
    }

    /// Convert offsets, filter labels and scores, and remove self-overlaps
    pub fn normalize(&self, text: &str, index: &CharIndex, raw: Vec<RawEntity>) -> Vec<Span> {
        let unit = self.recognizer.offset_unit();
        let total = raw.len();
        let mut invalid = 0;
        let mut spans = Vec::new();

        for entity in raw {
            let Some(entity_type) = map_label(&entity.label) else {
                continue;
            };
            if let Some(enabled) = &self.entity_types {
                if !enabled.contains(&entity_type) {
                    continue;
                }
            }

            let converted = match unit {
                OffsetUnit::CodePoint => Some((entity.start, entity.end)),
                OffsetUnit::Utf8Byte => index
                    .byte_to_char(entity.start)
                    .zip(index.byte_to_char(entity.end)),
                OffsetUnit::Utf16 => index
                    .utf16_to_char(entity.start)
                    .zip(index.utf16_to_char(entity.end)),
            };
            let Some((start, end)) = converted.filter(|(start, end)| start < end) else {
                invalid += 1;
                continue;
            };
            let Some(literal) = index.slice(text, start, end) else {
                invalid += 1;
                continue;
            };

            let confidence = match entity.score {
                Some(score) if score.is_finite() => score.clamp(0.0, 1.0),
                Some(_) => {
                    invalid += 1;
                    continue;
                }
                None => 1.0,
            };
            if confidence < self.min_confidence {
                continue;
            }

            spans.push(Span {
                start,
                end,
                entity_type,
                source: EntitySource::Model,
                confidence,
                text: literal.to_string(),
            });
        }

        if invalid > 0 {
            tracing::warn!(
                recognizer = self.recognizer.name(),
                invalid,
                "dropped recognizer entities with invalid offsets or scores"
            );
        }

        let spans = dedup_overlapping(spans);
        tracing::debug!(
            recognizer = self.recognizer.name(),
            reported = total,
            kept = spans.len(),
            "recognizer output normalized"
        );
        spans
    }
}

/// Keep the earliest, then longest, then most confident of overlapping spans
fn dedup_overlapping(mut spans: Vec<Span>) -> Vec<Span> {
    spans.sort_by(|a, b| {
        a.start
            .cmp(&b.start)
            .then_with(|| b.len().cmp(&a.len()))
            .then_with(|| b.confidence.total_cmp(&a.confidence))
            .then_with(|| a.entity_type.cmp(&b.entity_type))
    });

    let mut kept: Vec<Span> = Vec::with_capacity(spans.len());
    for span in spans {
        if let Some(last) = kept.last() {
            if last.end > span.start {
                continue;
            }
        }
        kept.push(span);
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedRecognizer {
        unit: OffsetUnit,
        entities: Vec<RawEntity>,
    }

    impl EntityRecognizer for FixedRecognizer {
        fn offset_unit(&self) -> OffsetUnit {
            self.unit
        }

        fn recognize(&self, _text: &str) -> std::result::Result<Vec<RawEntity>, RecognizerError> {
            Ok(self.entities.clone())
        }
    }

    struct SlowRecognizer;

    impl EntityRecognizer for SlowRecognizer {
        fn offset_unit(&self) -> OffsetUnit {
            OffsetUnit::CodePoint
        }

        fn recognize(&self, _text: &str) -> std::result::Result<Vec<RawEntity>, RecognizerError> {
            thread::sleep(Duration::from_millis(500));
            Ok(vec![RawEntity::new(0, 2, "PER", None)])
        }
    }

    struct PanickingRecognizer;

    impl EntityRecognizer for PanickingRecognizer {
        fn offset_unit(&self) -> OffsetUnit {
            OffsetUnit::CodePoint
        }

        fn recognize(&self, _text: &str) -> std::result::Result<Vec<RawEntity>, RecognizerError> {
            panic!("model crashed")
        }
    }

    fn adapter(unit: OffsetUnit, entities: Vec<RawEntity>) -> RecognizerAdapter {
        RecognizerAdapter::new(Arc::new(FixedRecognizer { unit, entities }))
    }

    #[test]
    fn test_map_label() {
        assert_eq!(map_label("PER"), Some(EntityType::Person));
        assert_eq!(map_label("B-LOC"), Some(EntityType::Location));
        assert_eq!(map_label("组织机构类_实体"), Some(EntityType::Organization));
        assert_eq!(map_label("t"), Some(EntityType::Time));
        assert_eq!(map_label("MISC"), None);
        assert_eq!(map_label("n"), None);
    }

    #[test]
    fn test_code_point_offsets() {
        let text = "联系人张三，电话";
        let spans = adapter(OffsetUnit::CodePoint, vec![RawEntity::new(3, 5, "PER", Some(0.9))])
            .detect(text, None)
            .unwrap();

        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].text, "张三");
        assert_eq!((spans[0].start, spans[0].end), (3, 5));
        assert_eq!(spans[0].source, EntitySource::Model);
        assert_eq!(spans[0].confidence, 0.9);
    }

    #[test]
    fn test_byte_offsets_converted() {
        // 张三 sits at bytes 9..15 behind three 3-byte characters
        let text = "联系人张三，电话";
        let spans = adapter(OffsetUnit::Utf8Byte, vec![RawEntity::new(9, 15, "PER", None)])
            .detect(text, None)
            .unwrap();

        assert_eq!((spans[0].start, spans[0].end), (3, 5));
        assert_eq!(spans[0].text, "张三");
        assert_eq!(spans[0].confidence, 1.0);
    }

    #[test]
    fn test_byte_offsets_inside_character_dropped() {
        let text = "联系人张三";
        let spans = adapter(OffsetUnit::Utf8Byte, vec![RawEntity::new(10, 15, "PER", None)])
            .detect(text, None)
            .unwrap();
        assert!(spans.is_empty());
    }

    #[test]
    fn test_utf16_offsets_converted() {
        // the emoji takes two UTF-16 units, so 李白 starts at unit 3
        let text = "😀我李白";
        let spans = adapter(OffsetUnit::Utf16, vec![RawEntity::new(3, 5, "PER", None)])
            .detect(text, None)
            .unwrap();

        assert_eq!((spans[0].start, spans[0].end), (2, 4));
        assert_eq!(spans[0].text, "李白");
    }

    #[test]
    fn test_out_of_range_and_unsupported_labels_dropped() {
        let text = "北京";
        let spans = adapter(
            OffsetUnit::CodePoint,
            vec![
                RawEntity::new(0, 9, "LOC", None),
                RawEntity::new(0, 2, "MISC", None),
                RawEntity::new(1, 1, "LOC", None),
            ],
        )
        .detect(text, None)
        .unwrap();
        assert!(spans.is_empty());
    }

    #[test]
    fn test_self_overlaps_removed() {
        let text = "北京市朝阳区";
        let spans = adapter(
            OffsetUnit::CodePoint,
            vec![
                RawEntity::new(0, 2, "LOC", Some(0.8)),
                RawEntity::new(0, 6, "LOC", Some(0.7)),
                RawEntity::new(3, 6, "LOC", Some(0.9)),
            ],
        )
        .detect(text, None)
        .unwrap();

        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].text, "北京市朝阳区");
    }

    #[test]
    fn test_min_confidence_and_score_clamp() {
        let text = "张三李四";
        let spans = adapter(
            OffsetUnit::CodePoint,
            vec![
                RawEntity::new(0, 2, "PER", Some(0.2)),
                RawEntity::new(2, 4, "PER", Some(1.7)),
            ],
        )
        .with_min_confidence(0.5)
        .detect(text, None)
        .unwrap();

        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].text, "李四");
        assert_eq!(spans[0].confidence, 1.0);
    }

    #[test]
    fn test_word_tags_located_in_order() {
        let text = "张三和张三去了北京";
        let pairs = [
            ("张三", "PER"),
            ("和", "c"),
            ("张三", "PER"),
            ("去了", "v"),
            ("北京", "LOC"),
        ];
        let raw = entities_from_word_tags(text, &pairs);

        assert_eq!(raw.len(), 5);
        assert_eq!((raw[0].start, raw[0].end), (0, 2));
        assert_eq!((raw[2].start, raw[2].end), (3, 5));
        assert_eq!((raw[4].start, raw[4].end), (7, 9));
    }

    #[test]
    fn test_word_tags_missing_word_skipped() {
        let raw = entities_from_word_tags("李白是诗人", &[("杜甫", "PER"), ("李白", "PER")]);
        assert_eq!(raw, vec![RawEntity::new(0, 2, "PER", None)]);
    }

    #[test]
    fn test_timeout_surfaces_unavailable() {
        let adapter = RecognizerAdapter::new(Arc::new(SlowRecognizer));
        let err = adapter
            .detect("张三", Some(Duration::from_millis(20)))
            .unwrap_err();
        assert!(matches!(err, DesensitizeError::RecognizerUnavailable(_)));
    }

    #[test]
    fn test_timeout_not_hit() {
        let adapter = adapter(OffsetUnit::CodePoint, vec![RawEntity::new(0, 2, "PER", None)]);
        let spans = adapter
            .detect("张三", Some(Duration::from_secs(5)))
            .unwrap();
        assert_eq!(spans.len(), 1);
    }

    #[test]
    fn test_panicking_recognizer() {
        let adapter = RecognizerAdapter::new(Arc::new(PanickingRecognizer));
        assert!(matches!(
            adapter.detect("张三", None),
            Err(DesensitizeError::RecognizerUnavailable(_))
        ));
        assert!(matches!(
            adapter.detect("张三", Some(Duration::from_secs(5))),
            Err(DesensitizeError::RecognizerUnavailable(_))
        ));
    }

    #[test]
    fn test_serialized_recognizer() {
        let mut calls = 0;
        let recognizer = SerializedRecognizer::new("counting", OffsetUnit::CodePoint, move |_text| {
            calls += 1;
            Ok(vec![RawEntity::new(0, 2, "PER", Some(calls as f64 / 10.0))])
        });
        let adapter = RecognizerAdapter::new(Arc::new(recognizer));

        assert_eq!(adapter.recognizer_name(), "counting");
        assert_eq!(adapter.detect("张三", None).unwrap()[0].confidence, 0.1);
        assert_eq!(adapter.detect("张三", None).unwrap()[0].confidence, 0.2);
    }

    #[test]
    fn test_serialized_recognizer_recovers_after_panic() {
        let mut calls = 0;
        let recognizer = SerializedRecognizer::new("flaky", OffsetUnit::CodePoint, move |_text| {
            calls += 1;
            if calls == 1 {
                panic!("transient model failure");
            }
            Ok(vec![RawEntity::new(0, 2, "PER", None)])
        });
        let adapter = RecognizerAdapter::new(Arc::new(recognizer));

        assert!(matches!(
            adapter.detect("张三", None),
            Err(DesensitizeError::RecognizerUnavailable(_))
        ));
        let spans = adapter.detect("张三", None).unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].text, "张三");
    }

    #[test]
    fn test_disabled_type_cannot_displace_enabled_one() {
        let text = "北京大学的张三";
        let spans = adapter(
            OffsetUnit::CodePoint,
            vec![
                RawEntity::new(0, 4, "ORG", Some(0.9)),
                RawEntity::new(0, 2, "LOC", Some(0.8)),
            ],
        )
        .with_entity_types(vec![EntityType::Person, EntityType::Location])
        .detect(text, None)
        .unwrap();

        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].entity_type, EntityType::Location);
        assert_eq!(spans[0].text, "北京");
    }

    #[test]
    fn test_inference_workers_bounded() {
        let adapter = RecognizerAdapter::new(Arc::new(SlowRecognizer)).with_max_workers(1);

        let first = adapter.detect("张三", Some(Duration::from_millis(20)));
        assert!(matches!(first, Err(DesensitizeError::RecognizerUnavailable(_))));
        assert_eq!(adapter.active_workers(), 1);

        // the abandoned worker still holds the only slot
        let err = adapter
            .detect("张三", Some(Duration::from_secs(5)))
            .unwrap_err();
        assert!(err.to_string().contains("inference workers still running"));

        for _ in 0..100 {
            if adapter.active_workers() == 0 {
                break;
            }
            thread::sleep(Duration::from_millis(20));
        }
        assert_eq!(adapter.active_workers(), 0);
        assert_eq!(
            adapter
                .detect("张三", Some(Duration::from_secs(5)))
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn test_recognizer_error_maps_to_unavailable() {
        let recognizer = SerializedRecognizer::new("failing", OffsetUnit::CodePoint, |_text| {
            Err(RecognizerError::new("model not loaded"))
        });
        let err = RecognizerAdapter::new(Arc::new(recognizer))
            .detect("张三", None)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "entity recognizer unavailable: model not loaded"
        );
    }
}
