// Copyright 2025
// SPDX-License-Identifier: Apache-2.0
//
// Desensitization pipeline: patterns + recognizer -> resolver -> masking

use std::sync::Arc;
use std::time::Duration;

use super::config::{DesensitizeConfig, EntityType, MaskingPolicy};
use super::error::{DesensitizeError, Result};
use super::masking::{self, MaskingOptions, RedactionResult};
use super::patterns::PatternMatcher;
use super::recognizer::{EntityRecognizer, RecognizerAdapter};
use super::resolver;
use super::span::{CharIndex, ResolvedSpanSet};

/// Resolved spans for one text, before masking
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub spans: ResolvedSpanSet,
    /// Model detection was requested but did not run
    pub recognizer_skipped: bool,
    pub warnings: Vec<String>,
}

/// Main entry point
///
/// Holds only immutable state (compiled patterns, the shared recognizer
/// handle), so one instance can serve any number of threads.
///
/// # Example
/// ```
/// use desensitize_rust::desensitize::{
///     Desensitizer, DesensitizeConfig, EntityType, MaskingPolicy, MaskingStrategy,
/// };
///
/// let desensitizer = Desensitizer::new(DesensitizeConfig::default()).unwrap();
/// let policy = MaskingPolicy::new(MaskingStrategy::Placeholder)
///     .with(EntityType::Phone, MaskingStrategy::Partial);
///
/// let result = desensitizer.process("电话13812345678", Some(&policy)).unwrap();
/// assert_eq!(result.text, "电话138****5678");
/// ```
pub struct Desensitizer {
    config: DesensitizeConfig,
    patterns: PatternMatcher,
    recognizer: Option<RecognizerAdapter>,
}

impl Desensitizer {
    /// Create a pattern-only desensitizer; attach a recognizer with
    /// [`Desensitizer::with_recognizer`]
    pub fn new(config: DesensitizeConfig) -> Result<Self> {
        config.validate()?;
        let patterns = PatternMatcher::compile(&config)?;
        Ok(Self {
            config,
            patterns,
            recognizer: None,
        })
    }

    /// Attach the shared, already-loaded recognizer
    pub fn with_recognizer(mut self, recognizer: Arc<dyn EntityRecognizer>) -> Self {
        let entity_types = [
            EntityType::Person,
            EntityType::Location,
            EntityType::Organization,
            EntityType::Time,
        ]
        .into_iter()
        .filter(|entity_type| self.config.is_enabled(entity_type))
        .collect();

        self.recognizer = Some(
            RecognizerAdapter::new(recognizer)
                .with_min_confidence(self.config.min_model_confidence)
                .with_entity_types(entity_types)
                .with_max_workers(self.config.max_inference_workers),
        );
        self
    }

    pub fn config(&self) -> &DesensitizeConfig {
        &self.config
    }

    pub fn has_recognizer(&self) -> bool {
        self.recognizer.is_some()
    }

    fn default_timeout(&self) -> Option<Duration> {
        self.config.recognizer_timeout_ms.map(Duration::from_millis)
    }

    fn masking_options(&self) -> MaskingOptions {
        MaskingOptions {
            mask_char: self.config.mask_char,
            placeholder_style: self.config.placeholder_style,
        }
    }

    /// Detect and resolve entities without masking
    pub fn detect(&self, text: &str) -> Result<Detection> {
        self.detect_with_timeout(text, self.default_timeout())
    }

    pub fn detect_with_timeout(&self, text: &str, timeout: Option<Duration>) -> Result<Detection> {
        self.detect_indexed(text, &CharIndex::new(text), timeout)
    }

    fn detect_indexed(
        &self,
        text: &str,
        index: &CharIndex,
        timeout: Option<Duration>,
    ) -> Result<Detection> {
        let mut warnings = Vec::new();
        let mut recognizer_skipped = false;

        let pattern_spans = if self.config.use_patterns {
            self.patterns.detect_indexed(text, index)
        } else {
            Vec::new()
        };

        // Without an attached recognizer the desensitizer is pattern-only
        let mut model_spans = Vec::new();
        if let Some(adapter) = self.recognizer.as_ref().filter(|_| self.config.use_model) {
            if !text.trim().is_empty() {
                match adapter.detect_indexed(text, index, timeout) {
                    Ok(spans) => model_spans = spans,
                    Err(DesensitizeError::RecognizerUnavailable(reason)) => {
                        tracing::warn!(
                            recognizer = adapter.recognizer_name(),
                            %reason,
                            "entity recognizer unavailable, continuing with pattern matches only"
                        );
                        recognizer_skipped = true;
                        warnings.push(format!("entity recognition skipped: {}", reason));
                    }
                    Err(other) => return Err(other),
                }
            }
        }

        let spans = resolver::resolve(pattern_spans, model_spans)?;
        Ok(Detection {
            spans,
            recognizer_skipped,
            warnings,
        })
    }

    /// Redact `text`; `policy` overrides the configured policy
    pub fn process(&self, text: &str, policy: Option<&MaskingPolicy>) -> Result<RedactionResult> {
        self.process_with_timeout(text, policy, self.default_timeout())
    }

    pub fn process_with_timeout(
        &self,
        text: &str,
        policy: Option<&MaskingPolicy>,
        timeout: Option<Duration>,
    ) -> Result<RedactionResult> {
        let index = CharIndex::new(text);
        let detection = self.detect_indexed(text, &index, timeout)?;
        let policy = policy.unwrap_or(&self.config.policy);

        let mut result = masking::apply_indexed(
            text,
            &index,
            &detection.spans,
            policy,
            &self.masking_options(),
        )?;
        result.recognizer_skipped = detection.recognizer_skipped;
        result.warnings = detection.warnings;

        tracing::debug!(
            chars = index.char_len(),
            redacted = result.records.len(),
            recognizer_skipped = result.recognizer_skipped,
            "text desensitized"
        );
        Ok(result)
    }

    /// Redact raw bytes, rejecting anything that is not UTF-8
    pub fn process_bytes(
        &self,
        bytes: &[u8],
        policy: Option<&MaskingPolicy>,
    ) -> Result<RedactionResult> {
        let text = std::str::from_utf8(bytes).map_err(|e| {
            DesensitizeError::InvalidInput(format!("text is not valid UTF-8: {}", e))
        })?;
        self.process(text, policy)
    }
}
