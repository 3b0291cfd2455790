// Copyright 2025
// SPDX-License-Identifier: Apache-2.0
//
// Masking strategies for resolved spans

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};

use super::config::{EntitySource, EntityType, MaskingPolicy, MaskingStrategy, PlaceholderStyle};
use super::error::{DesensitizeError, Result};
use super::span::{CharIndex, ResolvedSpanSet};

/// Rendering options shared by all strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaskingOptions {
    pub mask_char: char,
    pub placeholder_style: PlaceholderStyle,
}

impl Default for MaskingOptions {
    fn default() -> Self {
        Self {
            mask_char: '*',
            placeholder_style: PlaceholderStyle::Tag,
        }
    }
}

/// One redacted span, for audit
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RedactionRecord {
    /// Code-point offsets in the original text
    pub start: usize,
    pub end: usize,
    pub entity_type: EntityType,
    pub source: EntitySource,
    pub confidence: f64,
    pub original: String,
    pub strategy: MaskingStrategy,
    pub replacement: String,
}

/// Redacted text plus the ordered report of what was replaced
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RedactionResult {
    pub text: String,
    pub records: Vec<RedactionRecord>,
    /// Set when model-based detection did not run for this call
    pub recognizer_skipped: bool,
    pub warnings: Vec<String>,
}

impl RedactionResult {
    pub fn is_redacted(&self) -> bool {
        !self.records.is_empty()
    }

    /// Number of redacted spans per entity type
    pub fn counts_by_type(&self) -> BTreeMap<EntityType, usize> {
        let mut counts = BTreeMap::new();
        for record in &self.records {
            *counts.entry(record.entity_type.clone()).or_insert(0) += 1;
        }
        counts
    }

    pub fn distinct_types(&self) -> BTreeSet<EntityType> {
        self.records
            .iter()
            .map(|record| record.entity_type.clone())
            .collect()
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| {
            DesensitizeError::StructuralViolation(format!("report serialization failed: {}", e))
        })
    }
}

/// Apply masking to resolved spans in text
///
/// Text between spans is copied verbatim. Every span is re-checked against
/// `text` first; a span that does not match aborts the call.
pub fn apply(
    text: &str,
    spans: &ResolvedSpanSet,
    policy: &MaskingPolicy,
    options: &MaskingOptions,
) -> Result<RedactionResult> {
    apply_indexed(text, &CharIndex::new(text), spans, policy, options)
}

pub fn apply_indexed(
    text: &str,
    index: &CharIndex,
    spans: &ResolvedSpanSet,
    policy: &MaskingPolicy,
    options: &MaskingOptions,
) -> Result<RedactionResult> {
    let mut output = String::with_capacity(text.len());
    let mut records = Vec::with_capacity(spans.len());
    let mut cursor = 0;
    let mut last_end = 0;

    for span in spans {
        if span.start < last_end {
            return Err(DesensitizeError::StructuralViolation(format!(
                "span {}..{} overlaps previous span ending at {}",
                span.start, span.end, last_end
            )));
        }
        if span.text.is_empty() {
            return Err(DesensitizeError::StructuralViolation(format!(
                "{} span {}..{} has no literal",
                span.entity_type, span.start, span.end
            )));
        }
        let (Some(byte_start), Some(byte_end)) =
            (index.char_to_byte(span.start), index.char_to_byte(span.end))
        else {
            return Err(DesensitizeError::StructuralViolation(format!(
                "span {}..{} exceeds text length {}",
                span.start,
                span.end,
                index.char_len()
            )));
        };
        if text.get(byte_start..byte_end) != Some(span.text.as_str()) {
            return Err(DesensitizeError::StructuralViolation(format!(
                "{} span {}..{} literal does not match the text",
                span.entity_type, span.start, span.end
            )));
        }

        let strategy = policy.strategy_for(&span.entity_type);
        let replacement = mask_value(&span.text, &span.entity_type, strategy, options)?;

        output.push_str(&text[cursor..byte_start]);
        output.push_str(&replacement);
        cursor = byte_end;
        last_end = span.end;

        records.push(RedactionRecord {
            start: span.start,
            end: span.end,
            entity_type: span.entity_type.clone(),
            source: span.source,
            confidence: span.confidence,
            original: span.text.clone(),
            strategy,
            replacement,
        });
    }
    output.push_str(&text[cursor..]);

    Ok(RedactionResult {
        text: output,
        records,
        recognizer_skipped: false,
        warnings: Vec::new(),
    })
}

/// Apply one strategy to one literal
pub fn mask_value(
    value: &str,
    entity_type: &EntityType,
    strategy: MaskingStrategy,
    options: &MaskingOptions,
) -> Result<String> {
    if value.is_empty() {
        return Err(DesensitizeError::StructuralViolation(format!(
            "cannot mask an empty {} literal",
            entity_type
        )));
    }

    let masked = match strategy {
        MaskingStrategy::Partial => partial_mask(value, entity_type, options.mask_char),
        MaskingStrategy::Full => full_mask(value, options.mask_char),
        MaskingStrategy::Placeholder => {
            format!("[{}]", entity_type.placeholder_label(options.placeholder_style))
        }
        MaskingStrategy::Hash => hash_mask(value),
    };
    Ok(masked)
}

/// Partial masking - keeps the characters that identify the kind of value
/// but not the value itself; output length equals input length
fn partial_mask(value: &str, entity_type: &EntityType, mask: char) -> String {
    let chars: Vec<char> = value.chars().collect();
    let n = chars.len();

    match entity_type {
        // 138****5678: mask the four characters before the last four
        EntityType::Phone if n >= 8 => keep_ends(&chars, n - 8, 4, mask),

        // 110101********1233: region code and last four stay
        EntityType::IdCard if n >= 11 => keep_ends(&chars, 6, 4, mask),

        // 6222 **** **** 7894: separators stay in place
        EntityType::BankCard => {
            let total_digits = chars.iter().filter(|c| c.is_ascii_digit()).count();
            if total_digits < 9 {
                return generic_partial(&chars, mask);
            }
            let mut seen = 0;
            chars
                .iter()
                .map(|&c| {
                    if !c.is_ascii_digit() {
                        return c;
                    }
                    seen += 1;
                    if seen <= 4 || seen > total_digits - 4 {
                        c
                    } else {
                        mask
                    }
                })
                .collect()
        }

        // l***i@tang.com
        EntityType::Email => match chars.iter().position(|&c| c == '@') {
            Some(at) if at > 0 => {
                let mut masked = generic_partial(&chars[..at], mask);
                masked.extend(&chars[at..]);
                masked
            }
            _ => generic_partial(&chars, mask),
        },

        _ => generic_partial(&chars, mask),
    }
}

/// First + mask + last; a two-character value keeps only its first character
fn generic_partial(chars: &[char], mask: char) -> String {
    match chars.len() {
        0 | 1 => chars.iter().map(|_| mask).collect(),
        2 => format!("{}{}", chars[0], mask),
        _ => keep_ends(chars, 1, 1, mask),
    }
}

fn keep_ends(chars: &[char], head: usize, tail: usize, mask: char) -> String {
    let n = chars.len();
    chars
        .iter()
        .enumerate()
        .map(|(i, &c)| if i < head || i >= n - tail { c } else { mask })
        .collect()
}

/// Full masking - one mask character per original character
fn full_mask(value: &str, mask: char) -> String {
    value.chars().map(|_| mask).collect()
}

/// Hash masking using SHA256; identical literals always give identical tags
fn hash_mask(value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(value.as_bytes());
    let result = hasher.finalize();
    format!("[{}]", &format!("{:x}", result)[..8])
}
