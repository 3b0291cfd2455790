// Copyright 2025
// SPDX-License-Identifier: Apache-2.0
//
// Span types and code-point offset bookkeeping
//
// All span offsets are half-open code-point ranges. Regex matches and
// recognizer output arrive in other units and are converted here.

use serde::Serialize;

use super::config::{EntitySource, EntityType};
use super::error::{DesensitizeError, Result};

/// A detected region of interest
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    pub entity_type: EntityType,
    pub source: EntitySource,
    pub confidence: f64,
    /// Literal covered by `start..end`, captured at detection time
    pub text: String,
}

impl Span {
    /// Length in code points
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// Offset tables for one text
///
/// `bytes[i]` / `utf16[i]` hold the UTF-8 / UTF-16 offset of code point `i`;
/// the final entry is the total length, so both tables have `char_len + 1`
/// entries.
#[derive(Debug, Clone)]
pub struct CharIndex {
    bytes: Vec<usize>,
    utf16: Vec<usize>,
}

impl CharIndex {
    pub fn new(text: &str) -> Self {
        let mut bytes = Vec::with_capacity(text.len() + 1);
        let mut utf16 = Vec::with_capacity(text.len() + 1);
        let mut units = 0;
        for (byte, ch) in text.char_indices() {
            bytes.push(byte);
            utf16.push(units);
            units += ch.len_utf16();
        }
        bytes.push(text.len());
        utf16.push(units);
        Self { bytes, utf16 }
    }

    pub fn char_len(&self) -> usize {
        self.bytes.len() - 1
    }

    /// `None` when `byte` is not on a character boundary
    pub fn byte_to_char(&self, byte: usize) -> Option<usize> {
        self.bytes.binary_search(&byte).ok()
    }

    /// `None` when `unit` falls inside a surrogate pair
    pub fn utf16_to_char(&self, unit: usize) -> Option<usize> {
        self.utf16.binary_search(&unit).ok()
    }

    pub fn char_to_byte(&self, ch: usize) -> Option<usize> {
        self.bytes.get(ch).copied()
    }

    /// Substring for a code-point range
    pub fn slice<'a>(&self, text: &'a str, start: usize, end: usize) -> Option<&'a str> {
        if start > end {
            return None;
        }
        let from = self.char_to_byte(start)?;
        let to = self.char_to_byte(end)?;
        text.get(from..to)
    }

    /// Character immediately before code point `ch`
    pub fn char_before(&self, text: &str, ch: usize) -> Option<char> {
        let byte = self.char_to_byte(ch)?;
        text[..byte].chars().next_back()
    }

    /// Character at code point `ch`
    pub fn char_at(&self, text: &str, ch: usize) -> Option<char> {
        let byte = self.char_to_byte(ch)?;
        text[byte..].chars().next()
    }
}

/// Final, ordered, pairwise non-overlapping span set
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ResolvedSpanSet {
    spans: Vec<Span>,
}

impl ResolvedSpanSet {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build from spans already in ascending order; rejects any overlap
    pub fn from_ordered(spans: Vec<Span>) -> Result<Self> {
        for span in &spans {
            if span.start >= span.end {
                return Err(DesensitizeError::StructuralViolation(format!(
                    "{} span has empty range {}..{}",
                    span.entity_type, span.start, span.end
                )));
            }
        }
        for pair in spans.windows(2) {
            if pair[0].end > pair[1].start {
                return Err(DesensitizeError::StructuralViolation(format!(
                    "spans {}..{} ({}) and {}..{} ({}) overlap or are out of order",
                    pair[0].start,
                    pair[0].end,
                    pair[0].entity_type,
                    pair[1].start,
                    pair[1].end,
                    pair[1].entity_type
                )));
            }
        }
        Ok(Self { spans })
    }

    pub fn len(&self) -> usize {
        self.spans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Span> {
        self.spans.iter()
    }

    pub fn as_slice(&self) -> &[Span] {
        &self.spans
    }
}

impl<'a> IntoIterator for &'a ResolvedSpanSet {
    type Item = &'a Span;
    type IntoIter = std::slice::Iter<'a, Span>;

    fn into_iter(self) -> Self::IntoIter {
        self.spans.iter()
    }
}

#[cfg(test)]
pub(crate) fn test_span(
    start: usize,
    end: usize,
    entity_type: EntityType,
    source: EntitySource,
    text: &str,
) -> Span {
    Span {
        start,
        end,
        entity_type,
        source,
        confidence: 1.0,
        text: text.to_string(),
    }
}
