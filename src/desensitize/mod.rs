// Copyright 2025
// SPDX-License-Identifier: Apache-2.0
//
// Desensitization engine - Rust Implementation
//
// Detection, conflict resolution and masking of sensitive spans in Chinese text:
// - RegexSet prefilter plus checksum validation for structured identifiers
// - Recognizer adapter normalizing external NER output to code-point spans
// - Deterministic resolver preferring exact pattern matches over model spans
// - Exhaustive masking strategies with an audit report per call

pub mod config;
pub mod detector;
pub mod error;
pub mod masking;
pub mod patterns;
#[cfg(feature = "python")]
pub mod python;
pub mod recognizer;
pub mod resolver;
pub mod span;

pub use config::{
    CustomPattern, DesensitizeConfig, EntitySource, EntityType, MaskingPolicy, MaskingStrategy,
    PlaceholderStyle,
};
pub use detector::{Desensitizer, Detection};
pub use error::{DesensitizeError, RecognizerError, Result};
pub use masking::{MaskingOptions, RedactionRecord, RedactionResult};
pub use patterns::PatternMatcher;
#[cfg(feature = "python")]
pub use python::DesensitizerRust;
pub use recognizer::{
    entities_from_word_tags, EntityRecognizer, OffsetUnit, RawEntity, RecognizerAdapter,
    SerializedRecognizer,
};
pub use span::{CharIndex, ResolvedSpanSet, Span};
