// Copyright 2025
// SPDX-License-Identifier: Apache-2.0
//
// Error types for the desensitization engine

use thiserror::Error;

pub type Result<T> = std::result::Result<T, DesensitizeError>;

#[derive(Debug, Error)]
pub enum DesensitizeError {
    /// Input rejected before detection (e.g. not valid UTF-8)
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// External recognizer failed or timed out
    #[error("entity recognizer unavailable: {0}")]
    RecognizerUnavailable(String),

    /// A span invariant was broken; this is a defect, never a normal outcome
    #[error("structural violation: {0}")]
    StructuralViolation(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Failure reported by an entity recognizer implementation
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct RecognizerError {
    pub message: String,
}

impl RecognizerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<RecognizerError> for DesensitizeError {
    fn from(err: RecognizerError) -> Self {
        DesensitizeError::RecognizerUnavailable(err.message)
    }
}
