// Copyright 2025
// SPDX-License-Identifier: Apache-2.0
//
// Python bindings for the desensitizer

use pyo3::prelude::*;
use pyo3::types::{PyDict, PyList};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use super::config::{DesensitizeConfig, MaskingPolicy};
use super::detector::Desensitizer;
use super::error::{DesensitizeError, RecognizerError};
use super::masking::RedactionResult;
use super::recognizer::{entities_from_word_tags, EntityRecognizer, OffsetUnit, RawEntity};
use super::span::Span;

impl From<DesensitizeError> for PyErr {
    fn from(err: DesensitizeError) -> PyErr {
        match err {
            DesensitizeError::StructuralViolation(_) | DesensitizeError::RecognizerUnavailable(_) => {
                pyo3::exceptions::PyRuntimeError::new_err(err.to_string())
            }
            _ => pyo3::exceptions::PyValueError::new_err(err.to_string()),
        }
    }
}

/// Python callable used as the entity recognizer
///
/// The callable takes the text and returns either `(word, tag)` pairs
/// covering the text in order, or `(start, end, label[, score])` tuples
/// with code-point offsets.
struct PyRecognizer {
    callable: Py<PyAny>,
}

impl PyRecognizer {
    fn parse(text: &str, output: &Bound<'_, PyAny>) -> PyResult<Vec<RawEntity>> {
        if let Ok(pairs) = output.extract::<Vec<(String, String)>>() {
            return Ok(entities_from_word_tags(text, &pairs));
        }

        let mut entities = Vec::new();
        for item in output.try_iter()? {
            let item = item?;
            let entity = match item.extract::<(usize, usize, String, Option<f64>)>() {
                Ok((start, end, label, score)) => RawEntity::new(start, end, label, score),
                Err(_) => {
                    let (start, end, label): (usize, usize, String) = item.extract()?;
                    RawEntity::new(start, end, label, None)
                }
            };
            entities.push(entity);
        }
        Ok(entities)
    }
}

impl EntityRecognizer for PyRecognizer {
    fn offset_unit(&self) -> OffsetUnit {
        OffsetUnit::CodePoint
    }

    fn recognize(&self, text: &str) -> Result<Vec<RawEntity>, RecognizerError> {
        Python::attach(|py| {
            let output = self.callable.bind(py).call1((text,))?;
            Self::parse(text, &output)
        })
        .map_err(|e| RecognizerError::new(format!("python recognizer failed: {}", e)))
    }

    fn name(&self) -> &str {
        "python"
    }
}

/// Desensitizer exposed to Python
///
/// # Example
///
/// ```python
/// from desensitize_rust import DesensitizerRust
///
/// engine = DesensitizerRust({"use_model": False, "policy": {"PHONE": "partial"}})
/// result = engine.process("电话13812345678")
/// print(result["text"])  # 电话138****5678
/// ```
#[pyclass]
pub struct DesensitizerRust {
    inner: Desensitizer,
}

#[pymethods]
impl DesensitizerRust {
    /// Create a desensitizer from a config dict and an optional recognizer callable
    #[new]
    #[pyo3(signature = (config, recognizer=None))]
    pub fn new(config: &Bound<'_, PyDict>, recognizer: Option<Py<PyAny>>) -> PyResult<Self> {
        let config = DesensitizeConfig::from_py_dict(config)?;
        let mut inner = Desensitizer::new(config)?;
        if let Some(callable) = recognizer {
            inner = inner.with_recognizer(Arc::new(PyRecognizer { callable }));
        }
        Ok(Self { inner })
    }

    /// Redact `text`
    ///
    /// Returns a dict with `text`, `records`, `counts`,
    /// `recognizer_skipped` and `warnings`.
    #[pyo3(signature = (text, policy=None, timeout_ms=None))]
    pub fn process(
        &self,
        py: Python<'_>,
        text: &str,
        policy: Option<&Bound<'_, PyDict>>,
        timeout_ms: Option<u64>,
    ) -> PyResult<Py<PyAny>> {
        let policy = policy.map(|dict| self.policy_from_py_dict(dict)).transpose()?;
        let timeout = timeout_ms
            .map(Duration::from_millis)
            .or_else(|| self.inner.config().recognizer_timeout_ms.map(Duration::from_millis));

        let result = py.detach(|| {
            self.inner
                .process_with_timeout(text, policy.as_ref(), timeout)
        })?;
        self.result_to_py(py, &result)
    }

    /// Resolved spans without masking, as a list of dicts
    pub fn detect(&self, py: Python<'_>, text: &str) -> PyResult<Py<PyAny>> {
        let detection = py.detach(|| self.inner.detect(text))?;
        let py_list = PyList::empty(py);
        for span in &detection.spans {
            py_list.append(self.span_to_py(py, span)?)?;
        }
        Ok(py_list.into_any().unbind())
    }

    /// Whether a recognizer callable is attached
    pub fn has_recognizer(&self) -> bool {
        self.inner.has_recognizer()
    }
}

// Internal helpers
impl DesensitizerRust {
    fn policy_from_py_dict(&self, dict: &Bound<'_, PyDict>) -> PyResult<MaskingPolicy> {
        let mut policy = self.inner.config().policy.clone();
        let strategies: BTreeMap<String, String> = dict.extract()?;
        for (entity, strategy) in strategies {
            if entity == "default" {
                policy.default_strategy = strategy.parse()?;
            } else {
                policy.strategies.insert(entity.parse()?, strategy.parse()?);
            }
        }
        Ok(policy)
    }

    fn span_to_py<'py>(&self, py: Python<'py>, span: &Span) -> PyResult<Bound<'py, PyDict>> {
        let item_dict = PyDict::new(py);
        item_dict.set_item("start", span.start)?;
        item_dict.set_item("end", span.end)?;
        item_dict.set_item("type", span.entity_type.tag())?;
        item_dict.set_item("source", span.source.as_str())?;
        item_dict.set_item("confidence", span.confidence)?;
        item_dict.set_item("text", span.text.as_str())?;
        Ok(item_dict)
    }

    fn result_to_py(&self, py: Python<'_>, result: &RedactionResult) -> PyResult<Py<PyAny>> {
        let py_dict = PyDict::new(py);
        py_dict.set_item("text", result.text.as_str())?;

        let records = PyList::empty(py);
        for record in &result.records {
            let item_dict = PyDict::new(py);
            item_dict.set_item("start", record.start)?;
            item_dict.set_item("end", record.end)?;
            item_dict.set_item("type", record.entity_type.tag())?;
            item_dict.set_item("source", record.source.as_str())?;
            item_dict.set_item("confidence", record.confidence)?;
            item_dict.set_item("original", record.original.as_str())?;
            item_dict.set_item("strategy", record.strategy.as_str())?;
            item_dict.set_item("replacement", record.replacement.as_str())?;
            records.append(item_dict)?;
        }
        py_dict.set_item("records", records)?;

        let counts = PyDict::new(py);
        for (entity_type, count) in result.counts_by_type() {
            counts.set_item(entity_type.tag(), count)?;
        }
        py_dict.set_item("counts", counts)?;
        py_dict.set_item("recognizer_skipped", result.recognizer_skipped)?;
        py_dict.set_item("warnings", result.warnings.clone())?;

        Ok(py_dict.into_any().unbind())
    }
}
