// Copyright 2025
// SPDX-License-Identifier: Apache-2.0
//
// Sensitive-information desensitization for Chinese text
// Optional PyO3 bindings behind the `python` feature

// Allow non-local definitions for PyO3 macros
#![cfg_attr(feature = "python", allow(non_local_definitions))]

#[cfg(feature = "python")]
use pyo3::prelude::*;

pub mod desensitize;

/// Python module: desensitize_rust
///
/// Detects and masks personal data (names, places, organizations, dates,
/// phone numbers, ID cards, emails, bank cards) in Chinese text.
///
/// # Examples
///
/// ```python
/// from desensitize_rust import DesensitizerRust
///
/// config = {
///     "use_model": True,
///     "default_strategy": "placeholder",
///     "policy": {"PHONE": "partial"},
/// }
/// engine = DesensitizerRust(config, recognizer=my_ner)
///
/// result = engine.process("联系人张三，电话13812345678")
/// print(result["text"])  # "联系人[PERSON]，电话138****5678"
/// ```
#[cfg(feature = "python")]
#[pymodule]
fn desensitize_rust(m: &Bound<'_, pyo3::types::PyModule>) -> PyResult<()> {
    m.add_class::<desensitize::DesensitizerRust>()?;

    // Module metadata
    m.add("__version__", env!("CARGO_PKG_VERSION"))?;
    m.add(
        "__doc__",
        "Sensitive-information desensitization for Chinese text",
    )?;

    Ok(())
}
