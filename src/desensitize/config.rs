// Copyright 2025
// SPDX-License-Identifier: Apache-2.0
//
// Configuration types for the desensitization engine

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

#[cfg(feature = "python")]
use pyo3::prelude::*;
#[cfg(feature = "python")]
use pyo3::types::PyDict;

use super::error::{DesensitizeError, Result};
use super::recognizer::DEFAULT_MAX_INFERENCE_WORKERS;

/// Entity types that can be detected
///
/// Declaration order is the final tie-break used by the resolver.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum EntityType {
    Person,
    Location,
    Organization,
    Time,
    Phone,
    IdCard,
    Email,
    BankCard,
    Other(String),
}

impl EntityType {
    /// Canonical tag, e.g. `PERSON` or `OTHER:plate`
    pub fn tag(&self) -> String {
        match self {
            EntityType::Person => "PERSON".to_string(),
            EntityType::Location => "LOCATION".to_string(),
            EntityType::Organization => "ORGANIZATION".to_string(),
            EntityType::Time => "TIME".to_string(),
            EntityType::Phone => "PHONE".to_string(),
            EntityType::IdCard => "ID_CARD".to_string(),
            EntityType::Email => "EMAIL".to_string(),
            EntityType::BankCard => "BANK_CARD".to_string(),
            EntityType::Other(name) => format!("OTHER:{}", name),
        }
    }

    /// Text placed between the brackets by the placeholder strategy
    pub fn placeholder_label(&self, style: PlaceholderStyle) -> String {
        match (style, self) {
            (_, EntityType::Other(name)) => name.to_uppercase(),
            (PlaceholderStyle::Tag, other) => other.tag(),
            (PlaceholderStyle::Chinese, EntityType::Person) => "人名".to_string(),
            (PlaceholderStyle::Chinese, EntityType::Location) => "地名".to_string(),
            (PlaceholderStyle::Chinese, EntityType::Organization) => "组织机构".to_string(),
            (PlaceholderStyle::Chinese, EntityType::Time) => "时间".to_string(),
            (PlaceholderStyle::Chinese, EntityType::Phone) => "电话".to_string(),
            (PlaceholderStyle::Chinese, EntityType::IdCard) => "身份证".to_string(),
            (PlaceholderStyle::Chinese, EntityType::Email) => "邮箱".to_string(),
            (PlaceholderStyle::Chinese, EntityType::BankCard) => "银行卡".to_string(),
        }
    }

}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tag())
    }
}

impl FromStr for EntityType {
    type Err = DesensitizeError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if let Some(name) = trimmed
            .strip_prefix("OTHER:")
            .or_else(|| trimmed.strip_prefix("other:"))
        {
            if name.is_empty() {
                return Err(DesensitizeError::Config(format!(
                    "Entity type '{}' has an empty name",
                    s
                )));
            }
            return Ok(EntityType::Other(name.to_string()));
        }

        match trimmed.to_ascii_uppercase().as_str() {
            "PERSON" | "人名" => Ok(EntityType::Person),
            "LOCATION" | "地名" => Ok(EntityType::Location),
            "ORGANIZATION" | "组织机构" => Ok(EntityType::Organization),
            "TIME" | "时间" => Ok(EntityType::Time),
            "PHONE" | "电话" => Ok(EntityType::Phone),
            "ID_CARD" | "身份证" => Ok(EntityType::IdCard),
            "EMAIL" | "邮箱" => Ok(EntityType::Email),
            "BANK_CARD" | "银行卡" => Ok(EntityType::BankCard),
            _ => Err(DesensitizeError::Config(format!(
                "Unknown entity type '{}'",
                s
            ))),
        }
    }
}

impl TryFrom<String> for EntityType {
    type Error = DesensitizeError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<EntityType> for String {
    fn from(value: EntityType) -> Self {
        value.tag()
    }
}

/// Which detector produced a span
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntitySource {
    Pattern,
    Model,
}

impl EntitySource {
    /// Lower ranks win conflicts in the resolver
    pub fn priority_rank(&self) -> u8 {
        match self {
            EntitySource::Pattern => 0,
            EntitySource::Model => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EntitySource::Pattern => "PATTERN",
            EntitySource::Model => "MODEL",
        }
    }
}

/// Masking strategies for detected entities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MaskingStrategy {
    Partial, // 张*三, 138****5678
    Full,    // ***, same length as the original
    #[default]
    Placeholder, // [PERSON]
    Hash,    // [1d841bc0]
}

impl MaskingStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            MaskingStrategy::Partial => "partial",
            MaskingStrategy::Full => "full",
            MaskingStrategy::Placeholder => "placeholder",
            MaskingStrategy::Hash => "hash",
        }
    }
}

impl FromStr for MaskingStrategy {
    type Err = DesensitizeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "partial" | "部分脱敏" => Ok(MaskingStrategy::Partial),
            "full" | "完全脱敏" => Ok(MaskingStrategy::Full),
            "placeholder" | "占位符" => Ok(MaskingStrategy::Placeholder),
            "hash" | "哈希脱敏" => Ok(MaskingStrategy::Hash),
            _ => Err(DesensitizeError::Config(format!(
                "Unknown masking strategy '{}'",
                s
            ))),
        }
    }
}

/// Label style used by the placeholder strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PlaceholderStyle {
    #[default]
    Tag, // [PERSON]
    Chinese, // [人名]
}

impl FromStr for PlaceholderStyle {
    type Err = DesensitizeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tag" => Ok(PlaceholderStyle::Tag),
            "chinese" | "中文" => Ok(PlaceholderStyle::Chinese),
            _ => Err(DesensitizeError::Config(format!(
                "Unknown placeholder style '{}'",
                s
            ))),
        }
    }
}

/// Entity type to masking strategy mapping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct MaskingPolicy {
    #[serde(default)]
    pub strategies: BTreeMap<EntityType, MaskingStrategy>,
    /// Applied to entity types absent from `strategies`
    #[serde(default)]
    pub default_strategy: MaskingStrategy,
}

impl MaskingPolicy {
    pub fn new(default_strategy: MaskingStrategy) -> Self {
        Self {
            strategies: BTreeMap::new(),
            default_strategy,
        }
    }

    /// Same strategy for every entity type
    pub fn uniform(strategy: MaskingStrategy) -> Self {
        Self::new(strategy)
    }

    pub fn with(mut self, entity_type: EntityType, strategy: MaskingStrategy) -> Self {
        self.strategies.insert(entity_type, strategy);
        self
    }

    pub fn strategy_for(&self, entity_type: &EntityType) -> MaskingStrategy {
        self.strategies
            .get(entity_type)
            .copied()
            .unwrap_or(self.default_strategy)
    }
}

/// Custom pattern definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomPattern {
    /// Becomes the `OTHER:<name>` entity type
    pub name: String,
    pub pattern: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

/// Configuration for the desensitization pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DesensitizeConfig {
    // Pattern detection flags
    pub detect_phone: bool,
    pub detect_id_card: bool,
    pub detect_email: bool,
    pub detect_bank_card: bool,

    // Model label flags
    pub detect_person: bool,
    pub detect_location: bool,
    pub detect_organization: bool,
    pub detect_time: bool,

    // Sources
    pub use_patterns: bool,
    pub use_model: bool,

    // Masking configuration
    pub policy: MaskingPolicy,
    pub mask_char: char,
    pub placeholder_style: PlaceholderStyle,

    // Recognizer behaviour
    pub recognizer_timeout_ms: Option<u64>,
    pub min_model_confidence: f64,
    /// Timed inference workers allowed at once, abandoned ones included
    pub max_inference_workers: usize,

    pub custom_patterns: Vec<CustomPattern>,

    // Whitelist patterns (regex strings)
    pub whitelist_patterns: Vec<String>,
}

impl Default for DesensitizeConfig {
    fn default() -> Self {
        Self {
            detect_phone: true,
            detect_id_card: true,
            detect_email: true,
            detect_bank_card: true,

            detect_person: true,
            detect_location: true,
            detect_organization: true,
            detect_time: true,

            use_patterns: true,
            use_model: true,

            policy: MaskingPolicy::default(),
            mask_char: '*',
            placeholder_style: PlaceholderStyle::Tag,

            recognizer_timeout_ms: None,
            min_model_confidence: 0.0,
            max_inference_workers: DEFAULT_MAX_INFERENCE_WORKERS,

            custom_patterns: Vec::new(),
            whitelist_patterns: Vec::new(),
        }
    }
}

impl DesensitizeConfig {
    /// Parse configuration from JSON; absent fields keep their defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| DesensitizeError::Config(format!("Invalid config JSON: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.min_model_confidence) {
            return Err(DesensitizeError::Config(format!(
                "min_model_confidence must be within 0.0..=1.0, got {}",
                self.min_model_confidence
            )));
        }
        if self.max_inference_workers == 0 {
            return Err(DesensitizeError::Config(
                "max_inference_workers must be at least 1".to_string(),
            ));
        }
        for custom in &self.custom_patterns {
            if custom.name.trim().is_empty() {
                return Err(DesensitizeError::Config(format!(
                    "Custom pattern '{}' has an empty name",
                    custom.pattern
                )));
            }
        }
        Ok(())
    }

    /// Whether detection of `entity_type` is switched on
    pub fn is_enabled(&self, entity_type: &EntityType) -> bool {
        match entity_type {
            EntityType::Person => self.detect_person,
            EntityType::Location => self.detect_location,
            EntityType::Organization => self.detect_organization,
            EntityType::Time => self.detect_time,
            EntityType::Phone => self.detect_phone,
            EntityType::IdCard => self.detect_id_card,
            EntityType::Email => self.detect_email,
            EntityType::BankCard => self.detect_bank_card,
            EntityType::Other(name) => self
                .custom_patterns
                .iter()
                .any(|custom| custom.enabled && &custom.name == name),
        }
    }

    /// Extract configuration from Python dict
    #[cfg(feature = "python")]
    pub fn from_py_dict(dict: &Bound<'_, PyDict>) -> PyResult<Self> {
        let mut config = Self::default();

        macro_rules! extract_field {
            ($field:ident) => {
                if let Some(value) = dict.get_item(stringify!($field))? {
                    config.$field = value.extract()?;
                }
            };
        }

        extract_field!(detect_phone);
        extract_field!(detect_id_card);
        extract_field!(detect_email);
        extract_field!(detect_bank_card);
        extract_field!(detect_person);
        extract_field!(detect_location);
        extract_field!(detect_organization);
        extract_field!(detect_time);
        extract_field!(use_patterns);
        extract_field!(use_model);
        extract_field!(mask_char);
        extract_field!(recognizer_timeout_ms);
        extract_field!(min_model_confidence);
        extract_field!(max_inference_workers);
        extract_field!(whitelist_patterns);

        if let Some(value) = dict.get_item("placeholder_style")? {
            let style: String = value.extract()?;
            config.placeholder_style = style.parse().map_err(to_py_err)?;
        }

        if let Some(value) = dict.get_item("default_strategy")? {
            let strategy: String = value.extract()?;
            config.policy.default_strategy = strategy.parse().map_err(to_py_err)?;
        }

        if let Some(value) = dict.get_item("policy")? {
            let strategies: BTreeMap<String, String> = value.extract()?;
            for (entity, strategy) in strategies {
                config.policy.strategies.insert(
                    entity.parse().map_err(to_py_err)?,
                    strategy.parse().map_err(to_py_err)?,
                );
            }
        }

        if let Some(value) = dict.get_item("custom_patterns")? {
            let items: Vec<Bound<'_, PyDict>> = value.extract()?;
            for item in items {
                let required = |key: &str| -> PyResult<String> {
                    item.get_item(key)?
                        .ok_or_else(|| {
                            pyo3::exceptions::PyValueError::new_err(format!(
                                "Missing '{}' field",
                                key
                            ))
                        })?
                        .extract()
                };
                let name = required("name")?;
                let pattern = required("pattern")?;
                let description: String = match item.get_item("description")? {
                    Some(val) => val.extract()?,
                    None => String::new(),
                };
                let enabled: bool = match item.get_item("enabled")? {
                    Some(val) => val.extract()?,
                    None => true,
                };
                config.custom_patterns.push(CustomPattern {
                    name,
                    pattern,
                    description,
                    enabled,
                });
            }
        }

        config.validate().map_err(to_py_err)?;
        Ok(config)
    }
}

#[cfg(feature = "python")]
fn to_py_err(err: DesensitizeError) -> PyErr {
    pyo3::exceptions::PyValueError::new_err(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_type_tag_round_trip() {
        for entity in [
            EntityType::Person,
            EntityType::IdCard,
            EntityType::BankCard,
            EntityType::Other("plate".to_string()),
        ] {
            assert_eq!(entity.tag().parse::<EntityType>().unwrap(), entity);
        }
    }

    #[test]
    fn test_entity_type_chinese_labels() {
        assert_eq!("人名".parse::<EntityType>().unwrap(), EntityType::Person);
        assert_eq!("银行卡".parse::<EntityType>().unwrap(), EntityType::BankCard);
        assert!("OTHER:".parse::<EntityType>().is_err());
        assert!("MONEY".parse::<EntityType>().is_err());
    }

    #[test]
    fn test_placeholder_labels() {
        assert_eq!(
            EntityType::IdCard.placeholder_label(PlaceholderStyle::Tag),
            "ID_CARD"
        );
        assert_eq!(
            EntityType::Person.placeholder_label(PlaceholderStyle::Chinese),
            "人名"
        );
        assert_eq!(
            EntityType::Other("plate".to_string()).placeholder_label(PlaceholderStyle::Tag),
            "PLATE"
        );
    }

    #[test]
    fn test_policy_fallback() {
        let policy = MaskingPolicy::new(MaskingStrategy::Placeholder)
            .with(EntityType::Phone, MaskingStrategy::Partial);
        assert_eq!(
            policy.strategy_for(&EntityType::Phone),
            MaskingStrategy::Partial
        );
        assert_eq!(
            policy.strategy_for(&EntityType::Email),
            MaskingStrategy::Placeholder
        );
    }

    #[test]
    fn test_default_config() {
        let config = DesensitizeConfig::default();
        assert!(config.detect_phone);
        assert!(config.use_model);
        assert_eq!(config.mask_char, '*');
        assert_eq!(config.policy.default_strategy, MaskingStrategy::Placeholder);
        assert_eq!(config.recognizer_timeout_ms, None);
    }

    #[test]
    fn test_config_from_json() {
        let config = DesensitizeConfig::from_json_str(
            r#"{
                "detect_time": false,
                "policy": {
                    "strategies": {"PERSON": "placeholder", "PHONE": "partial"},
                    "default_strategy": "hash"
                },
                "custom_patterns": [{"name": "plate", "pattern": "京[A-Z][0-9A-Z]{5}"}]
            }"#,
        )
        .unwrap();

        assert!(!config.detect_time);
        assert!(config.detect_person);
        assert_eq!(
            config.policy.strategy_for(&EntityType::Phone),
            MaskingStrategy::Partial
        );
        assert_eq!(
            config.policy.strategy_for(&EntityType::Time),
            MaskingStrategy::Hash
        );
        assert!(config.is_enabled(&EntityType::Other("plate".to_string())));
        assert!(!config.is_enabled(&EntityType::Other("vin".to_string())));
    }

    #[test]
    fn test_config_rejects_unknown_strategy() {
        let err = DesensitizeConfig::from_json_str(
            r#"{"policy": {"strategies": {"PERSON": "tokenize"}}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, DesensitizeError::Config(_)));
    }

    #[test]
    fn test_config_rejects_confidence_out_of_range() {
        let err = DesensitizeConfig::from_json_str(r#"{"min_model_confidence": 1.5}"#).unwrap_err();
        assert!(matches!(err, DesensitizeError::Config(_)));
    }

    #[test]
    fn test_config_rejects_zero_inference_workers() {
        let err = DesensitizeConfig::from_json_str(r#"{"max_inference_workers": 0}"#).unwrap_err();
        assert!(matches!(err, DesensitizeError::Config(_)));
    }

    #[test]
    fn test_placeholder_style_parse() {
        assert_eq!("tag".parse::<PlaceholderStyle>().unwrap(), PlaceholderStyle::Tag);
        assert_eq!(
            "Chinese".parse::<PlaceholderStyle>().unwrap(),
            PlaceholderStyle::Chinese
        );
        assert!(matches!(
            "emoji".parse::<PlaceholderStyle>(),
            Err(DesensitizeError::Config(_))
        ));

        let err = DesensitizeConfig::from_json_str(r#"{"placeholder_style": "emoji"}"#).unwrap_err();
        assert!(matches!(err, DesensitizeError::Config(_)));
    }
}
