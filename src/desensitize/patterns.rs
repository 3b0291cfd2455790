// Copyright 2025
// SPDX-License-Identifier: Apache-2.0
//
// Pattern matcher for structured identifiers
// Uses RegexSet as a prefilter, then claims regions in priority order:
// bank card > ID card > phone > email > custom patterns

use once_cell::sync::Lazy;
use regex::{Regex, RegexSet};

use super::config::{DesensitizeConfig, EntitySource, EntityType};
use super::error::{DesensitizeError, Result};
use super::span::{CharIndex, Span};

/// Post-match validation applied to a regex candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Check {
    BankCard,
    IdCard18,
    IdCard15,
    Phone,
    Email,
    None,
}

/// Compiled pattern with metadata
#[derive(Debug, Clone)]
pub struct CompiledPattern {
    pub entity_type: EntityType,
    pub regex: Regex,
    check: Check,
    #[allow(dead_code)]
    pub description: String,
}

/// Deterministic detectors, in claim order
pub struct PatternMatcher {
    regex_set: RegexSet,
    patterns: Vec<CompiledPattern>,
    whitelist: Vec<Regex>,
}

/// Pattern definitions (pattern, description, check)
type PatternDef = (&'static str, &'static str, Check);

// 16-19 digits, contiguous or in groups of four
static BANK_CARD_PATTERNS: Lazy<Vec<PatternDef>> = Lazy::new(|| {
    vec![(
        r"[0-9]{4}(?:[ -]?[0-9]{4}){3}(?:[ -]?[0-9]{1,3})?",
        "Bank card number",
        Check::BankCard,
    )]
});

static ID_CARD_PATTERNS: Lazy<Vec<PatternDef>> = Lazy::new(|| {
    vec![
        (
            r"[1-9][0-9]{5}(?:18|19|20)[0-9]{2}(?:0[1-9]|1[0-2])(?:0[1-9]|[12][0-9]|3[01])[0-9]{3}[0-9Xx]",
            "Resident ID number (18 digits)",
            Check::IdCard18,
        ),
        (
            r"[1-9][0-9]{5}[0-9]{2}(?:0[1-9]|1[0-2])(?:0[1-9]|[12][0-9]|3[01])[0-9]{3}",
            "Resident ID number (15 digits, legacy)",
            Check::IdCard15,
        ),
    ]
});

// Mainland mobile numbers, optional +86 prefix
static PHONE_PATTERNS: Lazy<Vec<PatternDef>> = Lazy::new(|| {
    vec![(
        r"(?:\+86[ -]?)?1[3-9][0-9]{9}",
        "Mobile phone number",
        Check::Phone,
    )]
});

static EMAIL_PATTERNS: Lazy<Vec<PatternDef>> = Lazy::new(|| {
    vec![(
        r"[A-Za-z0-9][A-Za-z0-9._%+-]*@[A-Za-z0-9-]+(?:\.[A-Za-z0-9-]+)*\.[A-Za-z]{2,}",
        "Email address",
        Check::Email,
    )]
});

const ID_WEIGHTS: [u32; 17] = [7, 9, 10, 5, 8, 4, 2, 1, 6, 3, 7, 9, 10, 5, 8, 4, 2];
const ID_CHECK_CHARS: [char; 11] = ['1', '0', 'X', '9', '8', '7', '6', '5', '4', '3', '2'];

impl PatternMatcher {
    /// Compile patterns based on configuration
    pub fn compile(config: &DesensitizeConfig) -> Result<Self> {
        let mut pattern_strings = Vec::new();
        let mut patterns = Vec::new();

        macro_rules! add_patterns {
            ($enabled:expr, $entity_type:expr, $pattern_list:expr) => {
                if $enabled {
                    for (pattern, description, check) in $pattern_list.iter() {
                        pattern_strings.push(pattern.to_string());
                        let regex = Regex::new(pattern).map_err(|e| {
                            DesensitizeError::Config(format!(
                                "Failed to compile pattern '{}': {}",
                                pattern, e
                            ))
                        })?;
                        patterns.push(CompiledPattern {
                            entity_type: $entity_type,
                            regex,
                            check: *check,
                            description: description.to_string(),
                        });
                    }
                }
            };
        }

        // Claim order matters: a region taken by an earlier pattern is
        // excluded from every later one
        add_patterns!(
            config.detect_bank_card,
            EntityType::BankCard,
            &*BANK_CARD_PATTERNS
        );
        add_patterns!(config.detect_id_card, EntityType::IdCard, &*ID_CARD_PATTERNS);
        add_patterns!(config.detect_phone, EntityType::Phone, &*PHONE_PATTERNS);
        add_patterns!(config.detect_email, EntityType::Email, &*EMAIL_PATTERNS);

        for custom in &config.custom_patterns {
            if custom.enabled {
                pattern_strings.push(custom.pattern.clone());
                let regex = Regex::new(&custom.pattern).map_err(|e| {
                    DesensitizeError::Config(format!(
                        "Failed to compile custom pattern '{}': {}",
                        custom.pattern, e
                    ))
                })?;
                patterns.push(CompiledPattern {
                    entity_type: EntityType::Other(custom.name.clone()),
                    regex,
                    check: Check::None,
                    description: custom.description.clone(),
                });
            }
        }

        // Handle empty pattern set gracefully (all detectors disabled)
        let regex_set = if pattern_strings.is_empty() {
            RegexSet::empty()
        } else {
            RegexSet::new(&pattern_strings).map_err(|e| {
                DesensitizeError::Config(format!("Failed to compile RegexSet: {}", e))
            })?
        };

        let mut whitelist = Vec::new();
        for pattern in &config.whitelist_patterns {
            match Regex::new(pattern) {
                Ok(regex) => whitelist.push(regex),
                Err(e) => {
                    return Err(DesensitizeError::Config(format!(
                        "Invalid whitelist pattern '{}': {}",
                        pattern, e
                    )))
                }
            }
        }

        Ok(Self {
            regex_set,
            patterns,
            whitelist,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Detect structured identifiers; spans are ordered and never overlap
    pub fn detect(&self, text: &str) -> Vec<Span> {
        self.detect_indexed(text, &CharIndex::new(text))
    }

    pub fn detect_indexed(&self, text: &str, index: &CharIndex) -> Vec<Span> {
        let matched = self.regex_set.matches(text);
        // byte ranges already claimed by a higher-priority pattern
        let mut claimed: Vec<(usize, usize)> = Vec::new();
        let mut spans = Vec::new();

        for (idx, pattern) in self.patterns.iter().enumerate() {
            if !matched.matched(idx) {
                continue;
            }

            let mut pos = 0;
            while pos <= text.len() {
                let Some(mat) = pattern.regex.find_at(text, pos) else {
                    break;
                };
                let (start, end) = (mat.start(), mat.end());

                if end > start && self.is_whitelisted(mat.as_str()) {
                    pos = end;
                    continue;
                }

                let accepted = if end > start {
                    accepted_end(pattern.check, text, start, end, &claimed)
                } else {
                    None
                };

                if let Some(end) = accepted {
                    claimed.push((start, end));
                    // Byte offsets from the regex always sit on char boundaries
                    if let (Some(char_start), Some(char_end)) =
                        (index.byte_to_char(start), index.byte_to_char(end))
                    {
                        spans.push(Span {
                            start: char_start,
                            end: char_end,
                            entity_type: pattern.entity_type.clone(),
                            source: EntitySource::Pattern,
                            confidence: 1.0,
                            text: text[start..end].to_string(),
                        });
                    }
                    pos = end;
                } else {
                    // Retry one character later so a rejected candidate
                    // cannot hide a valid one that starts inside it
                    pos = start + text[start..].chars().next().map_or(1, char::len_utf8);
                }
            }
        }

        spans.sort_by_key(|span| span.start);
        tracing::debug!(
            candidates = spans.len(),
            patterns = self.patterns.len(),
            "pattern matcher finished"
        );
        spans
    }

    /// Check if a match is whitelisted
    fn is_whitelisted(&self, literal: &str) -> bool {
        self.whitelist
            .iter()
            .any(|pattern| pattern.is_match(literal))
    }
}

fn overlaps_claimed(claimed: &[(usize, usize)], start: usize, end: usize) -> bool {
    claimed
        .iter()
        .any(|&(claimed_start, claimed_end)| start < claimed_end && claimed_start < end)
}

/// End of the longest acceptable candidate starting at `start`
///
/// The card pattern's optional tail can swallow a number written right after
/// the card, so shorter digit counts are retried at the same start.
fn accepted_end(
    check: Check,
    text: &str,
    start: usize,
    end: usize,
    claimed: &[(usize, usize)],
) -> Option<usize> {
    let ends = match check {
        Check::BankCard => card_prefix_ends(&text[start..end])
            .into_iter()
            .map(|len| start + len)
            .collect(),
        _ => vec![end],
    };
    ends.into_iter()
        .find(|&end| !overlaps_claimed(claimed, start, end) && passes_check(check, text, start, end))
}

/// Byte lengths of the prefixes ending in a 16th to 19th digit, longest first
fn card_prefix_ends(candidate: &str) -> Vec<usize> {
    let mut ends = Vec::new();
    let mut digits = 0;
    for (i, c) in candidate.char_indices() {
        if c.is_ascii_digit() {
            digits += 1;
            if digits >= 16 {
                ends.push(i + c.len_utf8());
            }
        }
    }
    ends.reverse();
    ends
}

fn passes_check(check: Check, text: &str, start: usize, end: usize) -> bool {
    let literal = &text[start..end];
    match check {
        Check::BankCard => {
            if !numeric_boundary_ok(text, start, end) || id_card_valid(literal) {
                return false;
            }
            let digits: String = literal.chars().filter(|c| c.is_ascii_digit()).collect();
            card_length_allowed(&digits) && luhn_check(&digits)
        }
        Check::IdCard18 => numeric_boundary_ok(text, start, end) && id_card_valid(literal),
        Check::IdCard15 => numeric_boundary_ok(text, start, end) && id_card_valid(literal),
        Check::Phone => numeric_boundary_ok(text, start, end),
        Check::Email => !text[end..]
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphanumeric()),
        Check::None => true,
    }
}

/// A numeric identifier must not be glued to ASCII letters or digits, and
/// must not be the local part of an email address.
fn numeric_boundary_ok(text: &str, start: usize, end: usize) -> bool {
    let before = text[..start].chars().next_back();
    let after = text[end..].chars().next();
    !before.is_some_and(|c| c.is_ascii_alphanumeric())
        && !after.is_some_and(|c| c.is_ascii_alphanumeric() || c == '@')
}

/// Digit-count range per card network, keyed by leading digit
fn card_length_allowed(digits: &str) -> bool {
    let len = digits.len();
    match digits.as_bytes().first() {
        // Visa
        Some(b'4') => len == 16 || len == 19,
        // Mastercard
        Some(b'2') | Some(b'5') => len == 16,
        // JCB, UnionPay, Discover, Maestro, domestic debit
        Some(b'3') | Some(b'6') | Some(b'9') => (16..=19).contains(&len),
        _ => false,
    }
}

/// Luhn algorithm for card number validation
pub fn luhn_check(number: &str) -> bool {
    let digits: Vec<u32> = number.chars().filter_map(|c| c.to_digit(10)).collect();
    if digits.is_empty() {
        return false;
    }
    let mut sum = 0u32;
    let mut double = false;
    for &digit in digits.iter().rev() {
        let mut d = digit;
        if double {
            d *= 2;
            if d > 9 {
                d -= 9;
            }
        }
        sum += d;
        double = !double;
    }
    sum % 10 == 0
}

/// Validate a resident ID number: birth date, and the ISO 7064 MOD 11-2
/// check character for the 18-digit form (the 15-digit form has none)
pub fn id_card_valid(id: &str) -> bool {
    let chars: Vec<char> = id.chars().collect();
    let (year, date_at) = match chars.len() {
        18 => (parse_digits(&chars[6..10]), 10),
        15 => (parse_digits(&chars[6..8]).map(|yy| 1900 + yy), 8),
        _ => return false,
    };
    let (Some(year), Some(month), Some(day)) = (
        year,
        parse_digits(&chars[date_at..date_at + 2]),
        parse_digits(&chars[date_at + 2..date_at + 4]),
    ) else {
        return false;
    };
    if !date_valid(year, month, day) {
        return false;
    }

    if chars.len() == 15 {
        return chars.iter().all(|c| c.is_ascii_digit());
    }

    let mut sum = 0;
    for (c, weight) in chars[..17].iter().zip(ID_WEIGHTS) {
        match c.to_digit(10) {
            Some(d) => sum += d * weight,
            None => return false,
        }
    }
    ID_CHECK_CHARS[(sum % 11) as usize] == chars[17].to_ascii_uppercase()
}

fn parse_digits(chars: &[char]) -> Option<u32> {
    chars
        .iter()
        .try_fold(0u32, |acc, c| c.to_digit(10).map(|d| acc * 10 + d))
}

fn date_valid(year: u32, month: u32, day: u32) -> bool {
    let leap = (year % 4 == 0 && year % 100 != 0) || year % 400 == 0;
    let days = match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 if leap => 29,
        2 => 28,
        _ => return false,
    };
    (1..=days).contains(&day)
}
