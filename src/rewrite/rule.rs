//! Status rewrite rules.
//!
//! A rule pairs a status pattern (`"404"` or a class wildcard like `"4xx"`)
//! and an optional URL substring with the status code to substitute.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Validation failure for a rule, or a bad index into the rule list.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuleError {
    #[error("original status code must not be empty")]
    EmptyOriginal,

    #[error("new status code must not be empty")]
    EmptyReplacement,

    #[error("invalid status class '{0}': expected 1xx to 5xx")]
    InvalidClass(String),

    #[error("status code '{0}' is not a number")]
    NotNumeric(String),

    #[error("status code {0} is outside 100-599")]
    OutOfRange(u32),

    #[error("no rule at index {index} (have {len})")]
    IndexOutOfRange { index: usize, len: usize },
}

/// How a rule's `original_status_code` is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusPattern<'a> {
    /// `Nxx`: any status whose first digit is `N`.
    Class(char),
    /// Compared verbatim against the decimal status.
    Literal(&'a str),
}

impl<'a> StatusPattern<'a> {
    pub fn parse(code: &'a str) -> Self {
        match code.strip_suffix("xx").and_then(|prefix| prefix.chars().next()) {
            Some(first) => StatusPattern::Class(first),
            None => StatusPattern::Literal(code),
        }
    }

    pub fn matches(&self, status: u16) -> bool {
        let status = status.to_string();
        match self {
            StatusPattern::Class(digit) => status.starts_with(*digit),
            StatusPattern::Literal(code) => *code == status,
        }
    }
}

/// A single status rewrite rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RewriteRule {
    pub original_status_code: String,
    pub new_status_code: String,
    /// Substring of the request URL; empty matches every URL.
    pub endpoint_pattern: String,
    pub enabled: bool,
    pub description: String,
}

impl Default for RewriteRule {
    fn default() -> Self {
        Self {
            original_status_code: String::new(),
            new_status_code: String::new(),
            endpoint_pattern: String::new(),
            enabled: true,
            description: String::new(),
        }
    }
}

impl RewriteRule {
    /// An enabled rule with no description.
    pub fn new(
        original_status_code: impl Into<String>,
        new_status_code: impl Into<String>,
        endpoint_pattern: impl Into<String>,
    ) -> Self {
        Self {
            original_status_code: original_status_code.into(),
            new_status_code: new_status_code.into(),
            endpoint_pattern: endpoint_pattern.into(),
            ..Self::default()
        }
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Whether this rule applies to a response with `status` for `url`.
    pub fn matches(&self, status: u16, url: &str) -> bool {
        self.enabled
            && StatusPattern::parse(&self.original_status_code).matches(status)
            && (self.endpoint_pattern.is_empty() || url.contains(&self.endpoint_pattern))
    }

    /// The status this rule substitutes, if `new_status_code` is a usable code.
    pub fn replacement(&self) -> Result<u16, RuleError> {
        let code = self.new_status_code.as_str();
        let value: u32 = code
            .parse()
            .map_err(|_| RuleError::NotNumeric(code.to_string()))?;
        if !(100..=599).contains(&value) {
            return Err(RuleError::OutOfRange(value));
        }
        Ok(value as u16)
    }

    /// Check the rule before it is stored.
    ///
    /// Both codes must be non-empty and either a class wildcard `1xx`..`5xx`
    /// or a number in 100-599.
    pub fn validate(&self) -> Result<(), RuleError> {
        if self.original_status_code.is_empty() {
            return Err(RuleError::EmptyOriginal);
        }
        if self.new_status_code.is_empty() {
            return Err(RuleError::EmptyReplacement);
        }
        validate_code(&self.original_status_code)?;
        validate_code(&self.new_status_code)
    }
}

fn validate_code(code: &str) -> Result<(), RuleError> {
    if let Some(prefix) = code.strip_suffix("xx") {
        return match prefix {
            "1" | "2" | "3" | "4" | "5" => Ok(()),
            _ => Err(RuleError::InvalidClass(code.to_string())),
        };
    }
    let value: u32 = code
        .parse()
        .map_err(|_| RuleError::NotNumeric(code.to_string()))?;
    if (100..=599).contains(&value) {
        Ok(())
    } else {
        Err(RuleError::OutOfRange(value))
    }
}
