//! Error types for rule construction and matching.

use thiserror::Error;

/// Errors raised while building or applying normalization rules.
#[derive(Debug, Clone, Error)]
pub enum RuleError {
    /// No rule in the table matches the input.
    #[error("{uri} doesn't match any rule")]
    NoMatch {
        /// The URI that matched nothing
        uri: String,
    },

    /// The rule pattern is not a valid regular expression.
    #[error("invalid rule pattern '{pattern}': {reason}")]
    InvalidPattern {
        /// The offending pattern
        pattern: String,
        /// Regex compiler message
        reason: String,
    },

    /// A replacement template cannot produce a value for the rule pattern.
    #[error("Wrong normalization rule: match {pattern} {field} {template}: {reason}")]
    Malformed {
        /// The rule pattern
        pattern: String,
        /// Which template failed (`replace` or `resolve`)
        field: &'static str,
        /// The template as written
        template: String,
        /// What is wrong with it
        reason: String,
    },
}

impl RuleError {
    /// Creates a `NoMatch` error.
    #[must_use]
    pub fn no_match(uri: &str) -> Self {
        Self::NoMatch {
            uri: uri.to_string(),
        }
    }

    /// Creates an `InvalidPattern` error.
    #[must_use]
    pub fn invalid_pattern(pattern: &str, reason: impl ToString) -> Self {
        Self::InvalidPattern {
            pattern: pattern.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Creates a `Malformed` error.
    #[must_use]
    pub fn malformed(pattern: &str, field: &'static str, template: &str, reason: &str) -> Self {
        Self::Malformed {
            pattern: pattern.to_string(),
            field,
            template: template.to_string(),
            reason: reason.to_string(),
        }
    }
}
