//! Error types for URI resolution.

use thiserror::Error;

use crate::metadata::ParseError;
use crate::rules::RuleError;

/// Errors that can occur while resolving or fetching a URI.
#[derive(Debug, Clone, Error)]
pub enum ResolveError {
    /// No rule with a resolve template matches the input.
    #[error("{uri} doesn't match any rule")]
    NoRuleMatch {
        /// The unmatched input
        uri: String,
    },

    /// The matched rule cannot produce a value; a configuration bug.
    #[error(transparent)]
    MalformedRule(RuleError),

    /// Sending failed and the retry budget is spent.
    #[error("Failed to fetch data from {url} with message {message}")]
    TransportFailure {
        /// The request target
        url: String,
        /// The last transport error text
        message: String,
        /// Attempt sequences made, including the initial one
        attempts: u32,
    },

    /// The final status is neither success nor retryable, or retries ran out.
    #[error("Failed to fetch data from {url} with status code {status}")]
    NonRetryableStatus {
        /// The request target
        url: String,
        /// The final status code
        status: u16,
        /// Attempt sequences made, including the initial one
        attempts: u32,
    },

    /// The authority answered with a different representation.
    #[error("Failed to fetch data from {url}: expected content-type '{expected}' but got '{actual}'")]
    ContentTypeMismatch {
        /// The final URL
        url: String,
        /// The rule format
        expected: String,
        /// The returned media type, empty when the header was missing
        actual: String,
    },

    /// The fetched metadata says nothing about the requested subject.
    #[error("metadata fetched for {uri} resolved to {url} doesn't contain a matching subject")]
    NoMatchingSubject {
        /// The requested URI
        uri: String,
        /// The final URL the metadata came from
        url: String,
    },

    /// A redirect chain exceeded the configured hop limit.
    #[error("too many redirects ({count}) resolving {url}")]
    TooManyRedirects {
        /// The URL the chain started from
        url: String,
        /// Hops followed before giving up
        count: usize,
    },

    /// A built or redirected URL cannot be parsed.
    #[error("invalid URL '{url}': {reason}")]
    InvalidUrl {
        /// The offending URL text
        url: String,
        /// Parser message
        reason: String,
    },

    /// The body could not be parsed as the rule format.
    #[error("failed to parse metadata from {url}: {source}")]
    Parse {
        /// The final URL
        url: String,
        /// Parser error
        #[source]
        source: ParseError,
    },
}

impl ResolveError {
    /// Creates a `NoRuleMatch` error.
    #[must_use]
    pub fn no_rule_match(uri: &str) -> Self {
        Self::NoRuleMatch {
            uri: uri.to_string(),
        }
    }

    /// Creates a `TransportFailure` error.
    #[must_use]
    pub fn transport_failure(url: &str, message: &str, attempts: u32) -> Self {
        Self::TransportFailure {
            url: url.to_string(),
            message: message.to_string(),
            attempts,
        }
    }

    /// Creates a `NonRetryableStatus` error.
    #[must_use]
    pub fn non_retryable_status(url: &str, status: u16, attempts: u32) -> Self {
        Self::NonRetryableStatus {
            url: url.to_string(),
            status,
            attempts,
        }
    }

    /// Creates a `ContentTypeMismatch` error.
    #[must_use]
    pub fn content_type_mismatch(url: &str, expected: &str, actual: &str) -> Self {
        Self::ContentTypeMismatch {
            url: url.to_string(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    /// Creates a `NoMatchingSubject` error.
    #[must_use]
    pub fn no_matching_subject(uri: &str, url: &str) -> Self {
        Self::NoMatchingSubject {
            uri: uri.to_string(),
            url: url.to_string(),
        }
    }

    /// Creates a `TooManyRedirects` error.
    #[must_use]
    pub fn too_many_redirects(url: &str, count: usize) -> Self {
        Self::TooManyRedirects {
            url: url.to_string(),
            count,
        }
    }

    /// Creates an `InvalidUrl` error.
    #[must_use]
    pub fn invalid_url(url: &str, reason: impl ToString) -> Self {
        Self::InvalidUrl {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl From<RuleError> for ResolveError {
    fn from(error: RuleError) -> Self {
        match error {
            RuleError::NoMatch { uri } => Self::NoRuleMatch { uri },
            other => Self::MalformedRule(other),
        }
    }
}
