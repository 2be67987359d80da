//! Retry policy for metadata lookups.
//!
//! This module provides the [`RetryPolicy`] and [`BackoffScale`] types that
//! decide what happens after each response or transport error seen while
//! resolving a URI.
//!
//! # Overview
//!
//! Each lookup is one sequence of attempts. Attempt 0 is the initial request
//! and is never delayed; the n-th retry is attempt n. After every outcome the
//! policy returns a [`RetryDecision`]:
//! - [`RetryDecision::Accept`] - success status (200, 201, 204), stop here
//! - [`RetryDecision::Retry`] - transient condition and budget left, sleep then retry
//! - [`RetryDecision::GiveUp`] - anything else, the caller raises an error
//!
//! A transient condition is either a transport error or a status listed in
//! `retryable_statuses` (429, 502, 503, 504 by default). With
//! `max_attempts = N` at most `N + 1` requests are made.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use uri_normalizer_core::retry::{BackoffScale, RetryDecision, RetryPolicy};
//!
//! let policy = RetryPolicy::new(2, Duration::from_millis(500), BackoffScale::Multiplicative);
//!
//! match policy.decide_status(503, 1) {
//!     RetryDecision::Retry { delay, attempt } => {
//!         assert_eq!(delay, Duration::from_millis(500));
//!         assert_eq!(attempt, 1);
//!     }
//!     other => panic!("unexpected decision {other:?}"),
//! }
//! ```

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument};

/// Default number of retries after the initial attempt.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 0;

/// Statuses treated as transient unless configured otherwise.
pub const DEFAULT_RETRYABLE_STATUSES: [u16; 4] = [429, 502, 503, 504];

/// Statuses that end an attempt sequence successfully.
pub const SUCCESS_STATUSES: [u16; 3] = [200, 201, 204];

/// Unknown backoff scale name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown backoff scale '{0}' (expected constant, multiplicative or power)")]
pub struct UnknownScale(pub String);

/// Shape of delay growth across retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum BackoffScale {
    /// Every retry waits `base_delay`.
    #[default]
    Constant,
    /// Retry n waits `base_delay * n`.
    Multiplicative,
    /// Retry n waits `base_delay ^ n` seconds.
    Power,
}

impl BackoffScale {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Constant => "constant",
            Self::Multiplicative => "multiplicative",
            Self::Power => "power",
        }
    }
}

impl FromStr for BackoffScale {
    type Err = UnknownScale;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "constant" | "const" => Ok(Self::Constant),
            "multiplicative" | "multi" => Ok(Self::Multiplicative),
            "power" | "pow" => Ok(Self::Power),
            _ => Err(UnknownScale(s.to_string())),
        }
    }
}

impl TryFrom<String> for BackoffScale {
    type Error = UnknownScale;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BackoffScale> for String {
    fn from(scale: BackoffScale) -> Self {
        scale.as_str().to_string()
    }
}

impl fmt::Display for BackoffScale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to do after one request outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Success status; use this response.
    Accept,

    /// Transient condition; sleep and try again.
    Retry {
        /// How long to wait before retrying.
        delay: Duration,
        /// The attempt number of the upcoming retry (first retry is 1).
        attempt: u32,
    },

    /// Terminal failure; the caller reports an error.
    GiveUp,
}

/// Attempt budget, backoff shape and transient status set.
///
/// # Default Values
///
/// - `max_attempts`: 0 (no retries)
/// - `base_delay`: 0
/// - `scale`: constant
/// - `retryable_statuses`: 429, 502, 503, 504
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    scale: BackoffScale,
    retryable_statuses: BTreeSet<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::ZERO,
            scale: BackoffScale::Constant,
            retryable_statuses: DEFAULT_RETRYABLE_STATUSES.into_iter().collect(),
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with the default retryable status set.
    ///
    /// # Arguments
    ///
    /// * `max_attempts` - Retries allowed after the initial attempt
    /// * `base_delay` - Base delay fed to the backoff scale
    /// * `scale` - Delay growth across retries
    #[must_use]
    pub fn new(max_attempts: u32, base_delay: Duration, scale: BackoffScale) -> Self {
        Self {
            max_attempts,
            base_delay,
            scale,
            ..Self::default()
        }
    }

    /// Replaces the set of statuses treated as transient.
    #[must_use]
    pub fn with_retryable_statuses(mut self, statuses: impl IntoIterator<Item = u16>) -> Self {
        self.retryable_statuses = statuses.into_iter().collect();
        self
    }

    /// A policy that never retries.
    #[must_use]
    pub fn no_retry() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    #[must_use]
    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    #[must_use]
    pub fn scale(&self) -> BackoffScale {
        self.scale
    }

    #[must_use]
    pub fn retryable_statuses(&self) -> &BTreeSet<u16> {
        &self.retryable_statuses
    }

    #[must_use]
    pub fn is_success(status: u16) -> bool {
        SUCCESS_STATUSES.contains(&status)
    }

    #[must_use]
    pub fn is_retryable(&self, status: u16) -> bool {
        self.retryable_statuses.contains(&status)
    }

    /// Decides what to do with a response status.
    ///
    /// `attempt` is the number the next retry would carry (1 after the initial
    /// request failed).
    #[instrument(skip(self), fields(max_attempts = self.max_attempts))]
    pub fn decide_status(&self, status: u16, attempt: u32) -> RetryDecision {
        if Self::is_success(status) {
            return RetryDecision::Accept;
        }
        if self.is_retryable(status) {
            return self.retry_or_give_up(attempt);
        }
        debug!(status, "status is not retryable");
        RetryDecision::GiveUp
    }

    /// Decides what to do after a transport error.
    #[instrument(skip(self), fields(max_attempts = self.max_attempts))]
    pub fn decide_transport_error(&self, attempt: u32) -> RetryDecision {
        self.retry_or_give_up(attempt)
    }

    fn retry_or_give_up(&self, attempt: u32) -> RetryDecision {
        if attempt > self.max_attempts {
            debug!(attempt, max = self.max_attempts, "max attempts reached");
            return RetryDecision::GiveUp;
        }
        let delay = self.delay(attempt);
        debug!(attempt, delay_ms = delay.as_millis(), "will retry");
        RetryDecision::Retry { delay, attempt }
    }

    /// Delay before retry number `attempt`.
    ///
    /// Formula by scale: constant `base`, multiplicative `base * attempt`,
    /// power `base ^ attempt` (in seconds). Non-finite results saturate to
    /// [`Duration::MAX`].
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay.as_secs_f64();
        let secs = match self.scale {
            BackoffScale::Constant => base,
            BackoffScale::Multiplicative => base * f64::from(attempt),
            BackoffScale::Power => base.powf(f64::from(attempt)),
        };
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }
}
