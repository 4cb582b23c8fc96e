//! Error policy for unrecoverable failures
//!
//! Every failure that cannot be fixed by a recovery handler is passed to a
//! [`FailureTracker`], which decides whether the crawl keeps going or aborts:
//!
//! - [`ErrorPolicy::Fail`] aborts on the first failure
//! - [`ErrorPolicy::Ignore`] logs and continues
//! - [`ErrorPolicy::FailAfter`] aborts once [`FAIL_AFTER_LIMIT`] failures
//!   happen in a row; any successful key resets the streak

use crate::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};

/// Consecutive failures tolerated by [`ErrorPolicy::FailAfter`]
pub const FAIL_AFTER_LIMIT: u32 = 3;

/// How the crawler reacts to unrecoverable failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ErrorPolicy {
    #[default]
    #[serde(rename = "fail")]
    Fail,

    #[serde(rename = "ignore")]
    Ignore,

    #[serde(rename = "fail3")]
    FailAfter,
}

impl ErrorPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fail => "fail",
            Self::Ignore => "ignore",
            Self::FailAfter => "fail3",
        }
    }
}

impl fmt::Display for ErrorPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fail" => Ok(Self::Fail),
            "ignore" => Ok(Self::Ignore),
            "fail3" => Ok(Self::FailAfter),
            other => Err(ConfigError::UnknownPolicy(other.to_string())),
        }
    }
}

/// Outcome of a policy decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Swallow the failure and keep crawling
    Continue,

    /// Propagate the failure and stop the crawl
    Abort,
}

/// Applies an [`ErrorPolicy`] to a stream of successes and failures
///
/// The counter is shared by all workers of a crawl, so it counts failures
/// that are consecutive in completion order.
#[derive(Debug, Default)]
pub struct FailureTracker {
    policy: ErrorPolicy,
    consecutive: AtomicU32,
}

impl FailureTracker {
    pub fn new(policy: ErrorPolicy) -> Self {
        Self {
            policy,
            consecutive: AtomicU32::new(0),
        }
    }

    pub fn policy(&self) -> ErrorPolicy {
        self.policy
    }

    /// Resets the failure streak
    pub fn record_success(&self) {
        self.consecutive.store(0, Ordering::SeqCst);
    }

    /// Counts one unrecoverable failure and decides what to do with it
    pub fn record_failure(&self) -> Verdict {
        let previous = self
            .consecutive
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some(n.saturating_add(1)))
            .unwrap_or_else(|n| n);
        let streak = previous.saturating_add(1);

        match self.policy {
            ErrorPolicy::Fail => Verdict::Abort,
            ErrorPolicy::Ignore => Verdict::Continue,
            ErrorPolicy::FailAfter if streak >= FAIL_AFTER_LIMIT => Verdict::Abort,
            ErrorPolicy::FailAfter => Verdict::Continue,
        }
    }

    /// Current number of failures since the last success
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive.load(Ordering::SeqCst)
    }
}
