use std::time::Duration;

use crate::{MAX_RETRY_DELAY, MIN_RETRY_DELAY};

// =============================================================================
// Request
// =============================================================================

/// A reconcile request for one resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request<Id> {
    /// Resource being reconciled.
    pub id: Id,

    /// Number of retries already spent on this request.
    attempt: u32,
}

impl<Id> Request<Id> {
    /// Create a fresh request.
    pub fn new(id: Id) -> Self {
        Self { id, attempt: 0 }
    }

    /// Retries already spent on this request.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// The request as rescheduled after a retry.
    pub(crate) fn next_attempt(self) -> Self {
        Self {
            id: self.id,
            attempt: self.attempt.saturating_add(1),
        }
    }

    /// Done, nothing further to do.
    pub fn ack(&self) -> Directive {
        Directive::Ack
    }

    /// Reschedule after a fixed delay.
    pub fn retry(&self, error: impl Into<anyhow::Error>, after: Duration) -> Directive {
        Directive::Retry {
            error: error.into(),
            after,
        }
    }

    /// Reschedule after the policy's delay for this attempt.
    pub fn retry_with_backoff(
        &self,
        error: impl Into<anyhow::Error>,
        backoff: &BackoffPolicy,
    ) -> Directive {
        self.retry(error, backoff.delay(self.attempt))
    }

    /// Permanent failure; the request is dropped and the error surfaced.
    pub fn fail(&self, error: impl Into<anyhow::Error>) -> Directive {
        Directive::Fail {
            error: error.into(),
        }
    }
}

// =============================================================================
// Directive
// =============================================================================

/// Outcome of a single reconcile attempt.
#[derive(Debug)]
pub enum Directive {
    /// Converged or non-actionable.
    Ack,

    /// Try again after `after`.
    Retry {
        error: anyhow::Error,
        after: Duration,
    },

    /// Permanent failure; never retried.
    Fail { error: anyhow::Error },
}

impl Directive {
    pub fn is_ack(&self) -> bool {
        matches!(self, Self::Ack)
    }

    pub fn is_retry(&self) -> bool {
        matches!(self, Self::Retry { .. })
    }

    pub fn is_fail(&self) -> bool {
        matches!(self, Self::Fail { .. })
    }

    /// Delay before the next attempt, for retries.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Retry { after, .. } => Some(*after),
            _ => None,
        }
    }
}

// =============================================================================
// Backoff Policy
// =============================================================================

/// Exponential backoff between a minimum and a maximum delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay for the first retry.
    pub base: Duration,

    /// Maximum delay.
    pub max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: MIN_RETRY_DELAY,
            max: MAX_RETRY_DELAY,
        }
    }
}

impl BackoffPolicy {
    /// Calculate delay for the given attempt number.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .unwrap_or(self.max)
            .min(self.max)
    }
}
