//! Reconciliation loop primitives.
//!
//! This library provides the runtime used to converge provisioning state
//! with an external desired-state inventory. Key concepts:
//!
//! - **Request**: a unit of work addressed by a [`ReconcilerId`].
//! - **Directive**: the outcome of one reconcile attempt (ack, retry, fail).
//! - **Controller**: a per-kind worker pool that dispatches requests to a
//!   [`Reconciler`] and acts on the returned directive.
//!
//! # Invariants
//!
//! - Requests for the same id are always handled by the same worker, so two
//!   reconciliations of one resource never run concurrently.
//! - Every directive is acted on; retries are rescheduled with backoff.
//! - Errors are classified through [`Classify`]; values that carry no code
//!   are treated as non-actionable.

mod classify;
mod controller;
mod directive;
mod id;

use std::time::Duration;

pub use classify::{
    handle_inventory_error, handle_provisioning_error, inventory_directive, provisioning_directive,
    Classify, ErrorCode,
};
pub use controller::{Controller, ControllerConfig, Reconciler};
pub use directive::{BackoffPolicy, Directive, Request};
pub use id::{ReconcilerId, ID_DELIMITER};

use thiserror::Error;

/// Reconciliation errors.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Timeout waiting for a reconcile call.
    #[error("timeout after {elapsed:?} reconciling {resource}")]
    Timeout {
        resource: String,
        elapsed: Duration,
    },

    /// A reconciler id could not be decoded.
    #[error("invalid reconciler id: {0}")]
    InvalidId(String),

    /// The controller no longer accepts requests.
    #[error("controller {0} is stopped")]
    Stopped(String),
}

impl Classify for ReconcileError {
    fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::Timeout { .. } => Some(ErrorCode::DeadlineExceeded),
            Self::InvalidId(_) => Some(ErrorCode::InvalidArgument),
            Self::Stopped(_) => Some(ErrorCode::Unavailable),
        }
    }
}

/// Default period of the full reconciliation pass.
pub const DEFAULT_TICKER_PERIOD: Duration = Duration::from_secs(10 * 60); // 10 minutes

/// Default timeout for a single reconcile call.
pub const DEFAULT_RECONCILE_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Default number of workers per resource kind.
pub const DEFAULT_PARALLELISM: usize = 1;

/// Minimum retry delay.
pub const MIN_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Maximum retry delay.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);
