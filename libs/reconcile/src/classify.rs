//! Error classification into directives.
//!
//! Domain errors expose an [`ErrorCode`] through [`Classify`]. Two tables map
//! codes to directives: one for failures talking to the inventory, one for
//! failures while provisioning. An error that reports no code is considered
//! malformed and is acknowledged rather than retried, so unknown failures
//! cannot cause unbounded retry loops.

use std::fmt;

use tracing::{debug, warn};

use crate::{BackoffPolicy, Directive, Request};

/// Status codes carried by domain errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NotFound,
    AlreadyExists,
    Unauthenticated,
    PermissionDenied,
    InvalidArgument,
    Unavailable,
    DeadlineExceeded,
    /// Work was started and should be checked again later.
    OperationInProgress,
    /// Unrecoverable; requires outside intervention.
    Aborted,
    Internal,
    Unknown,
}

impl ErrorCode {
    /// Codes that mean the event is stale or already resolved.
    pub fn is_benign(&self) -> bool {
        matches!(
            self,
            Self::NotFound | Self::AlreadyExists | Self::Unauthenticated | Self::PermissionDenied
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotFound => "not_found",
            Self::AlreadyExists => "already_exists",
            Self::Unauthenticated => "unauthenticated",
            Self::PermissionDenied => "permission_denied",
            Self::InvalidArgument => "invalid_argument",
            Self::Unavailable => "unavailable",
            Self::DeadlineExceeded => "deadline_exceeded",
            Self::OperationInProgress => "operation_in_progress",
            Self::Aborted => "aborted",
            Self::Internal => "internal",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// An error that can report a status code.
///
/// Returning `None` marks the error as unclassified.
pub trait Classify: std::error::Error + Send + Sync + 'static {
    fn code(&self) -> Option<ErrorCode>;
}

/// Directive for a failed inventory call.
pub fn inventory_directive<Id: fmt::Debug, E: Classify>(request: &Request<Id>, error: E) -> Directive {
    match error.code() {
        None => {
            warn!(id = ?request.id, error = %error, "Unclassified inventory error, not retrying");
            request.ack()
        }
        Some(code) if code.is_benign() => {
            debug!(id = ?request.id, code = %code, error = %error, "Inventory error acknowledged");
            request.ack()
        }
        Some(code) => {
            debug!(id = ?request.id, code = %code, "Retrying after inventory error");
            request.retry_with_backoff(error, &BackoffPolicy::default())
        }
    }
}

/// Directive for a failed provisioning step.
pub fn provisioning_directive<Id: fmt::Debug, E: Classify>(
    request: &Request<Id>,
    error: E,
) -> Directive {
    match error.code() {
        None => {
            warn!(id = ?request.id, error = %error, "Unclassified provisioning error, not retrying");
            request.ack()
        }
        Some(ErrorCode::Aborted) => request.fail(error),
        Some(code) => {
            debug!(id = ?request.id, code = %code, "Retrying after provisioning error");
            request.retry_with_backoff(error, &BackoffPolicy::default())
        }
    }
}

/// Pass a successful inventory result through, or turn the error into a directive.
pub fn handle_inventory_error<Id: fmt::Debug, T, E: Classify>(
    request: &Request<Id>,
    result: Result<T, E>,
) -> Result<T, Directive> {
    result.map_err(|error| inventory_directive(request, error))
}

/// Pass a successful provisioning result through, or turn the error into a directive.
pub fn handle_provisioning_error<Id: fmt::Debug, T, E: Classify>(
    request: &Request<Id>,
    result: Result<T, E>,
) -> Result<T, Directive> {
    result.map_err(|error| provisioning_directive(request, error))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rstest::rstest;
    use thiserror::Error;

    use super::*;

    #[derive(Debug, Error)]
    #[error("test error ({0:?})")]
    struct TestError(Option<ErrorCode>);

    impl Classify for TestError {
        fn code(&self) -> Option<ErrorCode> {
            self.0
        }
    }

    #[rstest]
    #[case::not_found(ErrorCode::NotFound)]
    #[case::already_exists(ErrorCode::AlreadyExists)]
    #[case::unauthenticated(ErrorCode::Unauthenticated)]
    #[case::permission_denied(ErrorCode::PermissionDenied)]
    fn test_inventory_benign_codes_ack(#[case] code: ErrorCode) {
        let request = Request::new("inst-1");
        assert!(inventory_directive(&request, TestError(Some(code))).is_ack());
    }

    #[test]
    fn test_inventory_unclassified_acks() {
        let request = Request::new("inst-1");
        assert!(inventory_directive(&request, TestError(None)).is_ack());
    }

    #[rstest]
    #[case::unavailable(ErrorCode::Unavailable)]
    #[case::internal(ErrorCode::Internal)]
    #[case::invalid_argument(ErrorCode::InvalidArgument)]
    #[case::aborted(ErrorCode::Aborted)]
    fn test_inventory_other_codes_retry(#[case] code: ErrorCode) {
        let request = Request::new("inst-1");
        let directive = inventory_directive(&request, TestError(Some(code)));
        assert_eq!(directive.retry_after(), Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_provisioning_in_progress_retries() {
        let request = Request::new("inst-1");
        let directive = provisioning_directive(&request, TestError(Some(ErrorCode::OperationInProgress)));
        assert!(directive.is_retry());
    }

    #[test]
    fn test_provisioning_aborted_fails() {
        let request = Request::new("inst-1");
        let directive = provisioning_directive(&request, TestError(Some(ErrorCode::Aborted)));
        assert!(directive.is_fail());
    }

    #[rstest]
    #[case::unavailable(ErrorCode::Unavailable)]
    #[case::not_found(ErrorCode::NotFound)]
    #[case::unknown(ErrorCode::Unknown)]
    fn test_provisioning_other_codes_retry(#[case] code: ErrorCode) {
        let request = Request::new("inst-1");
        assert!(provisioning_directive(&request, TestError(Some(code))).is_retry());
    }

    #[test]
    fn test_provisioning_unclassified_acks() {
        let request = Request::new("inst-1");
        assert!(provisioning_directive(&request, TestError(None)).is_ack());
    }

    #[test]
    fn test_ok_results_pass_through() {
        let request = Request::new("inst-1");

        let ok: Result<u32, TestError> = Ok(7);
        assert_eq!(handle_inventory_error(&request, ok).unwrap(), 7);

        let ok: Result<(), TestError> = Ok(());
        assert!(handle_provisioning_error(&request, ok).is_ok());
    }

    #[test]
    fn test_backoff_grows_with_attempts() {
        let request = Request::new("inst-1").next_attempt().next_attempt().next_attempt();
        let directive = inventory_directive(&request, TestError(Some(ErrorCode::Unavailable)));
        assert_eq!(directive.retry_after(), Some(Duration::from_secs(8)));
    }
}
