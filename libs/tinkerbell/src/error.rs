//! Error types for store and pipeline operations

use std::time::Duration;

use onboard_reconcile::{Classify, ErrorCode};
use thiserror::Error;

use crate::ResourceKind;

/// Errors returned by a [`crate::ResourceStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// No resource with this name exists.
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: ResourceKind,
        namespace: String,
        name: String,
    },

    /// A resource with this name already exists.
    #[error("{kind} {namespace}/{name} already exists")]
    AlreadyExists {
        kind: ResourceKind,
        namespace: String,
        name: String,
    },

    /// The call did not complete in time.
    #[error("{operation} timed out after {elapsed:?}")]
    Timeout {
        operation: &'static str,
        elapsed: Duration,
    },

    /// The store returned a different kind than requested.
    #[error("expected {expected}, found {found}")]
    KindMismatch {
        expected: ResourceKind,
        found: ResourceKind,
    },

    /// Backend failure.
    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl Classify for StoreError {
    fn code(&self) -> Option<ErrorCode> {
        Some(match self {
            Self::NotFound { .. } => ErrorCode::NotFound,
            Self::AlreadyExists { .. } => ErrorCode::AlreadyExists,
            Self::Timeout { .. } => ErrorCode::DeadlineExceeded,
            Self::KindMismatch { .. } => ErrorCode::Internal,
            Self::Backend(_) => ErrorCode::Unavailable,
        })
    }
}

/// Errors building or encoding a pipeline document.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// YAML encoding or decoding failed.
    #[error("pipeline encoding error: {0}")]
    Encoding(#[from] serde_yaml::Error),

    /// Missing required field
    #[error("missing required field: {0}")]
    MissingField(String),

    /// Two actions share a name.
    #[error("duplicate action name: {0}")]
    DuplicateAction(String),
}

impl Classify for PipelineError {
    fn code(&self) -> Option<ErrorCode> {
        Some(match self {
            Self::Encoding(_) => ErrorCode::Internal,
            Self::MissingField(_) | Self::DuplicateAction(_) => ErrorCode::InvalidArgument,
        })
    }
}
