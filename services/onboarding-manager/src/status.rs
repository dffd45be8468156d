//! Resource status values written to inventory.

use std::borrow::Cow;
use std::fmt;

/// Coarse indicator attached to every status string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StatusIndicator {
    #[default]
    Unspecified,
    Error,
    InProgress,
    Idle,
}

impl fmt::Display for StatusIndicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unspecified => "STATUS_INDICATION_UNSPECIFIED",
            Self::Error => "STATUS_INDICATION_ERROR",
            Self::InProgress => "STATUS_INDICATION_IN_PROGRESS",
            Self::Idle => "STATUS_INDICATION_IDLE",
        };
        f.write_str(s)
    }
}

/// A human-readable status paired with its indicator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct ResourceStatus {
    pub status: Cow<'static, str>,
    pub indicator: StatusIndicator,
}

impl ResourceStatus {
    pub const fn new(status: &'static str, indicator: StatusIndicator) -> Self {
        Self {
            status: Cow::Borrowed(status),
            indicator,
        }
    }

    /// `"<status>: <details>"`, or the bare status when `details` is empty.
    pub fn with_details(&self, details: &str) -> Self {
        if details.is_empty() {
            return self.clone();
        }
        Self {
            status: Cow::Owned(format!("{}: {}", self.status, details)),
            indicator: self.indicator,
        }
    }

    /// Whether this status was derived from `base`, with or without details.
    pub fn is(&self, base: &ResourceStatus) -> bool {
        self.indicator == base.indicator
            && (self.status == base.status
                || self
                    .status
                    .strip_prefix(base.status.as_ref())
                    .is_some_and(|rest| rest.starts_with(": ")))
    }
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.status, self.indicator)
    }
}

pub const PROVISIONING_IN_PROGRESS: ResourceStatus =
    ResourceStatus::new("Provisioning In Progress", StatusIndicator::InProgress);
pub const PROVISIONING_FAILED: ResourceStatus =
    ResourceStatus::new("Provisioning Failed", StatusIndicator::Error);
pub const PROVISIONING_DONE: ResourceStatus =
    ResourceStatus::new("Provisioned", StatusIndicator::Idle);
pub const UNKNOWN: ResourceStatus = ResourceStatus::new("Unknown", StatusIndicator::Unspecified);
pub const REBOOTING: ResourceStatus = ResourceStatus::new("Rebooting", StatusIndicator::InProgress);
pub const INVALIDATED: ResourceStatus = ResourceStatus::new("Invalidated", StatusIndicator::Idle);
pub const DELETING: ResourceStatus = ResourceStatus::new("Deleting", StatusIndicator::InProgress);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_details() {
        let status = PROVISIONING_IN_PROGRESS.with_details("3/20: Streaming OS image");
        assert_eq!(status.status, "Provisioning In Progress: 3/20: Streaming OS image");
        assert_eq!(status.indicator, StatusIndicator::InProgress);

        assert_eq!(PROVISIONING_FAILED.with_details(""), PROVISIONING_FAILED);
    }

    #[test]
    fn test_is() {
        let status = PROVISIONING_FAILED.with_details("5/20: Rebooting timeout");
        assert!(status.is(&PROVISIONING_FAILED));
        assert!(PROVISIONING_DONE.is(&PROVISIONING_DONE));
        assert!(!status.is(&PROVISIONING_IN_PROGRESS));

        let lookalike = ResourceStatus::new("Provisioned extra", StatusIndicator::Idle);
        assert!(!lookalike.is(&PROVISIONING_DONE));
    }
}
