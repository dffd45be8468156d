//! Inventory model and client interface.
//!
//! The inventory holds desired state for hosts, instances and operating
//! systems. This service only consumes it: it lists and reads resources,
//! subscribes to change events, and writes back current state and status.

mod memory;

use std::fmt;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use onboard_reconcile::{Classify, ErrorCode};
use thiserror::Error;
use uuid::Uuid;

use crate::status::ResourceStatus;

pub use memory::MemoryInventory;

/// Timeout for a single inventory call.
pub const INVENTORY_TIMEOUT: Duration = Duration::from_secs(3);

// =============================================================================
// Errors
// =============================================================================

/// Inventory client errors.
#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("resource {0} not found")]
    NotFound(String),

    #[error("resource {0} already exists")]
    AlreadyExists(String),

    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("inventory unavailable: {0}")]
    Unavailable(String),

    #[error("inventory call timed out after {0:?}")]
    DeadlineExceeded(Duration),

    /// A response the client could not interpret. Carries no status code.
    #[error("malformed inventory response: {0}")]
    Malformed(String),
}

impl InventoryError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl Classify for InventoryError {
    fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::NotFound(_) => Some(ErrorCode::NotFound),
            Self::AlreadyExists(_) => Some(ErrorCode::AlreadyExists),
            Self::Unauthenticated(_) => Some(ErrorCode::Unauthenticated),
            Self::PermissionDenied(_) => Some(ErrorCode::PermissionDenied),
            Self::InvalidArgument(_) => Some(ErrorCode::InvalidArgument),
            Self::Unavailable(_) => Some(ErrorCode::Unavailable),
            Self::DeadlineExceeded(_) => Some(ErrorCode::DeadlineExceeded),
            Self::Malformed(_) => None,
        }
    }
}

/// Run an inventory call under [`INVENTORY_TIMEOUT`].
pub async fn bounded<T, F>(fut: F) -> Result<T, InventoryError>
where
    F: Future<Output = Result<T, InventoryError>>,
{
    tokio::time::timeout(INVENTORY_TIMEOUT, fut)
        .await
        .map_err(|_| InventoryError::DeadlineExceeded(INVENTORY_TIMEOUT))?
}

// =============================================================================
// Resource kinds and events
// =============================================================================

/// Inventory resource kinds handled by this service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum InventoryKind {
    Host,
    Instance,
    Os,
}

impl InventoryKind {
    pub const ALL: [InventoryKind; 3] = [Self::Host, Self::Instance, Self::Os];

    /// Resource id prefix for this kind.
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Host => "host-",
            Self::Instance => "inst-",
            Self::Os => "os-",
        }
    }

    /// Resolve the kind from a resource id such as `inst-0a1b2c3d`.
    pub fn from_resource_id(resource_id: &str) -> Result<Self, InventoryError> {
        Self::ALL
            .into_iter()
            .find(|kind| {
                resource_id
                    .strip_prefix(kind.prefix())
                    .is_some_and(|rest| !rest.is_empty())
            })
            .ok_or_else(|| {
                InventoryError::InvalidArgument(format!("unknown resource kind for {resource_id}"))
            })
    }
}

impl fmt::Display for InventoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Host => f.write_str("host"),
            Self::Instance => f.write_str("instance"),
            Self::Os => f.write_str("os"),
        }
    }
}

/// A reference to one inventory resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceRef {
    pub tenant_id: String,
    pub resource_id: String,
}

impl ResourceRef {
    pub fn new(tenant_id: impl Into<String>, resource_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            resource_id: resource_id.into(),
        }
    }
}

/// Kind of change an event reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Unspecified,
    Created,
    Updated,
    Deleted,
}

/// A change notification from the inventory watch stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub kind: EventKind,
    pub resource: Option<ResourceRef>,
}

impl WatchEvent {
    pub fn new(kind: EventKind, resource: ResourceRef) -> Self {
        Self {
            kind,
            resource: Some(resource),
        }
    }

    /// Check the payload is complete.
    pub fn validate(&self) -> Result<&ResourceRef, InventoryError> {
        let resource = self
            .resource
            .as_ref()
            .ok_or_else(|| InventoryError::InvalidArgument("event has no resource".to_string()))?;
        if resource.tenant_id.is_empty() {
            return Err(InventoryError::InvalidArgument(format!(
                "event for {} has no tenant",
                resource.resource_id
            )));
        }
        if resource.resource_id.is_empty() {
            return Err(InventoryError::InvalidArgument(
                "event has an empty resource id".to_string(),
            ));
        }
        Ok(resource)
    }
}

// =============================================================================
// Resources
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HostState {
    #[default]
    Unspecified,
    Onboarded,
    Untrusted,
    Deleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum InstanceState {
    #[default]
    Unspecified,
    Running,
    Untrusted,
    Deleted,
}

/// Whether the OS is updated in place or replaced as an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OsType {
    #[default]
    Unspecified,
    Mutable,
    Immutable,
}

/// Who provisions the OS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OsProvider {
    #[default]
    Unspecified,
    Infra,
    External,
}

/// Platform security features requested for an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SecurityFeature {
    #[default]
    Unspecified,
    None,
    SecureBootAndFde,
}

impl SecurityFeature {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unspecified => "SECURITY_FEATURE_UNSPECIFIED",
            Self::None => "SECURITY_FEATURE_NONE",
            Self::SecureBootAndFde => "SECURITY_FEATURE_SECURE_BOOT_AND_FULL_DISK_ENCRYPTION",
        }
    }
}

/// A bare-metal host.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Host {
    pub resource_id: String,
    pub tenant_id: String,
    pub uuid: Uuid,
    pub serial_number: String,
    pub pxe_mac: String,
    pub bmc_ip: String,
    pub gateway: String,
    /// Set when a vendor-specific manager owns this host.
    pub provider: Option<String>,
    pub desired_state: HostState,
    pub current_state: HostState,
    pub host_status: ResourceStatus,
    /// Instance currently assigned to the host.
    pub instance_id: Option<String>,
}

/// An operating system profile.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OperatingSystem {
    pub resource_id: String,
    pub tenant_id: String,
    pub name: String,
    pub profile_name: String,
    pub architecture: String,
    pub image_url: String,
    pub sha256: String,
    pub os_type: OsType,
    pub os_provider: OsProvider,
    pub version: String,
    /// Resolved artifact locations, `"{os_url};{overlay_url}"`.
    pub repo_url: String,
    /// Cloud-init payload written verbatim onto the node.
    pub cloud_init: String,
    /// Installer script written verbatim onto the node.
    pub installer_script: String,
}

/// Local OS account provisioned for operators.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LocalAccount {
    pub username: String,
    pub ssh_key: String,
}

/// An instance: the OS deployment bound to one host.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Instance {
    pub resource_id: String,
    pub tenant_id: String,
    /// Eager-loaded host.
    pub host: Host,
    /// Desired OS.
    pub os: Option<OperatingSystem>,
    /// OS actually applied, by resource id.
    pub current_os: Option<String>,
    pub desired_state: InstanceState,
    pub current_state: InstanceState,
    pub security_feature: SecurityFeature,
    pub instance_status: ResourceStatus,
    pub provisioning_status: ResourceStatus,
    pub local_account: Option<LocalAccount>,
}

/// Fields of an instance this service writes back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceUpdate {
    pub current_state: InstanceState,
    pub instance_status: ResourceStatus,
    pub provisioning_status: ResourceStatus,
    pub current_os: Option<String>,
}

impl From<&Instance> for InstanceUpdate {
    fn from(instance: &Instance) -> Self {
        Self {
            current_state: instance.current_state,
            instance_status: instance.instance_status.clone(),
            provisioning_status: instance.provisioning_status.clone(),
            current_os: instance.current_os.clone(),
        }
    }
}

// =============================================================================
// Client
// =============================================================================

/// Inventory operations used by the reconcilers.
#[async_trait]
pub trait InventoryClient: Send + Sync {
    /// References to every resource of the given kinds.
    async fn list_all(&self, kinds: &[InventoryKind]) -> Result<Vec<ResourceRef>, InventoryError>;

    async fn get_host(&self, tenant_id: &str, resource_id: &str) -> Result<Host, InventoryError>;

    async fn get_instance(
        &self,
        tenant_id: &str,
        resource_id: &str,
    ) -> Result<Instance, InventoryError>;

    async fn get_os(
        &self,
        tenant_id: &str,
        resource_id: &str,
    ) -> Result<OperatingSystem, InventoryError>;

    async fn update_instance(
        &self,
        tenant_id: &str,
        resource_id: &str,
        update: InstanceUpdate,
    ) -> Result<(), InventoryError>;

    async fn set_host_state(
        &self,
        tenant_id: &str,
        resource_id: &str,
        state: HostState,
        status: ResourceStatus,
    ) -> Result<(), InventoryError>;

    async fn set_host_status(
        &self,
        tenant_id: &str,
        resource_id: &str,
        status: ResourceStatus,
    ) -> Result<(), InventoryError>;

    async fn delete_host(&self, tenant_id: &str, resource_id: &str) -> Result<(), InventoryError>;

    async fn set_os_repo_url(
        &self,
        tenant_id: &str,
        resource_id: &str,
        repo_url: &str,
    ) -> Result<(), InventoryError>;
}
