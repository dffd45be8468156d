//! Device profiles.
//!
//! A [`DeviceProfile`] gathers the host facts needed to render a provisioning
//! template. It is built from the inventory instance at the start of every
//! provisioning attempt and never stored.

use onboard_reconcile::{Classify, ErrorCode};
use thiserror::Error;
use uuid::Uuid;

use crate::credentials::ClientCredentials;
use crate::inventory::{Instance, OsType, SecurityFeature};

/// Local address of the node-side proxy to the release server.
const LOCAL_IMAGE_PROXY: &str = "http://127.0.0.1";

/// Profile construction errors.
#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("instance {0} has no operating system")]
    MissingOs(String),

    #[error("unsupported OS type {os_type:?} for OS {os_resource_id}")]
    UnsupportedOsType {
        os_resource_id: String,
        os_type: OsType,
    },
}

impl Classify for ProfileError {
    fn code(&self) -> Option<ErrorCode> {
        Some(ErrorCode::InvalidArgument)
    }
}

/// Backbone pipeline family. Only OS types with a known install flow map to
/// a family, so an unsupported OS type never reaches the assembler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OsFamily {
    /// Mutable, package-managed OS.
    Ubuntu,
    /// Immutable image-based OS.
    Microvisor,
}

impl OsFamily {
    /// Family name used in template names and the Hardware OS distro.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ubuntu => "ubuntu",
            Self::Microvisor => "microvisor",
        }
    }
}

/// Proxy settings rendered into the node environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxySettings {
    pub http_proxy: String,
    pub https_proxy: String,
    pub no_proxy: String,
    pub ftp_proxy: String,
}

/// Service-wide values every profile inherits.
#[derive(Debug, Clone, Default)]
pub struct ProfileDefaults {
    /// Action image version used when the profile carries none.
    pub tinker_version: String,
    pub dev_mode: bool,
    pub proxies: ProxySettings,
    pub name_servers: Vec<String>,
}

/// Operator account created on the node in dev mode.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalUser {
    pub username: String,
    pub ssh_key: String,
}

/// Everything needed to render a host's provisioning template.
#[derive(Debug, Clone)]
pub struct DeviceProfile {
    pub guid: Uuid,
    pub tenant_id: String,
    pub serial_number: String,
    pub mac: String,
    pub ip: String,
    pub gateway: String,
    /// Node hostname. The host resource id, so it is unique per host.
    pub hostname: String,

    pub os_resource_id: String,
    pub os_image_url: String,
    pub os_image_sha256: String,
    pub os_family: OsFamily,
    pub os_version: String,
    pub cloud_init: String,
    pub installer_script: String,

    pub security_feature: SecurityFeature,
    pub dev_mode: bool,
    pub tinker_version: Option<String>,
    pub proxies: ProxySettings,
    pub name_servers: Vec<String>,

    /// Filled in by the orchestrator once credentials are issued.
    pub credentials: Option<ClientCredentials>,
    pub local_user: Option<LocalUser>,
}

impl DeviceProfile {
    /// Build a profile from an instance and its eager-loaded host and OS.
    pub fn from_instance(
        instance: &Instance,
        defaults: &ProfileDefaults,
    ) -> Result<Self, ProfileError> {
        let os = instance
            .os
            .as_ref()
            .ok_or_else(|| ProfileError::MissingOs(instance.resource_id.clone()))?;
        let host = &instance.host;

        let (os_family, os_image_url) = match os.os_type {
            OsType::Mutable => (OsFamily::Ubuntu, os.image_url.clone()),
            OsType::Immutable if is_absolute_url(&os.image_url) => {
                (OsFamily::Microvisor, os.image_url.clone())
            }
            OsType::Immutable => (
                OsFamily::Microvisor,
                format!(
                    "{}/{}",
                    LOCAL_IMAGE_PROXY,
                    os.image_url.trim_start_matches('/')
                ),
            ),
            OsType::Unspecified => {
                return Err(ProfileError::UnsupportedOsType {
                    os_resource_id: os.resource_id.clone(),
                    os_type: os.os_type,
                })
            }
        };

        let tinker_version = (!defaults.tinker_version.is_empty())
            .then(|| defaults.tinker_version.clone());

        Ok(Self {
            guid: host.uuid,
            tenant_id: instance.tenant_id.clone(),
            serial_number: host.serial_number.clone(),
            mac: host.pxe_mac.clone(),
            ip: host.bmc_ip.clone(),
            gateway: host.gateway.clone(),
            hostname: host.resource_id.clone(),
            os_resource_id: os.resource_id.clone(),
            os_image_url,
            os_image_sha256: os.sha256.clone(),
            os_family,
            os_version: os.version.clone(),
            cloud_init: os.cloud_init.clone(),
            installer_script: os.installer_script.clone(),
            security_feature: instance.security_feature,
            dev_mode: defaults.dev_mode,
            tinker_version,
            proxies: defaults.proxies.clone(),
            name_servers: defaults.name_servers.clone(),
            credentials: None,
            local_user: instance.local_account.as_ref().map(|account| LocalUser {
                username: account.username.clone(),
                ssh_key: account.ssh_key.clone(),
            }),
        })
    }
}

fn is_absolute_url(url: &str) -> bool {
    url.split_once("://").is_some_and(|(scheme, rest)| {
        !scheme.is_empty()
            && scheme
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
            && !rest.is_empty()
    })
}
