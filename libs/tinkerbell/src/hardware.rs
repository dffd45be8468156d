//! Hardware resource types
//!
//! Field names follow the execution backend's Hardware schema: the
//! top-level spec is camelCase, the nested metadata and DHCP blocks are
//! snake_case.

use serde::{Deserialize, Serialize};

use crate::{ObjectMeta, TypeMeta};

/// DHCP lease time handed to provisioned machines, in seconds.
pub const DEFAULT_LEASE_TIME: u64 = 86400;

/// Netmask assigned to the provisioning interface.
pub const DEFAULT_NETMASK: &str = "255.255.255.0";

/// Facility code stamped on every onboarding Hardware.
pub const ONBOARDING_FACILITY: &str = "onboarding";

/// Hardware resource describing a physical machine
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Hardware {
    #[serde(flatten)]
    pub type_meta: TypeMeta,

    pub metadata: ObjectMeta,

    pub spec: HardwareSpec,
}

impl Hardware {
    pub fn new(metadata: ObjectMeta, spec: HardwareSpec) -> Self {
        Self {
            type_meta: TypeMeta::hardware(),
            metadata,
            spec,
        }
    }

    /// OS identifier recorded on the machine.
    ///
    /// Set to the desired OS at creation; the backend overwrites it with the
    /// OS it actually applied.
    pub fn os_slug(&self) -> Option<&str> {
        self.spec
            .metadata
            .as_ref()
            .map(|m| m.instance.operating_system.os_slug.as_str())
            .filter(|slug| !slug.is_empty())
    }

    /// Replace the recorded OS identifier.
    pub fn set_os_slug(&mut self, os_slug: impl Into<String>) {
        if let Some(metadata) = self.spec.metadata.as_mut() {
            metadata.instance.operating_system.os_slug = os_slug.into();
        }
    }

    /// MAC address of the first interface.
    pub fn primary_mac(&self) -> Option<&str> {
        self.spec
            .interfaces
            .first()
            .and_then(|i| i.dhcp.as_ref())
            .map(|d| d.mac.as_str())
    }
}

/// Hardware specification
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HardwareSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub disks: Vec<Disk>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HardwareMetadata>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interfaces: Vec<Interface>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Disk {
    pub device: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct HardwareMetadata {
    pub facility: Facility,
    pub instance: MachineInstance,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Facility {
    pub facility_code: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MachineInstance {
    pub id: String,
    pub hostname: String,
    pub operating_system: OperatingSystem,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct OperatingSystem {
    pub distro: String,
    pub os_slug: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
}

/// Network interface configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Interface {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub netboot: Option<Netboot>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub dhcp: Option<Dhcp>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Netboot {
    #[serde(rename = "allowPXE")]
    pub allow_pxe: bool,

    #[serde(rename = "allowWorkflow")]
    pub allow_workflow: bool,
}

/// DHCP configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Dhcp {
    pub arch: String,
    pub hostname: String,
    pub ip: Ip,
    pub lease_time: u64,
    pub mac: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub name_servers: Vec<String>,
    pub uefi: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Ip {
    pub address: String,
    pub gateway: String,
    pub netmask: String,
}

/// Inputs for a machine's Hardware record.
#[derive(Debug, Clone, Default)]
pub struct MachineSpec {
    pub disk: String,
    pub mac: String,
    pub ip: String,
    pub gateway: String,
    pub hostname: String,
    pub name_servers: Vec<String>,
    pub os_distro: String,
    pub os_slug: String,
    pub os_version: String,
}

impl HardwareSpec {
    /// Spec for a PXE-booted UEFI machine with one provisioning interface.
    pub fn for_machine(machine: MachineSpec) -> Self {
        Self {
            disks: vec![Disk {
                device: machine.disk,
            }],
            metadata: Some(HardwareMetadata {
                facility: Facility {
                    facility_code: ONBOARDING_FACILITY.to_string(),
                },
                instance: MachineInstance {
                    id: machine.mac.clone(),
                    hostname: machine.hostname.clone(),
                    operating_system: OperatingSystem {
                        distro: machine.os_distro,
                        os_slug: machine.os_slug,
                        version: machine.os_version,
                    },
                },
            }),
            interfaces: vec![Interface {
                netboot: Some(Netboot {
                    allow_pxe: true,
                    allow_workflow: true,
                }),
                dhcp: Some(Dhcp {
                    arch: "x86_64".to_string(),
                    hostname: machine.hostname,
                    ip: Ip {
                        address: machine.ip,
                        gateway: machine.gateway,
                        netmask: DEFAULT_NETMASK.to_string(),
                    },
                    lease_time: DEFAULT_LEASE_TIME,
                    mac: machine.mac,
                    name_servers: machine.name_servers,
                    uefi: true,
                }),
            }],
        }
    }
}
