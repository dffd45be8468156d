//! Template assembly.
//!
//! Turns a [`DeviceProfile`] into the ordered [`PipelineDocument`] the
//! execution backend runs. One of two fixed backbones is selected by OS
//! type, then whole actions are removed according to the profile's security
//! features and dev-mode flag. Actions are never reordered.
//!
//! ## Backbones
//!
//! - `ubuntu`: mutable OS streamed to disk, configured through file writes
//!   and systemd units that run on first boot
//! - `microvisor`: immutable OS image with cloud-init and an SELinux relabel

pub mod actions;
mod microvisor;
mod ubuntu;

use onboard_tinkerbell::{Action, PipelineDocument, Task};
use tracing::debug;

use crate::inventory::SecurityFeature;
use crate::profile::{DeviceProfile, OsFamily};
use actions::{ActionBuilder, Tool};

/// Action image version used when neither the profile nor config set one.
pub const DEFAULT_IMAGE_VERSION: &str = "v1.0.0";

/// Default registry prefix for action images.
pub const DEFAULT_ACTION_REGISTRY: &str = "localhost:7443/one-intel-edge/edge-node/tinker-actions";

const TASK_NAME: &str = "os-installation";
const WORKER: &str = "{{.device_1}}";
const TASK_VOLUMES: [&str; 3] = [
    "/dev:/dev",
    "/dev/console:/dev/console",
    "/lib/firmware:/lib/firmware:ro",
];

/// Resolves action image references.
#[derive(Debug, Clone)]
pub struct ActionImages {
    registry: String,
    default_version: String,
}

impl ActionImages {
    pub fn new(registry: impl Into<String>, default_version: impl Into<String>) -> Self {
        Self {
            registry: registry.into(),
            default_version: default_version.into(),
        }
    }

    /// `{registry}/{tool}:{version}`. The version is taken from the profile,
    /// then the configured default, then [`DEFAULT_IMAGE_VERSION`].
    pub fn image(&self, tool: Tool, version: Option<&str>) -> String {
        let version = version
            .filter(|v| !v.is_empty())
            .or_else(|| Some(self.default_version.as_str()).filter(|v| !v.is_empty()))
            .unwrap_or(DEFAULT_IMAGE_VERSION);
        format!(
            "{}/{}:{}",
            self.registry.trim_end_matches('/'),
            tool.image_name(),
            version
        )
    }
}

impl Default for ActionImages {
    fn default() -> Self {
        Self::new(DEFAULT_ACTION_REGISTRY, DEFAULT_IMAGE_VERSION)
    }
}

/// Renders provisioning pipelines.
#[derive(Debug, Clone, Default)]
pub struct TemplateAssembler {
    images: ActionImages,
}

impl TemplateAssembler {
    pub fn new(images: ActionImages) -> Self {
        Self { images }
    }

    /// `{os-family}-{uuid}-prod`.
    pub fn template_name(profile: &DeviceProfile) -> String {
        format!(
            "{}-{}-prod",
            profile.os_family.name().replace('_', "-"),
            profile.guid
        )
    }

    pub fn assemble(&self, profile: &DeviceProfile) -> PipelineDocument {
        let builder = ActionBuilder::new(&self.images, profile);
        let mut steps = match profile.os_family {
            OsFamily::Microvisor => microvisor::backbone(&builder),
            OsFamily::Ubuntu => ubuntu::backbone(&builder),
        };

        apply_security_feature(&mut steps, profile.security_feature, profile.os_family);
        if !profile.dev_mode {
            remove_action(&mut steps, actions::CREATE_USER);
        }

        debug!(
            host_uuid = %profile.guid,
            actions = steps.len(),
            "Pipeline assembled"
        );

        PipelineDocument::new(Self::template_name(profile), actions::TIMEOUT_MAX).with_task(Task {
            name: TASK_NAME.to_string(),
            worker: WORKER.to_string(),
            actions: steps,
            volumes: TASK_VOLUMES.iter().map(|v| v.to_string()).collect(),
            environment: Default::default(),
        })
    }
}

/// Drop whole actions according to the requested security features.
///
/// Values other than `None` and `SecureBootAndFde` leave the pipeline as is.
fn apply_security_feature(steps: &mut Vec<Action>, feature: SecurityFeature, family: OsFamily) {
    match feature {
        SecurityFeature::SecureBootAndFde => {
            if family == OsFamily::Microvisor {
                remove_action(steps, actions::PARTITION_DISK);
                remove_action(steps, actions::SELINUX_RELABEL);
            }
        }
        SecurityFeature::None => {
            remove_action(steps, actions::FDE_ENCRYPTION);
            // Without encryption the root partition can be grown on first boot.
            if let Some(action) = steps
                .iter_mut()
                .find(|a| a.name == actions::GROW_PARTITION_SERVICE_ENABLE)
            {
                action
                    .environment
                    .insert("CMD_LINE".to_string(), ubuntu::GROW_PART_ENABLED.to_string());
            }
        }
        SecurityFeature::Unspecified => {}
    }
}

/// Remove the first action named `name`, preserving the order of the rest.
fn remove_action(steps: &mut Vec<Action>, name: &str) -> bool {
    match steps.iter().position(|a| a.name == name) {
        Some(index) => {
            steps.remove(index);
            true
        }
        None => false,
    }
}
