//! Workflow resource types
//!
//! The status tree is written by the execution backend; this crate only
//! reads it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{ObjectMeta, TypeMeta};

/// Hardware map key the pipeline's worker token refers to.
pub const DEVICE_KEY: &str = "device_1";

/// Workflow resource representing a provisioning job
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    #[serde(flatten)]
    pub type_meta: TypeMeta,

    pub metadata: ObjectMeta,

    pub spec: WorkflowSpec,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<WorkflowStatus>,
}

impl Workflow {
    pub fn new(
        metadata: ObjectMeta,
        hardware_ref: impl Into<String>,
        template_ref: impl Into<String>,
    ) -> Self {
        Self {
            type_meta: TypeMeta::workflow(),
            metadata,
            spec: WorkflowSpec {
                hardware_ref: hardware_ref.into(),
                template_ref: template_ref.into(),
                hardware_map: BTreeMap::new(),
            },
            status: None,
        }
    }

    /// Add a hardware mapping
    pub fn with_hardware_map(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.spec.hardware_map.insert(key.into(), value.into());
        self
    }

    /// Overall state; `Unset` until the backend picks the workflow up.
    pub fn state(&self) -> WorkflowState {
        self.status
            .as_ref()
            .map(|s| s.state)
            .unwrap_or_default()
    }
}

/// Workflow specification
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowSpec {
    pub template_ref: String,

    pub hardware_ref: String,

    /// Template variables, e.g. `{"device_1": "00:11:22:33:44:55"}`
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub hardware_map: BTreeMap<String, String>,
}

/// Workflow status
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStatus {
    #[serde(default)]
    pub state: WorkflowState,

    #[serde(default)]
    pub global_timeout: u64,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tasks: Vec<TaskStatus>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatus {
    pub name: String,

    #[serde(default)]
    pub worker_addr: String,

    #[serde(default)]
    pub actions: Vec<ActionStatus>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ActionStatus {
    pub name: String,

    #[serde(default)]
    pub image: String,

    #[serde(default)]
    pub timeout: u64,

    #[serde(default)]
    pub status: WorkflowState,

    /// Failure message, if any.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,

    /// Elapsed seconds.
    #[serde(default)]
    pub seconds: u64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl ActionStatus {
    pub fn new(name: impl Into<String>, status: WorkflowState) -> Self {
        Self {
            name: name.into(),
            status,
            ..Default::default()
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }
}

/// Workflow and action state
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum WorkflowState {
    /// Not yet picked up by the backend.
    #[default]
    #[serde(rename = "")]
    Unset,
    #[serde(rename = "STATE_PENDING")]
    Pending,
    #[serde(rename = "STATE_RUNNING")]
    Running,
    #[serde(rename = "STATE_SUCCESS")]
    Success,
    #[serde(rename = "STATE_FAILED")]
    Failed,
    #[serde(rename = "STATE_TIMEOUT")]
    Timeout,
    /// Any value this crate does not recognise.
    #[serde(rename = "STATE_UNKNOWN", other)]
    Unknown,
}

impl std::fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Unset => "STATE_UNSET",
            Self::Pending => "STATE_PENDING",
            Self::Running => "STATE_RUNNING",
            Self::Success => "STATE_SUCCESS",
            Self::Failed => "STATE_FAILED",
            Self::Timeout => "STATE_TIMEOUT",
            Self::Unknown => "STATE_UNKNOWN",
        };
        f.write_str(s)
    }
}
