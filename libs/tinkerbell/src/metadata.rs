//! Common metadata types

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::API_VERSION;

/// Kubernetes-style type metadata
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TypeMeta {
    pub api_version: String,
    pub kind: String,
}

impl TypeMeta {
    fn of(kind: &str) -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: kind.to_string(),
        }
    }

    pub fn hardware() -> Self {
        Self::of("Hardware")
    }

    pub fn template() -> Self {
        Self::of("Template")
    }

    pub fn workflow() -> Self {
        Self::of("Workflow")
    }
}

/// Kubernetes-style object metadata
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    /// Resource name (required)
    pub name: String,

    pub namespace: String,

    /// Labels for organizing resources
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

impl ObjectMeta {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            labels: BTreeMap::new(),
        }
    }

    /// Add a label
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}
