//! Pipeline document rendered into a Template.
//!
//! The document is the structured content the execution backend runs:
//! `{version, name, global_timeout, tasks: [{name, worker, actions, volumes}]}`.
//! Field names and nesting are part of the backend contract.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::PipelineError;

/// Document schema version understood by the backend.
pub const PIPELINE_VERSION: &str = "0.1";

/// An ordered provisioning pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PipelineDocument {
    pub version: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub global_timeout: u64,
    pub tasks: Vec<Task>,
}

/// A group of actions run by one worker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Task {
    pub name: String,
    pub worker: String,
    pub actions: Vec<Action>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,
}

/// One named, imaged, timed step.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Action {
    pub name: String,
    pub image: String,
    pub timeout: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    #[serde(rename = "on-timeout", default, skip_serializing_if = "Vec::is_empty")]
    pub on_timeout: Vec<String>,
    #[serde(rename = "on-failure", default, skip_serializing_if = "Vec::is_empty")]
    pub on_failure: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub pid: String,
}

impl Action {
    pub fn new(name: impl Into<String>, image: impl Into<String>, timeout: u64) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            timeout,
            ..Default::default()
        }
    }

    /// Add an environment variable
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    /// Add a volume mount
    pub fn volume(mut self, mount: impl Into<String>) -> Self {
        self.volumes.push(mount.into());
        self
    }
}

impl PipelineDocument {
    pub fn new(name: impl Into<String>, global_timeout: u64) -> Self {
        Self {
            version: PIPELINE_VERSION.to_string(),
            name: name.into(),
            id: None,
            global_timeout,
            tasks: Vec::new(),
        }
    }

    /// Add a task
    pub fn with_task(mut self, task: Task) -> Self {
        self.tasks.push(task);
        self
    }

    /// Action names in execution order.
    pub fn action_names(&self) -> Vec<&str> {
        self.tasks
            .iter()
            .flat_map(|t| t.actions.iter().map(|a| a.name.as_str()))
            .collect()
    }

    /// Look up an action by name.
    pub fn action(&self, name: &str) -> Option<&Action> {
        self.tasks
            .iter()
            .flat_map(|t| t.actions.iter())
            .find(|a| a.name == name)
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.name.is_empty() {
            return Err(PipelineError::MissingField("name".to_string()));
        }
        if self.tasks.is_empty() {
            return Err(PipelineError::MissingField("tasks".to_string()));
        }

        let mut seen = HashSet::new();
        for task in &self.tasks {
            if task.actions.is_empty() {
                return Err(PipelineError::MissingField(format!(
                    "tasks[{}].actions",
                    task.name
                )));
            }
            for action in &task.actions {
                if action.name.is_empty() {
                    return Err(PipelineError::MissingField("action.name".to_string()));
                }
                if !seen.insert(action.name.as_str()) {
                    return Err(PipelineError::DuplicateAction(action.name.clone()));
                }
            }
        }

        Ok(())
    }

    pub fn to_yaml(&self) -> Result<String, PipelineError> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn from_yaml(data: &str) -> Result<Self, PipelineError> {
        Ok(serde_yaml::from_str(data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn document() -> PipelineDocument {
        PipelineDocument::new("ubuntu-abc-prod", 9800).with_task(Task {
            name: "os-installation".to_string(),
            worker: "{{.device_1}}".to_string(),
            actions: vec![
                Action::new("stream-image", "registry/image2disk:v1.0.0", 9800)
                    .env("IMG_URL", "http://example.com/os.img"),
                Action::new("reboot", "registry/reboot:latest", 90).volume("/worker:/worker"),
            ],
            volumes: vec!["/dev:/dev".to_string()],
            environment: BTreeMap::new(),
        })
    }

    #[test]
    fn test_yaml_field_names() {
        let yaml = document().to_yaml().unwrap();

        assert!(yaml.contains("version: '0.1'") || yaml.contains("version: \"0.1\""));
        assert!(yaml.contains("global_timeout: 9800"));
        assert!(yaml.contains("worker: '{{.device_1}}'") || yaml.contains("worker: \"{{.device_1}}\""));
        assert!(yaml.contains("IMG_URL:"));
        assert!(!yaml.contains("on-timeout"));
        assert!(!yaml.contains("pid"));
        assert!(!yaml.contains("id:"));
    }

    #[test]
    fn test_yaml_decodes_to_same_document() {
        let doc = document();
        let decoded = PipelineDocument::from_yaml(&doc.to_yaml().unwrap()).unwrap();
        assert_eq!(decoded, doc);
    }

    #[test]
    fn test_validate() {
        assert!(document().validate().is_ok());

        let mut doc = document();
        doc.tasks[0].actions[1].name = "stream-image".to_string();
        assert!(matches!(
            doc.validate(),
            Err(PipelineError::DuplicateAction(name)) if name == "stream-image"
        ));

        let doc = PipelineDocument::new("empty", 10);
        assert!(matches!(doc.validate(), Err(PipelineError::MissingField(_))));
    }

    #[test]
    fn test_action_lookup() {
        let doc = document();
        assert_eq!(doc.action_names(), vec!["stream-image", "reboot"]);
        assert_eq!(doc.action("reboot").unwrap().volumes, vec!["/worker:/worker"]);
        assert!(doc.action("missing").is_none());
    }
}
