//! In-memory resource store.
//!
//! Used by tests and local runs in place of an API server. Besides the
//! store verbs it exposes `put` and `set_workflow_status` so callers can
//! play the role of the execution backend.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::{Resource, ResourceKind, ResourceStore, StoreError, WorkflowStatus};

type Key = (ResourceKind, String, String);

/// Resource store backed by a map.
#[derive(Default)]
pub struct MemoryStore {
    resources: RwLock<HashMap<Key, Resource>>,

    /// Create calls per kind, including rejected ones.
    hardware_creates: AtomicUsize,
    template_creates: AtomicUsize,
    workflow_creates: AtomicUsize,

    /// When set, every call fails with a backend error.
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(kind: ResourceKind, namespace: &str, name: &str) -> Key {
        (kind, namespace.to_string(), name.to_string())
    }

    fn counter(&self, kind: ResourceKind) -> &AtomicUsize {
        match kind {
            ResourceKind::Hardware => &self.hardware_creates,
            ResourceKind::Template => &self.template_creates,
            ResourceKind::Workflow => &self.workflow_creates,
        }
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("store unavailable".to_string()));
        }
        Ok(())
    }

    /// Number of create calls issued for `kind`.
    pub fn create_count(&self, kind: ResourceKind) -> usize {
        self.counter(kind).load(Ordering::SeqCst)
    }

    /// Make every subsequent call fail, or recover.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Insert or replace a resource without counting it as a create.
    pub async fn put(&self, resource: Resource) {
        let meta = resource.metadata();
        let key = Self::key(resource.kind(), &meta.namespace, &meta.name);
        self.resources.write().await.insert(key, resource);
    }

    /// Replace a workflow's status tree.
    pub async fn set_workflow_status(
        &self,
        namespace: &str,
        name: &str,
        status: WorkflowStatus,
    ) -> Result<(), StoreError> {
        let mut resources = self.resources.write().await;
        match resources.get_mut(&Self::key(ResourceKind::Workflow, namespace, name)) {
            Some(Resource::Workflow(wf)) => {
                wf.status = Some(status);
                Ok(())
            }
            _ => Err(StoreError::NotFound {
                kind: ResourceKind::Workflow,
                namespace: namespace.to_string(),
                name: name.to_string(),
            }),
        }
    }

    /// Whether a resource exists.
    pub async fn contains(&self, kind: ResourceKind, namespace: &str, name: &str) -> bool {
        self.resources
            .read()
            .await
            .contains_key(&Self::key(kind, namespace, name))
    }
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn get(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<Resource, StoreError> {
        self.check_available()?;

        self.resources
            .read()
            .await
            .get(&Self::key(kind, namespace, name))
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                kind,
                namespace: namespace.to_string(),
                name: name.to_string(),
            })
    }

    async fn create(&self, resource: Resource) -> Result<(), StoreError> {
        self.check_available()?;

        let kind = resource.kind();
        self.counter(kind).fetch_add(1, Ordering::SeqCst);

        let meta = resource.metadata().clone();
        let mut resources = self.resources.write().await;
        let key = Self::key(kind, &meta.namespace, &meta.name);
        if resources.contains_key(&key) {
            return Err(StoreError::AlreadyExists {
                kind,
                namespace: meta.namespace,
                name: meta.name,
            });
        }

        debug!(kind = %kind, namespace = %meta.namespace, name = %meta.name, "Resource created");
        resources.insert(key, resource);
        Ok(())
    }

    async fn delete(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<(), StoreError> {
        self.check_available()?;

        match self
            .resources
            .write()
            .await
            .remove(&Self::key(kind, namespace, name))
        {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound {
                kind,
                namespace: namespace.to_string(),
                name: name.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ObjectMeta, Workflow, WorkflowState};

    fn workflow() -> Workflow {
        Workflow::new(ObjectMeta::new("workflow-abc-prod", "ns"), "machine-abc", "tpl")
    }

    #[tokio::test]
    async fn test_create_get_delete() {
        let store = MemoryStore::new();

        store.create(workflow().into()).await.unwrap();
        assert!(store.contains(ResourceKind::Workflow, "ns", "workflow-abc-prod").await);

        let err = store.create(workflow().into()).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists { .. }));
        assert_eq!(store.create_count(ResourceKind::Workflow), 2);

        store
            .delete(ResourceKind::Workflow, "ns", "workflow-abc-prod")
            .await
            .unwrap();
        let err = store
            .delete(ResourceKind::Workflow, "ns", "workflow-abc-prod")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_set_workflow_status() {
        let store = MemoryStore::new();
        store.create(workflow().into()).await.unwrap();

        store
            .set_workflow_status(
                "ns",
                "workflow-abc-prod",
                WorkflowStatus {
                    state: WorkflowState::Running,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let wf = store.get_workflow("ns", "workflow-abc-prod").await.unwrap();
        assert_eq!(wf.state(), WorkflowState::Running);
    }

    #[tokio::test]
    async fn test_unavailable() {
        let store = MemoryStore::new();
        store.set_unavailable(true);

        let err = store.create(workflow().into()).await.unwrap_err();
        assert!(matches!(err, StoreError::Backend(_)));
        assert_eq!(store.create_count(ResourceKind::Workflow), 0);

        store.set_unavailable(false);
        assert!(store.create(workflow().into()).await.is_ok());
    }
}
