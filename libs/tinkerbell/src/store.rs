//! Resource store interface.
//!
//! The store exposes exactly three verbs, all keyed by kind, namespace and
//! name. Implementations include a Kubernetes-style API server client and
//! the in-memory [`crate::MemoryStore`].

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::{Hardware, ObjectMeta, StoreError, Template, Workflow};

/// Default timeout for a single store call.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(3);

/// Kinds of declarative resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    Hardware,
    Template,
    Workflow,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hardware => f.write_str("Hardware"),
            Self::Template => f.write_str("Template"),
            Self::Workflow => f.write_str("Workflow"),
        }
    }
}

/// Any declarative resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resource {
    Hardware(Hardware),
    Template(Template),
    Workflow(Workflow),
}

impl Resource {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::Hardware(_) => ResourceKind::Hardware,
            Self::Template(_) => ResourceKind::Template,
            Self::Workflow(_) => ResourceKind::Workflow,
        }
    }

    pub fn metadata(&self) -> &ObjectMeta {
        match self {
            Self::Hardware(r) => &r.metadata,
            Self::Template(r) => &r.metadata,
            Self::Workflow(r) => &r.metadata,
        }
    }
}

impl From<Hardware> for Resource {
    fn from(r: Hardware) -> Self {
        Self::Hardware(r)
    }
}

impl From<Template> for Resource {
    fn from(r: Template) -> Self {
        Self::Template(r)
    }
}

impl From<Workflow> for Resource {
    fn from(r: Workflow) -> Self {
        Self::Workflow(r)
    }
}

macro_rules! impl_try_from_resource {
    ($ty:ident) => {
        impl TryFrom<Resource> for $ty {
            type Error = StoreError;

            fn try_from(resource: Resource) -> Result<Self, Self::Error> {
                match resource {
                    Resource::$ty(r) => Ok(r),
                    other => Err(StoreError::KindMismatch {
                        expected: ResourceKind::$ty,
                        found: other.kind(),
                    }),
                }
            }
        }
    };
}

impl_try_from_resource!(Hardware);
impl_try_from_resource!(Template);
impl_try_from_resource!(Workflow);

/// Get/Create/Delete by name for declarative resources.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Fetch a resource. Missing resources are [`StoreError::NotFound`].
    async fn get(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<Resource, StoreError>;

    /// Create a resource. Existing names are [`StoreError::AlreadyExists`].
    async fn create(&self, resource: Resource) -> Result<(), StoreError>;

    /// Delete a resource. Missing resources are [`StoreError::NotFound`].
    async fn delete(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<(), StoreError>;

    async fn get_hardware(&self, namespace: &str, name: &str) -> Result<Hardware, StoreError> {
        self.get(ResourceKind::Hardware, namespace, name)
            .await?
            .try_into()
    }

    async fn get_template(&self, namespace: &str, name: &str) -> Result<Template, StoreError> {
        self.get(ResourceKind::Template, namespace, name)
            .await?
            .try_into()
    }

    async fn get_workflow(&self, namespace: &str, name: &str) -> Result<Workflow, StoreError> {
        self.get(ResourceKind::Workflow, namespace, name)
            .await?
            .try_into()
    }
}

#[async_trait]
impl<S: ResourceStore + ?Sized> ResourceStore for Arc<S> {
    async fn get(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<Resource, StoreError> {
        (**self).get(kind, namespace, name).await
    }

    async fn create(&self, resource: Resource) -> Result<(), StoreError> {
        (**self).create(resource).await
    }

    async fn delete(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<(), StoreError> {
        (**self).delete(kind, namespace, name).await
    }
}

/// Applies a per-call timeout to every store operation.
pub struct TimeoutStore<S> {
    inner: S,
    timeout: Duration,
}

impl<S: ResourceStore> TimeoutStore<S> {
    pub fn new(inner: S, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    async fn bounded<T, F>(&self, operation: &'static str, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>> + Send,
    {
        let started = Instant::now();
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| StoreError::Timeout {
                operation,
                elapsed: started.elapsed(),
            })?
    }
}

#[async_trait]
impl<S: ResourceStore> ResourceStore for TimeoutStore<S> {
    async fn get(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<Resource, StoreError> {
        self.bounded("get", self.inner.get(kind, namespace, name))
            .await
    }

    async fn create(&self, resource: Resource) -> Result<(), StoreError> {
        self.bounded("create", self.inner.create(resource)).await
    }

    async fn delete(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<(), StoreError> {
        self.bounded("delete", self.inner.delete(kind, namespace, name))
            .await
    }
}
