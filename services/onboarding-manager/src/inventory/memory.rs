//! In-memory inventory.
//!
//! Stands in for the inventory service in tests and local runs. Writes made
//! through `put_*` publish watch events; writes made by reconcilers through
//! the [`InventoryClient`] trait do not.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::{mpsc, RwLock};
use tracing::debug;

use super::{
    EventKind, Host, HostState, Instance, InstanceUpdate, InventoryClient, InventoryError,
    InventoryKind, OperatingSystem, ResourceRef, WatchEvent,
};
use crate::status::ResourceStatus;

/// Inventory backed by maps keyed on resource id.
pub struct MemoryInventory {
    hosts: RwLock<HashMap<String, Host>>,
    instances: RwLock<HashMap<String, Instance>>,
    operating_systems: RwLock<HashMap<String, OperatingSystem>>,
    events: mpsc::Sender<WatchEvent>,
    instance_reads: AtomicUsize,
    unavailable: AtomicBool,
}

impl MemoryInventory {
    /// Create an empty inventory and its watch stream.
    pub fn new() -> (Self, mpsc::Receiver<WatchEvent>) {
        let (events, rx) = mpsc::channel(1024);
        let inventory = Self {
            hosts: RwLock::new(HashMap::new()),
            instances: RwLock::new(HashMap::new()),
            operating_systems: RwLock::new(HashMap::new()),
            events,
            instance_reads: AtomicUsize::new(0),
            unavailable: AtomicBool::new(false),
        };
        (inventory, rx)
    }

    async fn publish(&self, kind: EventKind, tenant_id: &str, resource_id: &str) {
        let event = WatchEvent::new(kind, ResourceRef::new(tenant_id, resource_id));
        if self.events.send(event).await.is_err() {
            debug!(resource_id, "No watcher, event dropped");
        }
    }

    pub async fn put_host(&self, host: Host) {
        let kind = self.upsert_kind(self.hosts.read().await.contains_key(&host.resource_id));
        let (tenant, id) = (host.tenant_id.clone(), host.resource_id.clone());
        self.hosts.write().await.insert(id.clone(), host);
        self.publish(kind, &tenant, &id).await;
    }

    pub async fn put_instance(&self, instance: Instance) {
        let kind =
            self.upsert_kind(self.instances.read().await.contains_key(&instance.resource_id));
        let (tenant, id) = (instance.tenant_id.clone(), instance.resource_id.clone());
        self.instances.write().await.insert(id.clone(), instance);
        self.publish(kind, &tenant, &id).await;
    }

    pub async fn put_os(&self, os: OperatingSystem) {
        let kind = self.upsert_kind(
            self.operating_systems
                .read()
                .await
                .contains_key(&os.resource_id),
        );
        let (tenant, id) = (os.tenant_id.clone(), os.resource_id.clone());
        self.operating_systems.write().await.insert(id.clone(), os);
        self.publish(kind, &tenant, &id).await;
    }

    fn upsert_kind(&self, exists: bool) -> EventKind {
        if exists {
            EventKind::Updated
        } else {
            EventKind::Created
        }
    }

    /// Current record of a host.
    pub async fn host(&self, resource_id: &str) -> Option<Host> {
        self.hosts.read().await.get(resource_id).cloned()
    }

    /// Current record of an instance, with its host and OS resolved.
    pub async fn instance(&self, resource_id: &str) -> Option<Instance> {
        let instance = self.instances.read().await.get(resource_id).cloned()?;
        Some(self.resolve(instance).await)
    }

    pub async fn os(&self, resource_id: &str) -> Option<OperatingSystem> {
        self.operating_systems
            .read()
            .await
            .get(resource_id)
            .cloned()
    }

    /// Number of `get_instance` calls served.
    pub fn instance_reads(&self) -> usize {
        self.instance_reads.load(Ordering::SeqCst)
    }

    /// Make every client call fail as if the service were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), InventoryError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(InventoryError::Unavailable("inventory unavailable".to_string()));
        }
        Ok(())
    }

    /// Refresh the eager-loaded host and OS from their own records.
    async fn resolve(&self, mut instance: Instance) -> Instance {
        if let Some(host) = self.hosts.read().await.get(&instance.host.resource_id) {
            instance.host = host.clone();
        }
        if let Some(os) = instance.os.as_ref() {
            if let Some(current) = self.operating_systems.read().await.get(&os.resource_id) {
                instance.os = Some(current.clone());
            }
        }
        instance
    }
}

fn not_found(resource_id: &str) -> InventoryError {
    InventoryError::NotFound(resource_id.to_string())
}

fn check_tenant(tenant_id: &str, owner: &str, resource_id: &str) -> Result<(), InventoryError> {
    if tenant_id != owner {
        return Err(not_found(resource_id));
    }
    Ok(())
}

#[async_trait]
impl InventoryClient for MemoryInventory {
    async fn list_all(&self, kinds: &[InventoryKind]) -> Result<Vec<ResourceRef>, InventoryError> {
        self.check_available()?;
        let mut refs = Vec::new();
        for kind in kinds {
            match kind {
                InventoryKind::Host => refs.extend(
                    self.hosts
                        .read()
                        .await
                        .values()
                        .map(|h| ResourceRef::new(&h.tenant_id, &h.resource_id)),
                ),
                InventoryKind::Instance => refs.extend(
                    self.instances
                        .read()
                        .await
                        .values()
                        .map(|i| ResourceRef::new(&i.tenant_id, &i.resource_id)),
                ),
                InventoryKind::Os => refs.extend(
                    self.operating_systems
                        .read()
                        .await
                        .values()
                        .map(|o| ResourceRef::new(&o.tenant_id, &o.resource_id)),
                ),
            }
        }
        Ok(refs)
    }

    async fn get_host(&self, tenant_id: &str, resource_id: &str) -> Result<Host, InventoryError> {
        self.check_available()?;
        let host = self.host(resource_id).await.ok_or_else(|| not_found(resource_id))?;
        check_tenant(tenant_id, &host.tenant_id, resource_id)?;
        Ok(host)
    }

    async fn get_instance(
        &self,
        tenant_id: &str,
        resource_id: &str,
    ) -> Result<Instance, InventoryError> {
        self.check_available()?;
        self.instance_reads.fetch_add(1, Ordering::SeqCst);
        let instance = self
            .instance(resource_id)
            .await
            .ok_or_else(|| not_found(resource_id))?;
        check_tenant(tenant_id, &instance.tenant_id, resource_id)?;
        Ok(instance)
    }

    async fn get_os(
        &self,
        tenant_id: &str,
        resource_id: &str,
    ) -> Result<OperatingSystem, InventoryError> {
        self.check_available()?;
        let os = self.os(resource_id).await.ok_or_else(|| not_found(resource_id))?;
        check_tenant(tenant_id, &os.tenant_id, resource_id)?;
        Ok(os)
    }

    async fn update_instance(
        &self,
        tenant_id: &str,
        resource_id: &str,
        update: InstanceUpdate,
    ) -> Result<(), InventoryError> {
        self.check_available()?;
        let mut instances = self.instances.write().await;
        let instance = instances
            .get_mut(resource_id)
            .ok_or_else(|| not_found(resource_id))?;
        check_tenant(tenant_id, &instance.tenant_id, resource_id)?;

        instance.current_state = update.current_state;
        instance.instance_status = update.instance_status;
        instance.provisioning_status = update.provisioning_status;
        instance.current_os = update.current_os;
        Ok(())
    }

    async fn set_host_state(
        &self,
        tenant_id: &str,
        resource_id: &str,
        state: HostState,
        status: ResourceStatus,
    ) -> Result<(), InventoryError> {
        self.check_available()?;
        let mut hosts = self.hosts.write().await;
        let host = hosts.get_mut(resource_id).ok_or_else(|| not_found(resource_id))?;
        check_tenant(tenant_id, &host.tenant_id, resource_id)?;

        host.current_state = state;
        host.host_status = status;
        Ok(())
    }

    async fn set_host_status(
        &self,
        tenant_id: &str,
        resource_id: &str,
        status: ResourceStatus,
    ) -> Result<(), InventoryError> {
        self.check_available()?;
        let mut hosts = self.hosts.write().await;
        let host = hosts.get_mut(resource_id).ok_or_else(|| not_found(resource_id))?;
        check_tenant(tenant_id, &host.tenant_id, resource_id)?;

        host.host_status = status;
        Ok(())
    }

    async fn delete_host(&self, tenant_id: &str, resource_id: &str) -> Result<(), InventoryError> {
        self.check_available()?;
        {
            let mut hosts = self.hosts.write().await;
            let host = hosts.get(resource_id).ok_or_else(|| not_found(resource_id))?;
            check_tenant(tenant_id, &host.tenant_id, resource_id)?;
            hosts.remove(resource_id);
        }
        self.publish(EventKind::Deleted, tenant_id, resource_id).await;
        Ok(())
    }

    async fn set_os_repo_url(
        &self,
        tenant_id: &str,
        resource_id: &str,
        repo_url: &str,
    ) -> Result<(), InventoryError> {
        self.check_available()?;
        let mut operating_systems = self.operating_systems.write().await;
        let os = operating_systems
            .get_mut(resource_id)
            .ok_or_else(|| not_found(resource_id))?;
        check_tenant(tenant_id, &os.tenant_id, resource_id)?;

        os.repo_url = repo_url.to_string();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host() -> Host {
        Host {
            resource_id: "host-1".to_string(),
            tenant_id: "t1".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_put_publishes_events() {
        let (inventory, mut events) = MemoryInventory::new();

        inventory.put_host(host()).await;
        inventory.put_host(host()).await;

        assert_eq!(events.recv().await.unwrap().kind, EventKind::Created);
        assert_eq!(events.recv().await.unwrap().kind, EventKind::Updated);
    }

    #[tokio::test]
    async fn test_tenant_isolation() {
        let (inventory, _events) = MemoryInventory::new();
        inventory.put_host(host()).await;

        assert!(inventory.get_host("t1", "host-1").await.is_ok());
        assert!(inventory
            .get_host("t2", "host-1")
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn test_instance_resolves_host() {
        let (inventory, _events) = MemoryInventory::new();
        inventory.put_host(host()).await;
        inventory
            .put_instance(Instance {
                resource_id: "inst-1".to_string(),
                tenant_id: "t1".to_string(),
                host: Host {
                    resource_id: "host-1".to_string(),
                    ..Default::default()
                },
                ..Default::default()
            })
            .await;

        inventory
            .set_host_state("t1", "host-1", HostState::Onboarded, ResourceStatus::default())
            .await
            .unwrap();

        let instance = inventory.get_instance("t1", "inst-1").await.unwrap();
        assert_eq!(instance.host.current_state, HostState::Onboarded);
        assert_eq!(instance.host.tenant_id, "t1");
        assert_eq!(inventory.instance_reads(), 1);
    }
}
