//! Host reconciler.
//!
//! Handles host removal and de-authorisation. Onboarding itself is driven by
//! the instance bound to the host.

use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use onboard_reconcile::{
    handle_inventory_error, provisioning_directive, BackoffPolicy, Directive, Reconciler,
    ReconcilerId, Request,
};
use tracing::{debug, info, instrument};

use crate::credentials::CredentialProvider;
use crate::inventory::{self, EventKind, Host, HostState, InventoryClient, WatchEvent};
use crate::status;

/// Every event except deletions; a deleted host has nothing left to converge.
pub fn filter_event(event: &WatchEvent) -> bool {
    event.kind != EventKind::Deleted
}

pub struct HostReconciler {
    inventory: Arc<dyn InventoryClient>,
    credentials: Arc<dyn CredentialProvider>,
    backoff: BackoffPolicy,
}

impl HostReconciler {
    pub fn new(inventory: Arc<dyn InventoryClient>, credentials: Arc<dyn CredentialProvider>) -> Self {
        Self {
            inventory,
            credentials,
            backoff: BackoffPolicy::default(),
        }
    }

    async fn delete(&self, request: &Request<ReconcilerId>, host: Host) -> Directive {
        if let Some(instance_id) = &host.instance_id {
            debug!(instance = %instance_id, "Host still has an instance, waiting");
            self.set_deleting(&host, &format!("waiting on {instance_id} deletion"))
                .await;
            return request.retry_with_backoff(
                anyhow!("host {} still has instance {}", host.resource_id, instance_id),
                &self.backoff,
            );
        }

        if host.host_status != status::DELETING {
            self.set_deleting(&host, "").await;
        }

        if host.current_state != HostState::Untrusted {
            if let Err(e) = self
                .credentials
                .revoke_credentials(&host.tenant_id, host.uuid)
                .await
            {
                return provisioning_directive(request, e);
            }
        }

        let result =
            inventory::bounded(self.inventory.delete_host(&host.tenant_id, &host.resource_id)).await;
        if let Err(d) = handle_inventory_error(request, result) {
            return d;
        }

        info!("Host deleted");
        request.ack()
    }

    /// Best effort; the deletion itself does not depend on the status.
    async fn set_deleting(&self, host: &Host, details: &str) {
        let result = inventory::bounded(self.inventory.set_host_status(
            &host.tenant_id,
            &host.resource_id,
            status::DELETING.with_details(details),
        ))
        .await;
        if let Err(e) = result {
            debug!(error = %e, "Failed to update host status");
        }
    }

    async fn invalidate(&self, request: &Request<ReconcilerId>, host: Host) -> Directive {
        if let Err(e) = self
            .credentials
            .revoke_credentials(&host.tenant_id, host.uuid)
            .await
        {
            return provisioning_directive(request, e);
        }

        let result = inventory::bounded(self.inventory.set_host_state(
            &host.tenant_id,
            &host.resource_id,
            HostState::Untrusted,
            status::INVALIDATED,
        ))
        .await;
        if let Err(d) = handle_inventory_error(request, result) {
            return d;
        }

        info!("Host invalidated");
        request.ack()
    }
}

#[async_trait]
impl Reconciler<ReconcilerId> for HostReconciler {
    #[instrument(skip_all, fields(tenant_id = %request.id.tenant_id(), host = %request.id.resource_id()))]
    async fn reconcile(&self, request: Request<ReconcilerId>) -> Directive {
        debug!("Reconciling host");

        let id = &request.id;
        let result =
            inventory::bounded(self.inventory.get_host(id.tenant_id(), id.resource_id())).await;
        let host = match handle_inventory_error(&request, result) {
            Ok(host) => host,
            Err(directive) => return directive,
        };

        if host.provider.is_some() {
            debug!("Host is managed by a provider, skipping");
            return request.ack();
        }
        if host.desired_state == host.current_state {
            debug!(state = ?host.current_state, "Host already converged");
            return request.ack();
        }

        match host.desired_state {
            HostState::Deleted => self.delete(&request, host).await,
            HostState::Untrusted => self.invalidate(&request, host).await,
            HostState::Onboarded | HostState::Unspecified => request.ack(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::credentials::testing::HangingCredentials;
    use crate::credentials::{MemoryCredentials, TimeoutCredentials};
    use crate::inventory::{MemoryInventory, ResourceRef};
    use uuid::Uuid;

    fn host(desired: HostState) -> Host {
        Host {
            resource_id: "host-1".to_string(),
            tenant_id: "t1".to_string(),
            uuid: Uuid::from_u128(9),
            desired_state: desired,
            current_state: HostState::Onboarded,
            ..Default::default()
        }
    }

    async fn fixture(host: Host) -> (Arc<MemoryInventory>, Arc<MemoryCredentials>, HostReconciler) {
        let (inventory, _events) = MemoryInventory::new();
        let inventory = Arc::new(inventory);
        inventory.put_host(host).await;

        let credentials = Arc::new(MemoryCredentials::new());
        credentials
            .get_or_create("t1", Uuid::from_u128(9))
            .await
            .unwrap();

        let reconciler = HostReconciler::new(inventory.clone(), credentials.clone());
        (inventory, credentials, reconciler)
    }

    fn request() -> Request<ReconcilerId> {
        Request::new(ReconcilerId::new("t1", "host-1"))
    }

    #[test]
    fn test_filter_skips_deletions() {
        let r = ResourceRef::new("t1", "host-1");
        assert!(filter_event(&WatchEvent::new(EventKind::Created, r.clone())));
        assert!(filter_event(&WatchEvent::new(EventKind::Updated, r.clone())));
        assert!(!filter_event(&WatchEvent::new(EventKind::Deleted, r)));
    }

    #[tokio::test]
    async fn test_converged_host_is_acked() {
        let (_, credentials, reconciler) = fixture(host(HostState::Onboarded)).await;
        assert!(reconciler.reconcile(request()).await.is_ack());
        assert_eq!(credentials.len().await, 1);
    }

    #[tokio::test]
    async fn test_delete_waits_for_instance() {
        let mut h = host(HostState::Deleted);
        h.instance_id = Some("inst-1".to_string());
        let (inventory, credentials, reconciler) = fixture(h).await;

        assert!(reconciler.reconcile(request()).await.is_retry());
        let stored = inventory.host("host-1").await.unwrap();
        assert_eq!(
            stored.host_status,
            status::DELETING.with_details("waiting on inst-1 deletion")
        );
        assert_eq!(credentials.len().await, 1);
    }

    #[tokio::test]
    async fn test_delete_revokes_and_removes() {
        let (inventory, credentials, reconciler) = fixture(host(HostState::Deleted)).await;

        assert!(reconciler.reconcile(request()).await.is_ack());
        assert!(inventory.host("host-1").await.is_none());
        assert!(credentials.is_empty().await);
    }

    #[tokio::test]
    async fn test_invalidate_revokes_and_marks_host() {
        let (inventory, credentials, reconciler) = fixture(host(HostState::Untrusted)).await;

        assert!(reconciler.reconcile(request()).await.is_ack());
        let stored = inventory.host("host-1").await.unwrap();
        assert_eq!(stored.current_state, HostState::Untrusted);
        assert_eq!(stored.host_status, status::INVALIDATED);
        assert!(credentials.is_empty().await);
    }

    #[tokio::test]
    async fn test_provider_managed_host_is_skipped() {
        let mut h = host(HostState::Deleted);
        h.provider = Some("lenovo".to_string());
        let (inventory, _, reconciler) = fixture(h).await;

        assert!(reconciler.reconcile(request()).await.is_ack());
        assert!(inventory.host("host-1").await.is_some());
    }

    #[tokio::test]
    async fn test_hung_credential_provider_is_retried() {
        let (inventory, _events) = MemoryInventory::new();
        let inventory = Arc::new(inventory);
        inventory.put_host(host(HostState::Untrusted)).await;

        let credentials = Arc::new(TimeoutCredentials::new(
            HangingCredentials,
            Duration::from_millis(20),
        ));
        let reconciler = HostReconciler::new(inventory.clone(), credentials);

        let directive = tokio::time::timeout(Duration::from_secs(1), reconciler.reconcile(request()))
            .await
            .expect("revoke is bounded");
        assert!(directive.is_retry());

        let stored = inventory.host("host-1").await.unwrap();
        assert_eq!(stored.current_state, HostState::Onboarded);
    }
}
