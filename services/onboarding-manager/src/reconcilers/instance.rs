//! Instance reconciler.
//!
//! Converges an instance's current state with its desired state. Provisioning
//! is delegated to the [`WorkflowOrchestrator`]; this module decides whether
//! provisioning should run at all and writes the resulting statuses back.

use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use onboard_reconcile::{
    handle_inventory_error, provisioning_directive, BackoffPolicy, Classify, Directive, Reconciler,
    ReconcilerId, Request,
};
use tracing::{debug, info, instrument, warn};

use crate::inventory::{
    self, HostState, Instance, InstanceState, InstanceUpdate, InventoryClient, InventoryError,
    OsProvider,
};
use crate::orchestrator::{Outcome, WorkflowOrchestrator};
use crate::profile::{DeviceProfile, ProfileDefaults};
use crate::status::{self, StatusIndicator};

pub struct InstanceReconciler {
    inventory: Arc<dyn InventoryClient>,
    orchestrator: Arc<WorkflowOrchestrator>,
    defaults: ProfileDefaults,
    backoff: BackoffPolicy,
}

impl InstanceReconciler {
    pub fn new(
        inventory: Arc<dyn InventoryClient>,
        orchestrator: Arc<WorkflowOrchestrator>,
        defaults: ProfileDefaults,
    ) -> Self {
        Self {
            inventory,
            orchestrator,
            defaults,
            backoff: BackoffPolicy::default(),
        }
    }

    async fn reconcile_instance(
        &self,
        request: &Request<ReconcilerId>,
        instance: Instance,
    ) -> Directive {
        if let Some(provider) = &instance.host.provider {
            debug!(provider = %provider, "Host is managed by a provider, skipping");
            return request.ack();
        }

        if instance.provisioning_status.indicator == StatusIndicator::Error
            && instance.desired_state != InstanceState::Deleted
        {
            debug!(
                status = %instance.provisioning_status,
                "Instance provisioning failed, waiting for it to be re-created"
            );
            return request.ack();
        }

        let host_untrusted = instance.host.current_state == HostState::Untrusted
            || instance.host.desired_state == HostState::Untrusted;
        if host_untrusted && instance.desired_state == InstanceState::Running {
            return self.invalidate(request, instance).await;
        }

        if instance.desired_state == instance.current_state {
            let stale = instance.current_state == InstanceState::Running
                && !instance.provisioning_status.is(&status::PROVISIONING_DONE);
            if !stale {
                debug!(state = ?instance.current_state, "Instance already converged");
                return request.ack();
            }
            info!(
                status = %instance.provisioning_status,
                "Running instance is not marked provisioned, reconciling"
            );
        }

        match instance.desired_state {
            InstanceState::Running => {
                if instance.host.current_state != HostState::Onboarded {
                    debug!(
                        host_state = ?instance.host.current_state,
                        "Host is not onboarded yet, skipping"
                    );
                    return request.ack();
                }
                self.provision(request, instance).await
            }
            InstanceState::Deleted => self.delete(request, instance).await,
            InstanceState::Untrusted => {
                let mut instance = instance;
                instance.current_state = InstanceState::Untrusted;
                self.write_instance(request, &instance).await
            }
            InstanceState::Unspecified => request.ack(),
        }
    }

    async fn provision(&self, request: &Request<ReconcilerId>, mut instance: Instance) -> Directive {
        match &instance.os {
            Some(os) if os.os_provider == OsProvider::Infra => {}
            Some(os) => {
                debug!(os = %os.resource_id, provider = ?os.os_provider, "OS is not provisioned by this service");
                return request.ack();
            }
            None => {
                debug!("Instance has no OS, skipping provisioning");
                return request.ack();
            }
        }

        let mut profile = match DeviceProfile::from_instance(&instance, &self.defaults) {
            Ok(profile) => profile,
            Err(e) => {
                warn!(error = %e, "Cannot build device profile");
                return self.provisioning_error(request, &mut instance, e).await;
            }
        };

        let before = InstanceUpdate::from(&instance);
        let host_status_before = instance.host.host_status.clone();

        let result = self
            .orchestrator
            .check_status_or_run_prod_workflow(&mut profile, &mut instance)
            .await;

        if InstanceUpdate::from(&instance) != before {
            if let Err(d) = self.update_instance(request, &instance).await {
                return d;
            }
        }
        if instance.host.host_status != host_status_before {
            let host = &instance.host;
            let result = inventory::bounded(self.inventory.set_host_status(
                &host.tenant_id,
                &host.resource_id,
                host.host_status.clone(),
            ))
            .await;
            if let Err(d) = handle_inventory_error(request, result) {
                return d;
            }
        }

        match result {
            Ok(Outcome::Done) => {
                if let Err(e) = self
                    .orchestrator
                    .delete_workflow_resources(instance.host.uuid)
                    .await
                {
                    return provisioning_directive(request, e);
                }
                info!(os = ?instance.current_os, "Instance provisioned");
                request.ack()
            }
            Ok(Outcome::RetryLater) => request.retry_with_backoff(
                anyhow!("provisioning of {} in progress", instance.resource_id),
                &self.backoff,
            ),
            Ok(Outcome::PermanentFailure { reason }) => request.fail(anyhow!(reason)),
            Err(e) => {
                warn!(error = %e, "Provisioning step failed");
                self.provisioning_error(request, &mut instance, e).await
            }
        }
    }

    /// Classify a provisioning error. Only an aborted attempt is recorded on
    /// the instance; anything else is retried with the status left as is.
    async fn provisioning_error<E: Classify>(
        &self,
        request: &Request<ReconcilerId>,
        instance: &mut Instance,
        error: E,
    ) -> Directive {
        let details = error.to_string();
        let directive = provisioning_directive(request, error);
        if directive.is_fail() {
            instance.provisioning_status = status::PROVISIONING_FAILED.with_details(&details);
            if let Err(d) = self.update_instance(request, instance).await {
                return d;
            }
        }
        directive
    }

    async fn delete(&self, request: &Request<ReconcilerId>, mut instance: Instance) -> Directive {
        if let Err(e) = self
            .orchestrator
            .delete_workflow_resources(instance.host.uuid)
            .await
        {
            return provisioning_directive(request, e);
        }

        instance.current_state = InstanceState::Deleted;
        info!("Instance deleted");
        self.write_instance(request, &instance).await
    }

    /// Reset the statuses of an instance whose host lost its trust.
    async fn invalidate(&self, request: &Request<ReconcilerId>, mut instance: Instance) -> Directive {
        info!(host = %instance.host.resource_id, "Host is untrusted, invalidating instance");

        if let Err(e) = self
            .orchestrator
            .delete_workflow_resources(instance.host.uuid)
            .await
        {
            return provisioning_directive(request, e);
        }

        instance.instance_status = status::INVALIDATED;
        instance.provisioning_status = status::INVALIDATED;
        self.write_instance(request, &instance).await
    }

    async fn write_instance(&self, request: &Request<ReconcilerId>, instance: &Instance) -> Directive {
        match self.update_instance(request, instance).await {
            Ok(()) => request.ack(),
            Err(d) => d,
        }
    }

    async fn update_instance(
        &self,
        request: &Request<ReconcilerId>,
        instance: &Instance,
    ) -> Result<(), Directive> {
        let result: Result<(), InventoryError> = inventory::bounded(self.inventory.update_instance(
            &instance.tenant_id,
            &instance.resource_id,
            InstanceUpdate::from(instance),
        ))
        .await;
        handle_inventory_error(request, result)
    }
}

#[async_trait]
impl Reconciler<ReconcilerId> for InstanceReconciler {
    #[instrument(skip_all, fields(tenant_id = %request.id.tenant_id(), instance = %request.id.resource_id()))]
    async fn reconcile(&self, request: Request<ReconcilerId>) -> Directive {
        debug!("Reconciling instance");

        let id = &request.id;
        let result =
            inventory::bounded(self.inventory.get_instance(id.tenant_id(), id.resource_id())).await;
        let instance = match handle_inventory_error(&request, result) {
            Ok(instance) => instance,
            Err(directive) => return directive,
        };

        self.reconcile_instance(&request, instance).await
    }
}
