//! Service assembly.

use std::sync::Arc;

use onboard_reconcile::ControllerConfig;
use onboard_tinkerbell::{ResourceStore, TimeoutStore};
use tokio::sync::mpsc;

use crate::config::Config;
use crate::controller::OnboardingController;
use crate::credentials::{CredentialProvider, TimeoutCredentials};
use crate::inventory::{InventoryClient, InventoryKind, WatchEvent};
use crate::orchestrator::WorkflowOrchestrator;
use crate::reconcilers::{self, ArtifactResolver, HostReconciler, InstanceReconciler, OsReconciler};
use crate::template::{ActionImages, TemplateAssembler};

/// External systems the service talks to.
pub struct Collaborators {
    pub inventory: Arc<dyn InventoryClient>,
    pub store: Arc<dyn ResourceStore>,
    pub credentials: Arc<dyn CredentialProvider>,
    pub resolver: Arc<dyn ArtifactResolver>,
}

/// Build the onboarding controller with a reconciler for every inventory
/// kind. Must be called from within a Tokio runtime.
pub fn build_controller(
    config: &Config,
    collaborators: Collaborators,
    events: mpsc::Receiver<WatchEvent>,
) -> OnboardingController {
    let Collaborators {
        inventory,
        store,
        credentials,
        resolver,
    } = collaborators;

    let store: Arc<dyn ResourceStore> = Arc::new(TimeoutStore::new(store, config.store_timeout));
    let credentials: Arc<dyn CredentialProvider> = Arc::new(TimeoutCredentials::new(
        credentials,
        config.credentials_timeout,
    ));
    let assembler = TemplateAssembler::new(ActionImages::new(
        &config.action_registry,
        &config.image_version,
    ));
    let orchestrator = Arc::new(WorkflowOrchestrator::new(
        store,
        Arc::clone(&credentials),
        assembler,
        &config.namespace,
    ));

    let controller_config = ControllerConfig {
        parallelism: config.parallelism,
        timeout: config.reconcile_timeout,
        ..ControllerConfig::default()
    };

    OnboardingController::builder(Arc::clone(&inventory))
        .ticker_period(config.ticker_period)
        .filter(InventoryKind::Host, reconcilers::host::filter_event)
        .filter(InventoryKind::Os, reconcilers::os::filter_event)
        .reconciler(
            InventoryKind::Host,
            Arc::new(HostReconciler::new(Arc::clone(&inventory), credentials)),
            controller_config.clone(),
        )
        .reconciler(
            InventoryKind::Instance,
            Arc::new(InstanceReconciler::new(
                Arc::clone(&inventory),
                orchestrator,
                config.profile_defaults(),
            )),
            controller_config.clone(),
        )
        .reconciler(
            InventoryKind::Os,
            Arc::new(OsReconciler::new(inventory, resolver)),
            controller_config,
        )
        .build(events)
}
