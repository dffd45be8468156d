//! Onboarding controller.
//!
//! Feeds inventory changes into the per-kind reconcile controllers. Work
//! arrives from two sources: the inventory watch stream and a periodic full
//! pass that covers events lost in transit. Both end in
//! [`OnboardingController::reconcile_resource`], which routes the resource to
//! the controller registered for its kind.
//!
//! The kind maps are fixed when the controller is built and read-only after.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use onboard_reconcile::{
    Controller, ControllerConfig, ReconcileError, Reconciler, ReconcilerId, DEFAULT_TICKER_PERIOD,
};
use thiserror::Error;
use tokio::sync::{mpsc, watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::inventory::{self, InventoryClient, InventoryError, InventoryKind, ResourceRef, WatchEvent};

/// Decides whether an event of one kind should be reconciled.
pub type EventFilter = fn(&WatchEvent) -> bool;

/// Controller errors.
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("initial reconciliation failed: {0}")]
    InitialPass(#[source] InventoryError),

    #[error("controller already started")]
    AlreadyStarted,

    #[error("no reconciler registered for {0}")]
    NoReconciler(InventoryKind),

    #[error(transparent)]
    Inventory(#[from] InventoryError),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
}

// =============================================================================
// Builder
// =============================================================================

pub struct OnboardingControllerBuilder {
    inventory: Arc<dyn InventoryClient>,
    ticker_period: Duration,
    filters: HashMap<InventoryKind, EventFilter>,
    controllers: HashMap<InventoryKind, Controller<ReconcilerId>>,
}

impl OnboardingControllerBuilder {
    /// Period of the full reconciliation pass.
    pub fn ticker_period(mut self, period: Duration) -> Self {
        self.ticker_period = period;
        self
    }

    /// Event predicate for `kind`. Kinds without one accept every event.
    pub fn filter(mut self, kind: InventoryKind, filter: EventFilter) -> Self {
        self.filters.insert(kind, filter);
        self
    }

    /// Register the reconciler for `kind` and start its workers.
    pub fn reconciler<R: Reconciler<ReconcilerId>>(
        mut self,
        kind: InventoryKind,
        reconciler: Arc<R>,
        config: ControllerConfig,
    ) -> Self {
        let controller = Controller::spawn(kind.to_string(), reconciler, config);
        self.controllers.insert(kind, controller);
        self
    }

    pub fn build(self, events: mpsc::Receiver<WatchEvent>) -> OnboardingController {
        let (shutdown_tx, _) = watch::channel(false);
        OnboardingController {
            dispatcher: Arc::new(Dispatcher {
                inventory: self.inventory,
                filters: self.filters,
                controllers: self.controllers,
            }),
            ticker_period: self.ticker_period,
            events: Mutex::new(Some(events)),
            shutdown_tx,
            loop_handle: Mutex::new(None),
            fatal: Arc::new(Notify::new()),
        }
    }
}

// =============================================================================
// Controller
// =============================================================================

pub struct OnboardingController {
    dispatcher: Arc<Dispatcher>,
    ticker_period: Duration,
    events: Mutex<Option<mpsc::Receiver<WatchEvent>>>,
    shutdown_tx: watch::Sender<bool>,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
    fatal: Arc<Notify>,
}

impl OnboardingController {
    pub fn builder(inventory: Arc<dyn InventoryClient>) -> OnboardingControllerBuilder {
        OnboardingControllerBuilder {
            inventory,
            ticker_period: DEFAULT_TICKER_PERIOD,
            filters: HashMap::new(),
            controllers: HashMap::new(),
        }
    }

    /// Run one full pass, then start the event loop.
    ///
    /// Fails only when the initial listing fails for a reason other than
    /// not found.
    pub async fn start(&self) -> Result<(), ControllerError> {
        // Held across the initial pass so a failed start can be retried.
        let mut events = self.events.lock().await;
        if events.is_none() {
            return Err(ControllerError::AlreadyStarted);
        }

        self.dispatcher
            .reconcile_all()
            .await
            .map_err(ControllerError::InitialPass)?;

        let events = events.take().ok_or(ControllerError::AlreadyStarted)?;

        let event_loop = EventLoop {
            dispatcher: Arc::clone(&self.dispatcher),
            ticker_period: self.ticker_period,
            shutdown: self.shutdown_tx.subscribe(),
            fatal: Arc::clone(&self.fatal),
        };
        *self.loop_handle.lock().await = Some(tokio::spawn(event_loop.run(events)));

        info!(
            ticker_period_secs = self.ticker_period.as_secs(),
            "Onboarding controller started"
        );
        Ok(())
    }

    /// Stop the event loop, then every per-kind controller.
    ///
    /// In-flight reconcile calls are allowed to finish.
    pub async fn stop(&self) {
        self.shutdown_tx.send_replace(true);

        if let Some(handle) = self.loop_handle.lock().await.take() {
            if let Err(e) = handle.await {
                error!(error = %e, "Event loop panicked");
            }
        }

        for controller in self.dispatcher.controllers.values() {
            controller.stop().await;
        }

        info!("Onboarding controller stopped");
    }

    /// Resolves when the event loop hits an unrecoverable error.
    pub async fn wait_fatal(&self) {
        self.fatal.notified().await;
    }

    pub fn filter_event(&self, event: &WatchEvent) -> bool {
        self.dispatcher.filter_event(event)
    }

    pub async fn reconcile_resource(&self, resource: &ResourceRef) -> Result<(), ControllerError> {
        self.dispatcher.reconcile_resource(resource).await
    }

    /// Run a full pass now.
    pub async fn reconcile_all(&self) -> Result<(), InventoryError> {
        self.dispatcher.reconcile_all().await
    }
}

// =============================================================================
// Dispatch
// =============================================================================

struct Dispatcher {
    inventory: Arc<dyn InventoryClient>,
    filters: HashMap<InventoryKind, EventFilter>,
    controllers: HashMap<InventoryKind, Controller<ReconcilerId>>,
}

impl Dispatcher {
    fn filter_event(&self, event: &WatchEvent) -> bool {
        let resource = match event.validate() {
            Ok(resource) => resource,
            Err(e) => {
                warn!(error = %e, "Dropping invalid event");
                return false;
            }
        };

        let kind = match InventoryKind::from_resource_id(&resource.resource_id) {
            Ok(kind) => kind,
            Err(e) => {
                debug!(error = %e, "Dropping event of unhandled kind");
                return false;
            }
        };

        self.filters.get(&kind).is_none_or(|accept| accept(event))
    }

    async fn reconcile_resource(&self, resource: &ResourceRef) -> Result<(), ControllerError> {
        let kind = InventoryKind::from_resource_id(&resource.resource_id)?;
        let controller = self
            .controllers
            .get(&kind)
            .ok_or(ControllerError::NoReconciler(kind))?;

        debug!(
            kind = %kind,
            tenant_id = %resource.tenant_id,
            resource_id = %resource.resource_id,
            "Queueing reconcile"
        );
        controller
            .reconcile(ReconcilerId::new(&resource.tenant_id, &resource.resource_id))
            .await?;
        Ok(())
    }

    async fn reconcile_all(&self) -> Result<(), InventoryError> {
        let mut kinds: Vec<InventoryKind> = self.controllers.keys().copied().collect();
        kinds.sort();

        let resources = match inventory::bounded(self.inventory.list_all(&kinds)).await {
            Ok(resources) => resources,
            Err(e) if e.is_not_found() => {
                debug!("No resources to reconcile");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        debug!(count = resources.len(), "Reconciling all resources");
        for resource in &resources {
            if let Err(e) = self.reconcile_resource(resource).await {
                warn!(
                    resource_id = %resource.resource_id,
                    error = %e,
                    "Cannot queue reconcile"
                );
            }
        }
        Ok(())
    }
}

struct EventLoop {
    dispatcher: Arc<Dispatcher>,
    ticker_period: Duration,
    shutdown: watch::Receiver<bool>,
    fatal: Arc<Notify>,
}

impl EventLoop {
    async fn run(mut self, mut events: mpsc::Receiver<WatchEvent>) {
        let mut ticker =
            tokio::time::interval_at(Instant::now() + self.ticker_period, self.ticker_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown.changed() => break,

                event = events.recv() => {
                    let Some(event) = event else {
                        error!("Inventory watch stream closed");
                        self.fatal.notify_one();
                        break;
                    };
                    if !self.dispatcher.filter_event(&event) {
                        continue;
                    }
                    if let Some(resource) = &event.resource {
                        if let Err(e) = self.dispatcher.reconcile_resource(resource).await {
                            warn!(
                                resource_id = %resource.resource_id,
                                error = %e,
                                "Cannot queue reconcile"
                            );
                        }
                    }
                }

                _ = ticker.tick() => {
                    debug!("Periodic reconciliation");
                    if let Err(e) = self.dispatcher.reconcile_all().await {
                        warn!(error = %e, "Periodic reconciliation failed");
                    }
                }
            }
        }

        debug!("Event loop exited");
    }
}
