//! Onboarding Manager
//!
//! Watches the inventory and provisions bare-metal hosts through the
//! declarative execution backend. This binary wires the in-memory
//! collaborators; deployments replace them with network clients.

use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use onboard_manager::credentials::MemoryCredentials;
use onboard_manager::inventory::MemoryInventory;
use onboard_manager::reconcilers::StaticArtifactResolver;
use onboard_manager::{build_controller, Collaborators, Config};
use onboard_tinkerbell::MemoryStore;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting onboarding manager");

    let config = Config::from_env()?;
    info!(
        namespace = %config.namespace,
        image_version = %config.image_version,
        parallelism = config.parallelism,
        ticker_period_secs = config.ticker_period.as_secs(),
        dev_mode = config.dev_mode,
        "Configuration loaded"
    );

    let (inventory, events) = MemoryInventory::new();
    let collaborators = Collaborators {
        inventory: Arc::new(inventory),
        store: Arc::new(MemoryStore::new()),
        credentials: Arc::new(MemoryCredentials::new()),
        resolver: Arc::new(StaticArtifactResolver::new(&config.artifact_base_url)),
    };

    let controller = build_controller(&config, collaborators, events);
    controller.start().await?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        _ = controller.wait_fatal() => {
            error!("Controller hit a fatal error, shutting down");
        }
    }

    controller.stop().await;

    info!("Onboarding manager shutdown complete");
    Ok(())
}
