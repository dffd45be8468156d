//! OS reconciler.
//!
//! Records where an OS profile's image and overlay script can be fetched.
//! Failures here never block onboarding, so every outcome is acknowledged.

use std::sync::Arc;

use async_trait::async_trait;
use onboard_reconcile::{handle_inventory_error, Directive, Reconciler, ReconcilerId, Request};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::inventory::{self, EventKind, InventoryClient, OperatingSystem, WatchEvent};

/// Only concrete changes are of interest.
pub fn filter_event(event: &WatchEvent) -> bool {
    matches!(
        event.kind,
        EventKind::Created | EventKind::Updated | EventKind::Deleted
    )
}

/// Download locations for one OS profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactUrls {
    pub os_url: String,
    pub overlay_url: String,
}

impl ArtifactUrls {
    /// Value stored as the OS repo URL.
    pub fn repo_url(&self) -> String {
        format!("{};{}", self.os_url, self.overlay_url)
    }
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("no artifacts for OS profile {0}")]
    NotFound(String),

    #[error("artifact registry unavailable: {0}")]
    Unavailable(String),
}

/// Resolves an OS profile to its artifact locations.
#[async_trait]
pub trait ArtifactResolver: Send + Sync {
    async fn resolve(&self, os: &OperatingSystem) -> Result<ArtifactUrls, ResolveError>;
}

/// Resolver that derives locations from a fixed file server layout:
/// `{base}/{profile}/{version}/installer.sh` for the overlay script.
#[derive(Debug, Clone)]
pub struct StaticArtifactResolver {
    base_url: String,
}

impl StaticArtifactResolver {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl ArtifactResolver for StaticArtifactResolver {
    async fn resolve(&self, os: &OperatingSystem) -> Result<ArtifactUrls, ResolveError> {
        if os.image_url.is_empty() || os.profile_name.is_empty() {
            return Err(ResolveError::NotFound(os.resource_id.clone()));
        }

        Ok(ArtifactUrls {
            os_url: os.image_url.clone(),
            overlay_url: format!(
                "{}/{}/{}/installer.sh",
                self.base_url, os.profile_name, os.version
            ),
        })
    }
}

pub struct OsReconciler {
    inventory: Arc<dyn InventoryClient>,
    resolver: Arc<dyn ArtifactResolver>,
}

impl OsReconciler {
    pub fn new(inventory: Arc<dyn InventoryClient>, resolver: Arc<dyn ArtifactResolver>) -> Self {
        Self {
            inventory,
            resolver,
        }
    }
}

#[async_trait]
impl Reconciler<ReconcilerId> for OsReconciler {
    #[instrument(skip_all, fields(tenant_id = %request.id.tenant_id(), os = %request.id.resource_id()))]
    async fn reconcile(&self, request: Request<ReconcilerId>) -> Directive {
        let id = &request.id;
        let result =
            inventory::bounded(self.inventory.get_os(id.tenant_id(), id.resource_id())).await;
        let os = match handle_inventory_error(&request, result) {
            Ok(os) => os,
            Err(directive) => return directive,
        };

        if !os.repo_url.is_empty() {
            debug!(repo_url = %os.repo_url, "Artifacts already resolved");
            return request.ack();
        }

        let urls = match self.resolver.resolve(&os).await {
            Ok(urls) => urls,
            Err(e) => {
                warn!(error = %e, "Cannot resolve OS artifacts");
                return request.ack();
            }
        };

        let repo_url = urls.repo_url();
        let result = inventory::bounded(self.inventory.set_os_repo_url(
            &os.tenant_id,
            &os.resource_id,
            &repo_url,
        ))
        .await;
        match result {
            Ok(()) => info!(repo_url = %repo_url, "OS artifacts resolved"),
            Err(e) => warn!(error = %e, "Cannot record OS artifacts"),
        }
        request.ack()
    }
}
