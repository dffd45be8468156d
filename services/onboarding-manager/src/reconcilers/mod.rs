//! Per-kind reconcilers driven by the onboarding controller.

pub mod host;
pub mod instance;
pub mod os;

pub use host::HostReconciler;
pub use instance::InstanceReconciler;
pub use os::{ArtifactResolver, ArtifactUrls, OsReconciler, ResolveError, StaticArtifactResolver};
