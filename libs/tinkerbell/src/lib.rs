//! Declarative provisioning resources.
//!
//! Types for the three resources the execution backend consumes, the
//! pipeline document rendered into a Template, and the store interface used
//! to read and write them.
//!
//! # Resources
//!
//! - `Hardware` - network and boot metadata for one machine
//! - `Template` - rendered, ordered action pipeline
//! - `Workflow` - one provisioning job binding a Template to a Hardware,
//!   with a live status tree written by the backend
//!
//! Resources are created once and never updated in place by this crate's
//! callers; the backend owns `Workflow.status`.

pub mod error;
pub mod hardware;
pub mod memory;
pub mod metadata;
pub mod pipeline;
pub mod store;
pub mod template;
pub mod workflow;

pub use error::{PipelineError, StoreError};
pub use hardware::*;
pub use memory::MemoryStore;
pub use metadata::{ObjectMeta, TypeMeta};
pub use pipeline::{Action, PipelineDocument, Task};
pub use store::{Resource, ResourceKind, ResourceStore, TimeoutStore, DEFAULT_STORE_TIMEOUT};
pub use template::{Template, TemplateSpec};
pub use workflow::*;

/// API version for all provisioning resources.
pub const API_VERSION: &str = "tinkerbell.org/v1alpha1";
