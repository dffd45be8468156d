//! Onboarding Manager Library
//!
//! Provisions bare-metal hosts from the desired state held in an inventory.
//! For every host with a running instance the manager renders an OS
//! installation pipeline, submits it to the declarative execution backend as
//! a Hardware / Template / Workflow triple, and reports the workflow's
//! progress back onto the instance.
//!
//! ## Modules
//!
//! - `controller`: event and periodic dispatch to per-kind reconcilers
//! - `reconcilers`: host, instance and OS reconcilers
//! - `orchestrator`: idempotent workflow submission and status tracking
//! - `template`: pipeline assembly from a device profile
//! - `progress`: workflow status aggregation

pub mod config;
pub mod controller;
pub mod credentials;
pub mod inventory;
pub mod orchestrator;
pub mod profile;
pub mod progress;
pub mod reconcilers;
pub mod service;
pub mod status;
pub mod template;

pub use config::Config;
pub use controller::{ControllerError, OnboardingController};
pub use orchestrator::{OnboardingError, Outcome, WorkflowOrchestrator};
pub use service::{build_controller, Collaborators};
