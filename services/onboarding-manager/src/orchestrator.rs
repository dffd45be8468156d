//! Production workflow orchestration.
//!
//! For every host the orchestrator ensures one Hardware, Template and
//! Workflow triple exists in the resource store and tracks the workflow to
//! completion. Each resource is get-or-create: an existing resource is
//! never modified, so repeating the sequence after a partial failure is
//! safe. This relies on at most one reconciliation of a host being in
//! flight at a time.

use std::sync::Arc;

use onboard_reconcile::{Classify, ErrorCode};
use onboard_tinkerbell::{
    Hardware, HardwareSpec, MachineSpec, ObjectMeta, PipelineError, Resource, ResourceKind,
    ResourceStore, StoreError, Template, Workflow, WorkflowState, DEVICE_KEY,
};
use thiserror::Error;
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

use crate::credentials::{CredentialError, CredentialProvider};
use crate::inventory::{Instance, InstanceState, InventoryError};
use crate::profile::{DeviceProfile, ProfileError};
use crate::progress::WorkflowProgress;
use crate::status::{self, ResourceStatus};
use crate::template::TemplateAssembler;

/// Boot disk recorded on Hardware.
const DEFAULT_DISK: &str = "/dev/sda";

// =============================================================================
// Errors and outcomes
// =============================================================================

/// Onboarding errors.
#[derive(Debug, Error)]
pub enum OnboardingError {
    #[error("failed to {step} {kind} {name}: {source}")]
    Store {
        step: &'static str,
        kind: ResourceKind,
        name: String,
        #[source]
        source: StoreError,
    },

    #[error("credentials: {0}")]
    Credentials(#[from] CredentialError),

    #[error(transparent)]
    Profile(#[from] ProfileError),

    #[error("failed to render template: {0}")]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Inventory(#[from] InventoryError),

    #[error("workflow {workflow} is in unknown state {state}")]
    UnknownWorkflowState {
        workflow: String,
        state: WorkflowState,
    },

    #[error("hardware {0} does not record an applied OS")]
    MissingAppliedOs(String),
}

impl Classify for OnboardingError {
    fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::Store { .. } | Self::Credentials(_) => Some(ErrorCode::Unavailable),
            Self::Profile(e) => e.code(),
            Self::Inventory(e) => e.code(),
            Self::Pipeline(_) | Self::UnknownWorkflowState { .. } | Self::MissingAppliedOs(_) => {
                Some(ErrorCode::Internal)
            }
        }
    }
}

/// Result of one provisioning check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The workflow succeeded.
    Done,
    /// Work is underway; check again later.
    RetryLater,
    /// The workflow failed and will not be retried automatically.
    PermanentFailure { reason: String },
}

// =============================================================================
// Names
// =============================================================================

pub fn hardware_name(uuid: Uuid) -> String {
    format!("machine-{uuid}")
}

pub fn workflow_name(uuid: Uuid) -> String {
    format!("workflow-{uuid}-prod")
}

// =============================================================================
// Orchestrator
// =============================================================================

pub struct WorkflowOrchestrator {
    store: Arc<dyn ResourceStore>,
    credentials: Arc<dyn CredentialProvider>,
    assembler: TemplateAssembler,
    namespace: String,
}

impl WorkflowOrchestrator {
    pub fn new(
        store: Arc<dyn ResourceStore>,
        credentials: Arc<dyn CredentialProvider>,
        assembler: TemplateAssembler,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            store,
            credentials,
            assembler,
            namespace: namespace.into(),
        }
    }

    /// Whether the host's production workflow exists. Any error reads as no.
    pub async fn check_workflow_exists(&self, profile: &DeviceProfile) -> bool {
        self.store
            .get_workflow(&self.namespace, &workflow_name(profile.guid))
            .await
            .is_ok()
    }

    /// Start the production workflow if missing, otherwise fold its status
    /// into `instance`.
    #[instrument(skip_all, fields(host_uuid = %profile.guid, instance = %instance.resource_id))]
    pub async fn check_status_or_run_prod_workflow(
        &self,
        profile: &mut DeviceProfile,
        instance: &mut Instance,
    ) -> Result<Outcome, OnboardingError> {
        let name = workflow_name(profile.guid);
        let workflow = match self.store.get_workflow(&self.namespace, &name).await {
            Ok(workflow) => workflow,
            Err(e) if e.is_not_found() => {
                self.run_prod_workflow(profile).await?;
                info!(workflow = %name, "Production workflow started");
                return Ok(Outcome::RetryLater);
            }
            Err(e) => {
                return Err(OnboardingError::Store {
                    step: "get",
                    kind: ResourceKind::Workflow,
                    name,
                    source: e,
                })
            }
        };

        instance.current_state = InstanceState::Unspecified;
        instance.provisioning_status = status::PROVISIONING_IN_PROGRESS;

        self.handle_workflow_status(
            instance,
            &workflow,
            &status::PROVISIONING_DONE,
            &status::PROVISIONING_FAILED,
        )
        .await
    }

    /// Ensure credentials, Hardware, Template and Workflow exist, in order.
    pub async fn run_prod_workflow(&self, profile: &mut DeviceProfile) -> Result<(), OnboardingError> {
        let credentials = self
            .credentials
            .get_or_create(&profile.tenant_id, profile.guid)
            .await?;
        profile.credentials = Some(credentials);

        let hardware = self.hardware(profile);
        let hardware_name = hardware.metadata.name.clone();
        self.ensure(hardware.into()).await?;

        let pipeline = self.assembler.assemble(profile);
        let template = Template::from_pipeline(
            ObjectMeta::new(TemplateAssembler::template_name(profile), &self.namespace),
            &pipeline,
        )?;
        let template_name = template.metadata.name.clone();
        self.ensure(template.into()).await?;

        let workflow = Workflow::new(
            ObjectMeta::new(workflow_name(profile.guid), &self.namespace),
            hardware_name,
            template_name,
        )
        .with_hardware_map(DEVICE_KEY, &profile.mac);
        self.ensure(workflow.into()).await
    }

    /// Apply a workflow's state to `instance`.
    pub async fn handle_workflow_status(
        &self,
        instance: &mut Instance,
        workflow: &Workflow,
        on_success: &ResourceStatus,
        on_failure: &ResourceStatus,
    ) -> Result<Outcome, OnboardingError> {
        let progress = WorkflowProgress::of(workflow);
        debug!(
            workflow = %workflow.metadata.name,
            state = %progress.state,
            detail = %progress.detail,
            "Workflow status"
        );

        match progress.state {
            WorkflowState::Success => {
                let applied_os = self.applied_os(workflow).await?;
                instance.current_os = Some(applied_os);
                instance.current_state = InstanceState::Running;
                instance.provisioning_status = on_success.with_details(&progress.detail);
                instance.host.host_status = status::REBOOTING;
                Ok(Outcome::Done)
            }
            WorkflowState::Failed | WorkflowState::Timeout => {
                instance.provisioning_status = on_failure.with_details(&progress.detail);
                Ok(Outcome::PermanentFailure {
                    reason: format!(
                        "workflow {} finished in {}: {}",
                        workflow.metadata.name, progress.state, progress.detail
                    ),
                })
            }
            WorkflowState::Unset | WorkflowState::Pending | WorkflowState::Running => {
                instance.provisioning_status =
                    status::PROVISIONING_IN_PROGRESS.with_details(&progress.detail);
                Ok(Outcome::RetryLater)
            }
            WorkflowState::Unknown => {
                error!(workflow = %workflow.metadata.name, "Workflow in unknown state");
                Err(OnboardingError::UnknownWorkflowState {
                    workflow: workflow.metadata.name.clone(),
                    state: progress.state,
                })
            }
        }
    }

    /// Delete the host's production workflow. A missing workflow is fine.
    pub async fn delete_workflow_resources(&self, uuid: Uuid) -> Result<(), OnboardingError> {
        let name = workflow_name(uuid);
        match self
            .store
            .delete(ResourceKind::Workflow, &self.namespace, &name)
            .await
        {
            Ok(()) => {
                info!(workflow = %name, "Workflow deleted");
                Ok(())
            }
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(OnboardingError::Store {
                step: "delete",
                kind: ResourceKind::Workflow,
                name,
                source: e,
            }),
        }
    }

    /// OS the backend recorded on the workflow's Hardware.
    async fn applied_os(&self, workflow: &Workflow) -> Result<String, OnboardingError> {
        let name = &workflow.spec.hardware_ref;
        let hardware = self
            .store
            .get_hardware(&self.namespace, name)
            .await
            .map_err(|e| OnboardingError::Store {
                step: "get",
                kind: ResourceKind::Hardware,
                name: name.clone(),
                source: e,
            })?;

        hardware
            .os_slug()
            .map(str::to_string)
            .ok_or_else(|| OnboardingError::MissingAppliedOs(name.clone()))
    }

    fn hardware(&self, profile: &DeviceProfile) -> Hardware {
        Hardware::new(
            ObjectMeta::new(hardware_name(profile.guid), &self.namespace),
            HardwareSpec::for_machine(MachineSpec {
                disk: DEFAULT_DISK.to_string(),
                mac: profile.mac.clone(),
                ip: profile.ip.clone(),
                gateway: profile.gateway.clone(),
                hostname: profile.hostname.clone(),
                name_servers: profile.name_servers.clone(),
                os_distro: profile.os_family.name().to_string(),
                os_slug: profile.os_resource_id.clone(),
                os_version: profile.os_version.clone(),
            }),
        )
    }

    /// Create `resource` unless one with the same name exists.
    async fn ensure(&self, resource: Resource) -> Result<(), OnboardingError> {
        let kind = resource.kind();
        let name = resource.metadata().name.clone();

        match self.store.get(kind, &self.namespace, &name).await {
            Ok(_) => {
                debug!(kind = %kind, name = %name, "Resource exists");
                Ok(())
            }
            Err(e) if e.is_not_found() => match self.store.create(resource).await {
                Ok(()) => {
                    info!(kind = %kind, name = %name, "Resource created");
                    Ok(())
                }
                // created by someone else since the get
                Err(StoreError::AlreadyExists { .. }) => Ok(()),
                Err(source) => Err(OnboardingError::Store {
                    step: "create",
                    kind,
                    name,
                    source,
                }),
            },
            Err(source) => Err(OnboardingError::Store {
                step: "get",
                kind,
                name,
                source,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::credentials::testing::HangingCredentials;
    use crate::credentials::{MemoryCredentials, TimeoutCredentials};
    use crate::inventory::{Host, OperatingSystem, OsType, SecurityFeature};
    use crate::profile::ProfileDefaults;
    use crate::status::StatusIndicator;
    use onboard_tinkerbell::{ActionStatus, MemoryStore, TaskStatus, WorkflowStatus};

    const NS: &str = "orch-infra";

    fn instance() -> Instance {
        Instance {
            resource_id: "inst-1".to_string(),
            tenant_id: "t1".to_string(),
            host: Host {
                resource_id: "host-1".to_string(),
                tenant_id: "t1".to_string(),
                uuid: Uuid::from_u128(42),
                pxe_mac: "aa:bb:cc:dd:ee:ff".to_string(),
                bmc_ip: "10.0.0.5".to_string(),
                ..Default::default()
            },
            os: Some(OperatingSystem {
                resource_id: "os-1".to_string(),
                tenant_id: "t1".to_string(),
                image_url: "https://cdn/ubuntu.img".to_string(),
                os_type: OsType::Mutable,
                ..Default::default()
            }),
            security_feature: SecurityFeature::None,
            ..Default::default()
        }
    }

    fn setup() -> (Arc<MemoryStore>, WorkflowOrchestrator) {
        let store = Arc::new(MemoryStore::new());
        let orchestrator = WorkflowOrchestrator::new(
            store.clone(),
            Arc::new(MemoryCredentials::new()),
            TemplateAssembler::default(),
            NS,
        );
        (store, orchestrator)
    }

    fn profile(instance: &Instance) -> DeviceProfile {
        DeviceProfile::from_instance(instance, &ProfileDefaults::default()).unwrap()
    }

    #[tokio::test]
    async fn test_run_prod_workflow_creates_triple() {
        let (store, orchestrator) = setup();
        let inst = instance();
        let mut profile = profile(&inst);

        orchestrator.run_prod_workflow(&mut profile).await.unwrap();

        let uuid = Uuid::from_u128(42);
        let hardware = store.get_hardware(NS, &hardware_name(uuid)).await.unwrap();
        assert_eq!(hardware.os_slug(), Some("os-1"));
        assert_eq!(hardware.primary_mac(), Some("aa:bb:cc:dd:ee:ff"));

        let template = store
            .get_template(NS, &format!("ubuntu-{uuid}-prod"))
            .await
            .unwrap();
        let pipeline = template.pipeline().unwrap();
        assert!(pipeline.action("write-client-id").is_some());

        let workflow = store.get_workflow(NS, &workflow_name(uuid)).await.unwrap();
        assert_eq!(workflow.spec.hardware_ref, hardware_name(uuid));
        assert_eq!(workflow.spec.template_ref, format!("ubuntu-{uuid}-prod"));
        assert_eq!(workflow.spec.hardware_map[DEVICE_KEY], "aa:bb:cc:dd:ee:ff");
        assert!(profile.credentials.is_some());
    }

    #[tokio::test]
    async fn test_run_prod_workflow_is_idempotent() {
        let (store, orchestrator) = setup();
        let inst = instance();

        orchestrator.run_prod_workflow(&mut profile(&inst)).await.unwrap();
        orchestrator.run_prod_workflow(&mut profile(&inst)).await.unwrap();

        assert_eq!(store.create_count(ResourceKind::Hardware), 1);
        assert_eq!(store.create_count(ResourceKind::Template), 1);
        assert_eq!(store.create_count(ResourceKind::Workflow), 1);
    }

    #[tokio::test]
    async fn test_hung_credential_provider_aborts_sequence() {
        let store = Arc::new(MemoryStore::new());
        let orchestrator = WorkflowOrchestrator::new(
            store.clone(),
            Arc::new(TimeoutCredentials::new(
                HangingCredentials,
                Duration::from_millis(20),
            )),
            TemplateAssembler::default(),
            NS,
        );

        let err = orchestrator
            .run_prod_workflow(&mut profile(&instance()))
            .await
            .unwrap_err();
        assert!(matches!(err, OnboardingError::Credentials(_)));
        assert_eq!(err.code(), Some(ErrorCode::Unavailable));
        assert_eq!(store.create_count(ResourceKind::Hardware), 0);
    }

    #[tokio::test]
    async fn test_store_failure_aborts_sequence() {
        let (store, orchestrator) = setup();
        store.set_unavailable(true);

        let err = orchestrator
            .run_prod_workflow(&mut profile(&instance()))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            OnboardingError::Store {
                step: "get",
                kind: ResourceKind::Hardware,
                ..
            }
        ));
        assert_eq!(err.code(), Some(ErrorCode::Unavailable));
        assert_eq!(store.create_count(ResourceKind::Template), 0);
    }

    #[tokio::test]
    async fn test_missing_workflow_starts_one() {
        let (store, orchestrator) = setup();
        let mut inst = instance();
        let mut profile = profile(&inst);

        assert!(!orchestrator.check_workflow_exists(&profile).await);
        let outcome = orchestrator
            .check_status_or_run_prod_workflow(&mut profile, &mut inst)
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::RetryLater);
        assert!(orchestrator.check_workflow_exists(&profile).await);
        assert!(
            store
                .contains(ResourceKind::Workflow, NS, &workflow_name(profile.guid))
                .await
        );
    }

    async fn with_status(
        state: WorkflowState,
        actions: Vec<ActionStatus>,
    ) -> (Instance, Result<Outcome, OnboardingError>) {
        let (store, orchestrator) = setup();
        let mut inst = instance();
        let mut profile = profile(&inst);
        orchestrator.run_prod_workflow(&mut profile).await.unwrap();

        store
            .set_workflow_status(
                NS,
                &workflow_name(profile.guid),
                WorkflowStatus {
                    state,
                    global_timeout: 9800,
                    tasks: vec![TaskStatus {
                        name: "os-installation".to_string(),
                        worker_addr: profile.mac.clone(),
                        actions,
                    }],
                },
            )
            .await
            .unwrap();

        let result = orchestrator
            .check_status_or_run_prod_workflow(&mut profile, &mut inst)
            .await;
        (inst, result)
    }

    #[tokio::test]
    async fn test_running_workflow_reports_progress() {
        let (inst, result) = with_status(
            WorkflowState::Running,
            vec![
                ActionStatus::new("secure-boot-status-flag-read", WorkflowState::Success),
                ActionStatus::new("erase-non-removable-disk", WorkflowState::Running),
            ],
        )
        .await;

        assert_eq!(result.unwrap(), Outcome::RetryLater);
        assert_eq!(inst.current_state, InstanceState::Unspecified);
        assert_eq!(
            inst.provisioning_status.status,
            "Provisioning In Progress: 2/2: Erasing data from all non-removable disks"
        );
        assert_eq!(inst.provisioning_status.indicator, StatusIndicator::InProgress);
    }

    #[tokio::test]
    async fn test_failed_workflow_is_permanent() {
        let (inst, result) = with_status(
            WorkflowState::Failed,
            vec![
                ActionStatus::new("secure-boot-status-flag-read", WorkflowState::Success),
                ActionStatus::new("stream-ubuntu-image", WorkflowState::Failed)
                    .with_message("disk full"),
            ],
        )
        .await;

        assert!(matches!(result.unwrap(), Outcome::PermanentFailure { .. }));
        assert_eq!(
            inst.provisioning_status.status,
            "Provisioning Failed: 2/2: Streaming OS image failed: disk full"
        );
        assert_eq!(inst.provisioning_status.indicator, StatusIndicator::Error);
    }

    #[tokio::test]
    async fn test_successful_workflow_records_applied_os() {
        let (inst, result) = with_status(
            WorkflowState::Success,
            vec![ActionStatus::new("reboot", WorkflowState::Success)],
        )
        .await;

        assert_eq!(result.unwrap(), Outcome::Done);
        assert_eq!(inst.current_state, InstanceState::Running);
        assert_eq!(inst.current_os.as_deref(), Some("os-1"));
        assert_eq!(inst.provisioning_status, status::PROVISIONING_DONE);
        assert_eq!(inst.host.host_status, status::REBOOTING);
    }

    #[tokio::test]
    async fn test_unknown_state_is_error() {
        let (_, result) = with_status(WorkflowState::Unknown, vec![]).await;
        let err = result.unwrap_err();
        assert!(matches!(err, OnboardingError::UnknownWorkflowState { .. }));
        assert_eq!(err.code(), Some(ErrorCode::Internal));
    }

    #[tokio::test]
    async fn test_delete_workflow_resources_tolerates_missing() {
        let (store, orchestrator) = setup();
        let uuid = Uuid::from_u128(42);

        orchestrator.delete_workflow_resources(uuid).await.unwrap();

        orchestrator
            .run_prod_workflow(&mut profile(&instance()))
            .await
            .unwrap();
        orchestrator.delete_workflow_resources(uuid).await.unwrap();
        assert!(!store.contains(ResourceKind::Workflow, NS, &workflow_name(uuid)).await);
    }
}
