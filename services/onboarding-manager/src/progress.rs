//! Workflow progress aggregation.
//!
//! Reduces a workflow's status tree to its overall state and a short
//! `"<i>/<n>: <detail>"` string for operators.

use onboard_tinkerbell::{ActionStatus, Workflow, WorkflowState};
use tracing::warn;

use crate::template::actions::*;

/// Overall state plus a human-readable progress detail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowProgress {
    pub state: WorkflowState,
    pub detail: String,
}

impl WorkflowProgress {
    pub fn of(workflow: &Workflow) -> Self {
        Self {
            state: workflow.state(),
            detail: status_detail(Some(workflow)),
        }
    }
}

/// Operator-facing description of an action.
pub fn describe(action_name: &str) -> Option<&'static str> {
    let description = match action_name {
        SECURE_BOOT_FLAG_READ => "Verifying Secure Boot settings",
        ERASE_NON_REMOVABLE_DISK => "Erasing data from all non-removable disks",
        STREAM_UBUNTU_IMAGE | STREAM_OS_IMAGE => "Streaming OS image",
        PARTITION_DISK => "Partitioning disk",
        ADD_ENV_PROXY => "Configuring system proxy settings",
        ADD_APT_PROXY => "Configuring APT proxy settings",
        WRITE_HOSTNAME => "Setting hostname",
        WRITE_ETC_HOSTS => "Configuring hosts file",
        ADD_DNS_NAMESPACE => "Configuring DNS settings",
        GROW_PARTITION_INSTALL_SCRIPT => "Growing partition",
        CREATE_SECRETS_DIRECTORY => "Creating secrets directory",
        WRITE_CLIENT_ID => "Saving client ID",
        WRITE_CLIENT_SECRET => "Saving client secret",
        CREATE_USER => "Creating user",
        WRITE_INSTALL_SCRIPT => "Downloading installation scripts",
        INSTALL_SCRIPT_SERVICE => "Installing packages",
        INSTALL_SCRIPT_ENABLE => "Enabling system services",
        WRITE_NETPLAN => "Enabling network",
        NETPLAN_STATIC_IP => "Configuring network settings",
        GROW_PARTITION_SERVICE => "Starting grow partition service",
        GROW_PARTITION_SERVICE_ENABLE => "Enabling grow partition service",
        NETPLAN_SERVICE => "Starting netplan update service",
        NETPLAN_SERVICE_ENABLE => "Enabling netplan update service",
        KERNEL_UPGRADE => "Upgrading kernel",
        INSTALL_CLOUD_INIT => "Installing cloud-init",
        CLOUD_INIT_DS_IDENTITY => "Setting up cloud-init",
        SELINUX_RELABEL => "Relabeling SELinux contexts",
        FDE_ENCRYPTION => "Setting FDE encryption",
        EFIBOOTSET => "Setting boot option",
        REBOOT => "Rebooting",
        _ => return None,
    };
    Some(description)
}

/// Progress detail for a workflow.
///
/// Empty when there is no workflow, when it succeeded, or when its status
/// tree is incomplete. Only the first task is considered.
pub fn status_detail(workflow: Option<&Workflow>) -> String {
    let Some(workflow) = workflow else {
        return String::new();
    };
    if workflow.state() == WorkflowState::Success {
        return String::new();
    }

    let Some(task) = workflow.status.as_ref().and_then(|s| s.tasks.first()) else {
        return String::new();
    };
    if task.actions.is_empty() {
        warn!(workflow = %workflow.metadata.name, "Workflow task has no actions");
        return String::new();
    }

    action_progress(&task.actions).unwrap_or_else(|| {
        warn!(workflow = %workflow.metadata.name, "Workflow action with empty name");
        String::new()
    })
}

/// `None` if any action is unnamed.
fn action_progress(actions: &[ActionStatus]) -> Option<String> {
    if actions.iter().any(|a| a.name.is_empty()) {
        return None;
    }

    let last = actions.len() - 1;
    let (index, action) = actions
        .iter()
        .enumerate()
        .find(|(i, a)| a.status != WorkflowState::Success || *i == last)?;

    let description = describe(&action.name).unwrap_or(action.name.as_str());
    let message = match action.status {
        WorkflowState::Failed if action.message.is_empty() => format!("{description} failed"),
        WorkflowState::Failed => format!("{description} failed: {}", action.message),
        WorkflowState::Timeout => format!("{description} timeout"),
        _ => description.to_string(),
    };

    Some(format!("{}/{}: {}", index + 1, actions.len(), message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use onboard_tinkerbell::{ObjectMeta, TaskStatus, WorkflowStatus};
    use rstest::rstest;

    fn workflow(state: WorkflowState, actions: Vec<ActionStatus>) -> Workflow {
        let mut wf = Workflow::new(ObjectMeta::new("workflow-abc-prod", "ns"), "hw", "tpl");
        wf.status = Some(WorkflowStatus {
            state,
            global_timeout: 9800,
            tasks: vec![TaskStatus {
                name: "os-installation".to_string(),
                worker_addr: "aa:bb:cc:dd:ee:ff".to_string(),
                actions,
            }],
        });
        wf
    }

    fn action(name: &str, status: WorkflowState) -> ActionStatus {
        ActionStatus::new(name, status)
    }

    #[test]
    fn test_no_workflow() {
        assert_eq!(status_detail(None), "");
    }

    #[test]
    fn test_success_has_no_detail() {
        let wf = workflow(
            WorkflowState::Success,
            vec![action(REBOOT, WorkflowState::Failed).with_message("ignored")],
        );
        assert_eq!(status_detail(Some(&wf)), "");
    }

    #[test]
    fn test_incomplete_trees() {
        let mut wf = Workflow::new(ObjectMeta::new("w", "ns"), "hw", "tpl");
        assert_eq!(status_detail(Some(&wf)), "");

        wf.status = Some(WorkflowStatus::default());
        assert_eq!(status_detail(Some(&wf)), "");

        let wf = workflow(WorkflowState::Running, vec![]);
        assert_eq!(status_detail(Some(&wf)), "");

        let wf = workflow(
            WorkflowState::Running,
            vec![
                action(SECURE_BOOT_FLAG_READ, WorkflowState::Success),
                action("", WorkflowState::Running),
            ],
        );
        assert_eq!(status_detail(Some(&wf)), "");
    }

    #[test]
    fn test_single_successful_action() {
        let wf = workflow(
            WorkflowState::Running,
            vec![action(REBOOT, WorkflowState::Success)],
        );
        assert_eq!(status_detail(Some(&wf)), "1/1: Rebooting");
    }

    #[test]
    fn test_failure_with_message() {
        let wf = workflow(
            WorkflowState::Failed,
            vec![
                action(SECURE_BOOT_FLAG_READ, WorkflowState::Success),
                action(STREAM_OS_IMAGE, WorkflowState::Failed).with_message("disk full"),
            ],
        );
        assert_eq!(
            status_detail(Some(&wf)),
            "2/2: Streaming OS image failed: disk full"
        );
    }

    #[rstest]
    #[case(WorkflowState::Failed, "2/3: Erasing data from all non-removable disks failed")]
    #[case(WorkflowState::Timeout, "2/3: Erasing data from all non-removable disks timeout")]
    #[case(WorkflowState::Running, "2/3: Erasing data from all non-removable disks")]
    #[case(WorkflowState::Pending, "2/3: Erasing data from all non-removable disks")]
    #[case(WorkflowState::Unset, "2/3: Erasing data from all non-removable disks")]
    fn test_stopping_action_state(#[case] state: WorkflowState, #[case] expected: &str) {
        let wf = workflow(
            WorkflowState::Running,
            vec![
                action(SECURE_BOOT_FLAG_READ, WorkflowState::Success),
                action(ERASE_NON_REMOVABLE_DISK, state),
                action(REBOOT, WorkflowState::Pending),
            ],
        );
        assert_eq!(status_detail(Some(&wf)), expected);
    }

    #[test]
    fn test_unknown_action_uses_raw_name() {
        let wf = workflow(
            WorkflowState::Running,
            vec![action("custom-step", WorkflowState::Running)],
        );
        assert_eq!(status_detail(Some(&wf)), "1/1: custom-step");
    }

    #[test]
    fn test_only_first_task_counts() {
        let mut wf = workflow(
            WorkflowState::Running,
            vec![action(REBOOT, WorkflowState::Running)],
        );
        if let Some(status) = wf.status.as_mut() {
            status.tasks.push(TaskStatus {
                name: "other".to_string(),
                worker_addr: String::new(),
                actions: vec![action("", WorkflowState::Running)],
            });
        }
        assert_eq!(status_detail(Some(&wf)), "1/1: Rebooting");
    }

    #[test]
    fn test_deterministic() {
        let wf = workflow(
            WorkflowState::Timeout,
            vec![
                action(SECURE_BOOT_FLAG_READ, WorkflowState::Success),
                action(KERNEL_UPGRADE, WorkflowState::Timeout),
            ],
        );
        let progress = WorkflowProgress::of(&wf);
        assert_eq!(progress, WorkflowProgress::of(&wf));
        assert_eq!(progress.state, WorkflowState::Timeout);
        assert_eq!(progress.detail, "2/2: Upgrading kernel timeout");
    }
}
