//! Action names and builders shared by both backbones.

use onboard_tinkerbell::Action;

use super::ActionImages;
use crate::profile::DeviceProfile;

// =============================================================================
// Action names
// =============================================================================

pub const SECURE_BOOT_FLAG_READ: &str = "secure-boot-status-flag-read";
pub const ERASE_NON_REMOVABLE_DISK: &str = "erase-non-removable-disk";
pub const STREAM_UBUNTU_IMAGE: &str = "stream-ubuntu-image";
pub const STREAM_OS_IMAGE: &str = "stream-os-image";
pub const PARTITION_DISK: &str = "partition-disk";
pub const ADD_ENV_PROXY: &str = "add-env-proxy";
pub const ADD_APT_PROXY: &str = "add-apt-proxy";
pub const WRITE_HOSTNAME: &str = "write-hostname";
pub const WRITE_ETC_HOSTS: &str = "Write-Hosts-etc";
pub const ADD_DNS_NAMESPACE: &str = "add-dns-namespace";
pub const GROW_PARTITION_INSTALL_SCRIPT: &str = "grow-partition-install-script";
pub const CREATE_SECRETS_DIRECTORY: &str = "create-ensp-node-directory";
pub const WRITE_CLIENT_ID: &str = "write-client-id";
pub const WRITE_CLIENT_SECRET: &str = "write-client-secret";
pub const CREATE_USER: &str = "create-user";
pub const WRITE_INSTALL_SCRIPT: &str = "write-install-script";
pub const INSTALL_SCRIPT_SERVICE: &str = "service-script-for-profile-pkg-and-node-agents-install";
pub const INSTALL_SCRIPT_ENABLE: &str = "enable-service-script-for-profile-pkg-node-agents";
pub const WRITE_NETPLAN: &str = "write-netplan";
pub const NETPLAN_STATIC_IP: &str = "update-netplan-to-make-ip-static";
pub const GROW_PARTITION_SERVICE: &str = "service-script-for-grow-partion-installer";
pub const GROW_PARTITION_SERVICE_ENABLE: &str = "enable-grow-partinstall-service-script";
pub const NETPLAN_SERVICE: &str = "service-script-for-netplan-update";
pub const NETPLAN_SERVICE_ENABLE: &str = "enable-update-netplan.service-script";
pub const KERNEL_UPGRADE: &str = "kernel-upgrade";
pub const INSTALL_CLOUD_INIT: &str = "install-cloud-init";
pub const CLOUD_INIT_DS_IDENTITY: &str = "cloud-init-ds-identity";
pub const SELINUX_RELABEL: &str = "selinux-relabel";
pub const FDE_ENCRYPTION: &str = "fde-encryption";
pub const EFIBOOTSET: &str = "efibootset-for-diskboot";
pub const REBOOT: &str = "reboot";

// =============================================================================
// Timeouts (seconds)
// =============================================================================

pub const TIMEOUT_MAX: u64 = 9800;
pub const TIMEOUT_LONG: u64 = 560;
pub const TIMEOUT_AVG: u64 = 200;
pub const TIMEOUT_MIN: u64 = 90;

// =============================================================================
// Action tools
// =============================================================================

/// Container images implementing the actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    SecureBootFlag,
    EraseDisks,
    WriteFile,
    Cexec,
    Image2Disk,
    Efibootset,
    FdeDmv,
    KernelUpgrade,
}

impl Tool {
    pub fn image_name(&self) -> &'static str {
        match self {
            Self::SecureBootFlag => "securebootflag",
            Self::EraseDisks => "erase_non_removable_disks",
            Self::WriteFile => "writefile",
            Self::Cexec => "cexec",
            Self::Image2Disk => "image2disk",
            Self::Efibootset => "efibootset",
            Self::FdeDmv => "fde_dmv",
            Self::KernelUpgrade => "kernelupgrd",
        }
    }
}

/// Reboot action image. Not versioned with the others.
pub const REBOOT_IMAGE: &str = "public.ecr.aws/l0g8r8j6/tinkerbell/hub/reboot-action:latest";

const SECRETS_DIR: &str = "/etc/intel_edge_node/client-credentials";

/// Builds actions for one profile.
pub struct ActionBuilder<'a> {
    images: &'a ActionImages,
    profile: &'a DeviceProfile,
}

impl<'a> ActionBuilder<'a> {
    pub fn new(images: &'a ActionImages, profile: &'a DeviceProfile) -> Self {
        Self { images, profile }
    }

    pub fn profile(&self) -> &DeviceProfile {
        self.profile
    }

    pub fn image(&self, tool: Tool) -> String {
        self.images
            .image(tool, self.profile.tinker_version.as_deref())
    }

    /// Write a file onto the provisioned root filesystem.
    pub fn write_file(
        &self,
        name: &str,
        dest_path: &str,
        contents: impl Into<String>,
        mode: &str,
        timeout: u64,
    ) -> Action {
        Action::new(name, self.image(Tool::WriteFile), timeout)
            .env("FS_TYPE", "ext4")
            .env("DEST_PATH", dest_path)
            .env("CONTENTS", contents)
            .env("UID", "0")
            .env("GID", "0")
            .env("MODE", mode)
            .env("DIRMODE", "0755")
    }

    /// Run a command chrooted into the provisioned root filesystem.
    pub fn cexec(&self, name: &str, cmd_line: impl Into<String>, timeout: u64) -> Action {
        Action::new(name, self.image(Tool::Cexec), timeout)
            .env("FS_TYPE", "ext4")
            .env("CHROOT", "y")
            .env("DEFAULT_INTERPRETER", "/bin/sh -c")
            .env("CMD_LINE", cmd_line)
    }

    pub fn secure_boot_flag_read(&self) -> Action {
        Action::new(
            SECURE_BOOT_FLAG_READ,
            self.image(Tool::SecureBootFlag),
            TIMEOUT_LONG,
        )
        .env(
            "SECURITY_FEATURE_FLAG",
            self.profile.security_feature.as_str(),
        )
    }

    pub fn erase_non_removable_disk(&self) -> Action {
        Action::new(
            ERASE_NON_REMOVABLE_DISK,
            self.image(Tool::EraseDisks),
            TIMEOUT_LONG,
        )
    }

    pub fn stream_image(&self, name: &str) -> Action {
        let action = Action::new(name, self.image(Tool::Image2Disk), TIMEOUT_MAX)
            .env("IMG_URL", &self.profile.os_image_url)
            .env("COMPRESSED", "true");
        if self.profile.os_image_sha256.is_empty() {
            action
        } else {
            action.env("SHA256", &self.profile.os_image_sha256)
        }
    }

    pub fn env_proxy(&self) -> Action {
        let proxies = &self.profile.proxies;
        self.write_file(
            ADD_ENV_PROXY,
            "/etc/environment",
            format!(
                "http_proxy={}\nhttps_proxy={}\nftp_proxy={}\nno_proxy={}\n\
                 HTTP_PROXY={}\nHTTPS_PROXY={}\nFTP_PROXY={}\nNO_PROXY={}\n",
                proxies.http_proxy,
                proxies.https_proxy,
                proxies.ftp_proxy,
                proxies.no_proxy,
                proxies.http_proxy,
                proxies.https_proxy,
                proxies.ftp_proxy,
                proxies.no_proxy,
            ),
            "0755",
            TIMEOUT_MIN,
        )
    }

    pub fn write_hostname(&self) -> Action {
        self.write_file(
            WRITE_HOSTNAME,
            "/etc/hostname",
            format!("{}\n", self.profile.hostname),
            "0755",
            TIMEOUT_MIN,
        )
    }

    /// Actions writing the node's client credentials. Empty without credentials.
    pub fn credentials(&self) -> Vec<Action> {
        let Some(credentials) = &self.profile.credentials else {
            return Vec::new();
        };
        vec![
            self.cexec(
                CREATE_SECRETS_DIRECTORY,
                format!("mkdir -p {SECRETS_DIR}/"),
                TIMEOUT_MIN,
            ),
            self.write_file(
                WRITE_CLIENT_ID,
                &format!("{SECRETS_DIR}/client_id"),
                &credentials.client_id,
                "0600",
                TIMEOUT_MIN,
            ),
            self.write_file(
                WRITE_CLIENT_SECRET,
                &format!("{SECRETS_DIR}/client_secret"),
                &credentials.client_secret,
                "0600",
                TIMEOUT_MIN,
            ),
        ]
    }

    pub fn create_user(&self) -> Action {
        let cmd_line = match &self.profile.local_user {
            Some(user) => format!(
                "useradd -s /bin/bash -d /home/{user}/ -m -G sudo {user} && \
                 mkdir -p /home/{user}/.ssh && \
                 echo '{key}' >> /home/{user}/.ssh/authorized_keys && \
                 chown -R {user}:{user} /home/{user}/.ssh && \
                 chmod 600 /home/{user}/.ssh/authorized_keys",
                user = user.username,
                key = user.ssh_key,
            ),
            None => "useradd -s /bin/bash -d /home/user/ -m -G sudo user".to_string(),
        };
        self.cexec(CREATE_USER, cmd_line, TIMEOUT_MIN)
    }

    pub fn fde_encryption(&self) -> Action {
        Action::new(FDE_ENCRYPTION, self.image(Tool::FdeDmv), TIMEOUT_LONG)
    }

    pub fn efibootset(&self) -> Action {
        Action::new(EFIBOOTSET, self.image(Tool::Efibootset), TIMEOUT_LONG)
    }

    pub fn reboot(&self) -> Action {
        Action::new(REBOOT, REBOOT_IMAGE, TIMEOUT_MIN).volume("/worker:/worker")
    }
}
