//! Backbone for immutable, image-based operating systems.

use onboard_tinkerbell::Action;

use super::actions::*;

const CLOUD_INIT_PATH: &str = "/etc/cloud/cloud.cfg.d/installer.cfg";

pub fn backbone(b: &ActionBuilder<'_>) -> Vec<Action> {
    let profile = b.profile();

    let mut actions = vec![
        b.secure_boot_flag_read(),
        b.erase_non_removable_disk(),
        b.stream_image(STREAM_OS_IMAGE),
        b.cexec(
            PARTITION_DISK,
            "growpart $DEST_DISK 1 && resize2fs $DEST_DISK$ID",
            TIMEOUT_AVG,
        ),
        b.write_hostname(),
        b.env_proxy(),
    ];

    actions.extend(b.credentials());

    actions.extend([
        b.create_user(),
        b.write_file(
            INSTALL_CLOUD_INIT,
            CLOUD_INIT_PATH,
            &profile.cloud_init,
            "0644",
            TIMEOUT_MIN,
        ),
        b.write_file(
            CLOUD_INIT_DS_IDENTITY,
            "/etc/cloud/ds-identify.cfg",
            "datasource: NoCloud\n",
            "0600",
            TIMEOUT_MIN,
        ),
        b.cexec(
            SELINUX_RELABEL,
            "setfiles -m -v /etc/selinux/targeted/contexts/files/file_contexts /",
            TIMEOUT_LONG,
        ),
        b.fde_encryption(),
        b.efibootset(),
        b.reboot(),
    ]);

    actions
}
