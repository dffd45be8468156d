//! Backbone for mutable, package-managed operating systems.

use onboard_tinkerbell::Action;

use super::actions::*;

const GROW_PART_SCRIPT: &str = "#!/bin/bash
growpart $DEST_DISK 1
resize2fs $DEST_DISK$ID
touch /usr/local/bin/.grow_part_done
";

const INSTALL_SERVICE_UNIT: &str = "[Unit]
Description=Profile and node agents Package Installation
After=update-netplan.service
ConditionPathExists=!/home/postinstall/Setup/.base_pkg_install_done

[Service]
ExecStartPre=/bin/sleep 20
WorkingDirectory=/home/postinstall/Setup
ExecStart=/home/postinstall/Setup/installer.sh
Restart=always

[Install]
WantedBy=multi-user.target
";

const NETPLAN_DHCP: &str = "network:
  version: 2
  renderer: networkd
  ethernets:
    id0:
      match:
        name: en*
      dhcp4: yes
";

const GROW_PART_SERVICE_UNIT: &str = "[Unit]
Description=disk size grow installer
After=network.target
ConditionPathExists=!/usr/local/bin/.grow_part_done

[Service]
ExecStartPre=/bin/sleep 30
WorkingDirectory=/usr/local/bin
ExecStart=/usr/local/bin/grow_part.sh

[Install]
WantedBy=multi-user.target
";

const NETPLAN_SERVICE_UNIT: &str = "[Unit]
Description=update the netplan to make the ip static
After=network.target
ConditionPathExists=!/home/postinstall/Setup/.netplan_update_done

[Service]
ExecStartPre=/bin/sleep 60
WorkingDirectory=/home/postinstall/Setup
ExecStart=/home/postinstall/Setup/update_netplan_config.sh

[Install]
WantedBy=multi-user.target
";

/// Grow-partition service is disabled until disk encryption is ruled out.
pub const GROW_PART_DISABLED: &str = "systemctl disable install-grow-part.service";
pub const GROW_PART_ENABLED: &str = "systemctl enable install-grow-part.service";

fn static_ip_script(ip: &str, name_servers: &[String]) -> String {
    format!(
        r#"#!/bin/bash
interface=$(ip route show default | awk '/default/ {{print $5}}')
gateway=$(ip route show default | awk '/default/ {{print $3}}')
sub_net=$(ip addr show | grep $interface | grep -E 'inet ./*' | awk '{{print $2}}' | awk -F'/' '{{print $2}}')
config_yaml="
network:
  version: 2
  renderer: networkd
  ethernets:
    id0:
      match:
        name: en*
      dhcp4: no
      addresses: [ {ip}/$sub_net ]
      gateway4: $gateway
      nameservers:
        addresses: [{dns}]
"
echo "$config_yaml" | tee /etc/netplan/config.yaml
ln -sf /run/systemd/resolve/stub-resolv.conf /etc/resolv.conf
touch .netplan_update_done
netplan apply
"#,
        dns = name_servers.join(", "),
    )
}

/// The full ordered backbone, before conditional mutation.
pub fn backbone(b: &ActionBuilder<'_>) -> Vec<Action> {
    let profile = b.profile();
    let proxies = &profile.proxies;

    let mut actions = vec![
        b.secure_boot_flag_read(),
        b.erase_non_removable_disk(),
        b.stream_image(STREAM_UBUNTU_IMAGE),
        b.env_proxy(),
        b.write_file(
            ADD_APT_PROXY,
            "/etc/apt/apt.conf",
            format!(
                "Acquire::http::Proxy \"{}\";\nAcquire::https::Proxy \"{}\";\n",
                proxies.http_proxy, proxies.https_proxy
            ),
            "0755",
            TIMEOUT_MIN,
        ),
        b.write_hostname(),
        b.write_file(
            WRITE_ETC_HOSTS,
            "/etc/hosts",
            format!("127.0.0.1 localhost {}\n", profile.hostname),
            "0755",
            TIMEOUT_MIN,
        ),
        b.write_file(
            ADD_DNS_NAMESPACE,
            "/etc/systemd/resolved.conf",
            format!("[Resolve]\nDNS={}\n", profile.name_servers.join(" ")),
            "0755",
            TIMEOUT_MIN,
        ),
        b.write_file(
            GROW_PARTITION_INSTALL_SCRIPT,
            "/usr/local/bin/grow_part.sh",
            GROW_PART_SCRIPT,
            "0755",
            TIMEOUT_MIN,
        ),
    ];

    actions.extend(b.credentials());

    actions.extend([
        b.create_user(),
        b.write_file(
            WRITE_INSTALL_SCRIPT,
            "/home/postinstall/Setup/installer.sh",
            &profile.installer_script,
            "0755",
            TIMEOUT_AVG,
        ),
        b.write_file(
            INSTALL_SCRIPT_SERVICE,
            "/etc/systemd/system/install-profile-pkgs-and-node-agent.service",
            INSTALL_SERVICE_UNIT,
            "0644",
            TIMEOUT_MIN,
        ),
        b.cexec(
            INSTALL_SCRIPT_ENABLE,
            "systemctl enable install-profile-pkgs-and-node-agent.service",
            TIMEOUT_AVG,
        ),
        b.write_file(
            WRITE_NETPLAN,
            "/etc/netplan/config.yaml",
            NETPLAN_DHCP,
            "0644",
            TIMEOUT_MIN,
        ),
        b.write_file(
            NETPLAN_STATIC_IP,
            "/home/postinstall/Setup/update_netplan_config.sh",
            static_ip_script(&profile.ip, &profile.name_servers),
            "0755",
            TIMEOUT_AVG,
        ),
        b.write_file(
            GROW_PARTITION_SERVICE,
            "/etc/systemd/system/install-grow-part.service",
            GROW_PART_SERVICE_UNIT,
            "0644",
            TIMEOUT_AVG,
        ),
        b.cexec(GROW_PARTITION_SERVICE_ENABLE, GROW_PART_DISABLED, TIMEOUT_AVG),
        b.write_file(
            NETPLAN_SERVICE,
            "/etc/systemd/system/update-netplan.service",
            NETPLAN_SERVICE_UNIT,
            "0644",
            TIMEOUT_AVG,
        ),
        b.cexec(
            NETPLAN_SERVICE_ENABLE,
            "systemctl enable update-netplan.service",
            TIMEOUT_AVG,
        ),
        Action::new(KERNEL_UPGRADE, b.image(Tool::KernelUpgrade), TIMEOUT_LONG)
            .env("FS_TYPE", "ext4")
            .env("HTTP_PROXY", &proxies.http_proxy)
            .env("HTTPS_PROXY", &proxies.https_proxy)
            .env("NO_PROXY", &proxies.no_proxy),
        b.fde_encryption(),
        b.efibootset(),
        b.reboot(),
    ]);

    actions
}
