//! cloud-init NoCloud boot configuration.
//!
//! Renders `meta-data`, `user-data` and `network-config` for a machine,
//! writes them to its working directory and packs them into `cidata.iso`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use lvlab_core::config::expand_home;
use lvlab_core::error::{LabError, ProcessError, Result};
use lvlab_core::machine::{Addressing, MachineSpec, NetworkInterface};
use serde::Serialize;

use crate::process::{args, CommandRunner};

/// ISO authoring tool used to pack the boot medium.
pub const GENISOIMAGE: &str = "genisoimage";

/// Volume label cloud-init's NoCloud datasource looks for.
pub const CIDATA_VOLUME_ID: &str = "cidata";

/// Sudo rule granted to the guest login user.
const SUDO_RULE: &str = "ALL=(ALL) NOPASSWD:ALL";

const LOGIN_SHELL: &str = "/bin/bash";

const SSH_KEY_TYPES: &[&str] = &["ssh-rsa", "ssh-dss", "ssh-ed25519"];

// ============================================================================
// meta-data
// ============================================================================

#[derive(Debug, Serialize)]
struct MetaData<'a> {
    #[serde(rename = "instance-id")]
    instance_id: &'a str,
    #[serde(rename = "local-hostname")]
    local_hostname: &'a str,
}

/// Render `meta-data`.
pub fn render_meta_data(machine: &MachineSpec) -> Result<String> {
    Ok(serde_yaml::to_string(&MetaData {
        instance_id: &machine.vm_name,
        local_hostname: &machine.hostname,
    })?)
}

// ============================================================================
// user-data
// ============================================================================

#[derive(Debug, Serialize)]
struct UserData<'a> {
    hostname: &'a str,
    fqdn: &'a str,
    users: Vec<GuestUser<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    packages: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    timezone: Option<&'a str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    runcmd: Vec<String>,
}

#[derive(Debug, Serialize)]
struct GuestUser<'a> {
    name: &'a str,
    sudo: &'a str,
    shell: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    ssh_authorized_keys: Vec<String>,
}

/// Render `user-data`.
///
/// `hosts_commands` run before the machine's own `runcmd` entries.
pub fn render_user_data(machine: &MachineSpec, hosts_commands: &[String]) -> Result<String> {
    let cloud_init = &machine.cloud_init;

    let ssh_authorized_keys = match cloud_init.pubkey.as_deref() {
        Some(value) => vec![resolve_pubkey(value)?],
        None => Vec::new(),
    };

    let runcmd = hosts_commands
        .iter()
        .chain(cloud_init.runcmd.iter())
        .cloned()
        .collect();

    let doc = UserData {
        hostname: &machine.hostname,
        fqdn: &machine.fqdn,
        users: vec![GuestUser {
            name: &cloud_init.user,
            sudo: SUDO_RULE,
            shell: LOGIN_SHELL,
            ssh_authorized_keys,
        }],
        packages: cloud_init.packages.clone(),
        timezone: cloud_init.timezone.as_deref(),
        runcmd,
    };

    Ok(format!("#cloud-config\n{}", serde_yaml::to_string(&doc)?))
}

/// Whether `value` looks like an OpenSSH public key line.
pub fn is_ssh_public_key(value: &str) -> bool {
    let mut parts = value.split_whitespace();
    let (Some(kind), Some(body)) = (parts.next(), parts.next()) else {
        return false;
    };
    // At most one trailing comment word
    if parts.count() > 1 {
        return false;
    }
    SSH_KEY_TYPES.contains(&kind)
        && body
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '/' | '='))
}

/// Resolve a configured public key: a key line is used as-is, a path is read.
pub fn resolve_pubkey(value: &str) -> Result<String> {
    let value = value.trim();
    if is_ssh_public_key(value) {
        return Ok(value.to_string());
    }

    if !(value.contains('~') || value.contains('/')) {
        return Err(LabError::ConfigError(format!(
            "pubkey is neither an SSH public key nor a path: {value}"
        )));
    }

    let path = expand_home(value);
    let content = std::fs::read_to_string(&path).map_err(|e| {
        LabError::ConfigError(format!("Failed to read pubkey {}: {e}", path.display()))
    })?;
    let content = content.trim();
    if !is_ssh_public_key(content) {
        return Err(LabError::ConfigError(format!(
            "{} does not contain an SSH public key",
            path.display()
        )));
    }

    tracing::debug!(path = %path.display(), "Read SSH public key");
    Ok(content.to_string())
}

// ============================================================================
// network-config
// ============================================================================

#[derive(Debug, Serialize)]
struct NetworkConfigV1 {
    version: u8,
    config: Vec<PhysicalInterfaceV1>,
}

#[derive(Debug, Serialize)]
struct PhysicalInterfaceV1 {
    #[serde(rename = "type")]
    kind: &'static str,
    name: String,
    subnets: Vec<SubnetV1>,
}

#[derive(Debug, Serialize)]
struct SubnetV1 {
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    gateway: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    dns_nameservers: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    dns_search: Vec<String>,
}

#[derive(Debug, Serialize)]
struct NetworkConfigV2 {
    version: u8,
    ethernets: BTreeMap<String, EthernetV2>,
}

#[derive(Debug, Serialize)]
struct EthernetV2 {
    dhcp4: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    addresses: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    routes: Vec<RouteV2>,
    #[serde(skip_serializing_if = "Option::is_none")]
    nameservers: Option<NameserversV2>,
}

#[derive(Debug, Serialize)]
struct RouteV2 {
    to: &'static str,
    via: String,
}

#[derive(Debug, Serialize)]
struct NameserversV2 {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    addresses: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    search: Vec<String>,
}

fn subnet_v1(iface: &NetworkInterface) -> SubnetV1 {
    match &iface.addressing {
        Addressing::Dhcp => SubnetV1 {
            kind: "dhcp",
            address: None,
            gateway: None,
            dns_nameservers: Vec::new(),
            dns_search: Vec::new(),
        },
        Addressing::Static {
            address,
            gateway,
            nameservers,
            search,
        } => SubnetV1 {
            kind: "static",
            address: Some(address.clone()),
            gateway: gateway.clone(),
            dns_nameservers: nameservers.clone(),
            dns_search: search.clone(),
        },
    }
}

fn ethernet_v2(iface: &NetworkInterface) -> EthernetV2 {
    match &iface.addressing {
        Addressing::Dhcp => EthernetV2 {
            dhcp4: true,
            addresses: Vec::new(),
            routes: Vec::new(),
            nameservers: None,
        },
        Addressing::Static {
            address,
            gateway,
            nameservers,
            search,
        } => EthernetV2 {
            dhcp4: false,
            addresses: vec![address.clone()],
            routes: gateway
                .iter()
                .map(|via| RouteV2 {
                    to: "default",
                    via: via.clone(),
                })
                .collect(),
            nameservers: (!nameservers.is_empty() || !search.is_empty()).then(|| {
                NameserversV2 {
                    addresses: nameservers.clone(),
                    search: search.clone(),
                }
            }),
        },
    }
}

/// Render `network-config` in schema version 1 or 2.
pub fn render_network_config(machine: &MachineSpec, version: u8) -> Result<String> {
    let yaml = match version {
        1 => serde_yaml::to_string(&NetworkConfigV1 {
            version,
            config: machine
                .interfaces
                .iter()
                .map(|iface| PhysicalInterfaceV1 {
                    kind: "physical",
                    name: iface.name.clone(),
                    subnets: vec![subnet_v1(iface)],
                })
                .collect(),
        })?,
        2 => serde_yaml::to_string(&NetworkConfigV2 {
            version,
            ethernets: machine
                .interfaces
                .iter()
                .map(|iface| (iface.name.clone(), ethernet_v2(iface)))
                .collect(),
        })?,
        other => {
            return Err(LabError::ConfigError(format!(
                "Unsupported network-config version {other}"
            )))
        }
    };
    Ok(yaml)
}

// ============================================================================
// Bundle
// ============================================================================

/// Rendered boot documents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootDocuments {
    pub meta_data: String,
    pub user_data: String,
    pub network_config: String,
}

impl BootDocuments {
    /// Render all three documents for a machine.
    pub fn render(
        machine: &MachineSpec,
        network_version: u8,
        hosts_commands: &[String],
    ) -> Result<Self> {
        Ok(Self {
            meta_data: render_meta_data(machine)?,
            user_data: render_user_data(machine, hosts_commands)?,
            network_config: render_network_config(machine, network_version)?,
        })
    }
}

/// Boot artifact paths under a machine's working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootConfigBundle {
    pub meta_data: PathBuf,
    pub user_data: PathBuf,
    pub network_config: PathBuf,
    pub iso: PathBuf,
}

impl BootConfigBundle {
    pub fn new(work_dir: &Path) -> Self {
        Self {
            meta_data: work_dir.join("meta-data"),
            user_data: work_dir.join("user-data"),
            network_config: work_dir.join("network-config"),
            iso: work_dir.join("cidata.iso"),
        }
    }

    /// All artifact paths, documents first.
    pub fn paths(&self) -> [&Path; 4] {
        [
            self.meta_data.as_path(),
            self.user_data.as_path(),
            self.network_config.as_path(),
            self.iso.as_path(),
        ]
    }

    /// Write the documents, replacing earlier copies.
    pub async fn stage(&self, docs: &BootDocuments) -> Result<()> {
        let writes = [
            (&self.meta_data, &docs.meta_data),
            (&self.user_data, &docs.user_data),
            (&self.network_config, &docs.network_config),
        ];

        for (path, content) in writes {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| LabError::StagingError {
                        path: parent.to_path_buf(),
                        message: e.to_string(),
                    })?;
            }
            tokio::fs::write(path, content)
                .await
                .map_err(|e| LabError::StagingError {
                    path: path.clone(),
                    message: e.to_string(),
                })?;
            tracing::debug!(path = %path.display(), "Wrote boot document");
        }

        Ok(())
    }

    /// `genisoimage` arguments packing the documents.
    pub fn package_args(&self) -> Vec<String> {
        let mut argv = args(["-output".to_string(), self.iso.display().to_string()]);
        argv.extend(args(["-volid", CIDATA_VOLUME_ID, "-joliet", "-rock"]));
        argv.extend(
            [&self.user_data, &self.meta_data, &self.network_config]
                .iter()
                .map(|p| p.display().to_string()),
        );
        argv
    }

    /// Pack the staged documents into the boot medium.
    pub async fn package(&self, runner: &dyn CommandRunner) -> std::result::Result<(), ProcessError> {
        tracing::info!(iso = %self.iso.display(), "Packaging boot medium");
        runner.run(GENISOIMAGE, &self.package_args()).await?;
        Ok(())
    }

    /// Remove every artifact present. Failures are logged only.
    pub async fn delete(&self) {
        for path in self.paths() {
            if !path.exists() {
                continue;
            }
            if let Err(e) = tokio::fs::remove_file(path).await {
                tracing::warn!(path = %path.display(), error = %e, "Failed to delete boot artifact");
            }
        }
    }
}
