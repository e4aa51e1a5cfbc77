//! Configuration merge model.
//!
//! Turns a raw [`MachineDecl`] into a fully typed [`MachineSpec`] by applying,
//! in increasing precedence: hard-coded constants, environment defaults,
//! per-machine fields, and per-resource (interface/disk) declarations.

use serde::Serialize;
use std::path::PathBuf;

use crate::config::{CloudInitDecl, DiskDecl, Environment, InterfaceDecl, MachineDecl};
use crate::error::{LabError, Result};

/// Image used when neither the machine nor the environment names one.
pub const DEFAULT_OS: &str = "fedora40";

/// vCPU count used when neither the machine nor the environment sets one.
pub const DEFAULT_CPUS: u32 = 1;

/// Memory in MiB used when neither the machine nor the environment sets one.
pub const DEFAULT_MEMORY_MIB: u32 = 1024;

/// Disk size used when neither the disk nor its default sets one.
pub const DEFAULT_DISK_SIZE: &str = "15G";

/// Name of the boot disk a machine gets when no disks are declared anywhere.
pub const DEFAULT_DISK_NAME: &str = "root";

/// Network used when an interface does not name one.
pub const DEFAULT_NETWORK: &str = "default";

/// Guest login user when cloud-init does not name one.
pub const DEFAULT_USER: &str = "lab";

/// How an interface obtains its address.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum Addressing {
    Dhcp,
    Static {
        /// Address in CIDR form
        address: String,
        gateway: Option<String>,
        nameservers: Vec<String>,
        search: Vec<String>,
    },
}

/// Resolved network interface.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetworkInterface {
    /// Guest device name
    pub name: String,

    /// libvirt network
    pub network: String,

    pub addressing: Addressing,
}

impl NetworkInterface {
    /// Static IPv4 address without its prefix length, if any.
    pub fn ip4(&self) -> Option<&str> {
        match &self.addressing {
            Addressing::Static { address, .. } => address.split('/').next(),
            Addressing::Dhcp => None,
        }
    }
}

/// Resolved disk.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiskSpec {
    pub name: String,
    pub size: String,
}

/// Resolved cloud-init customization.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CloudInitSpec {
    pub user: String,
    pub pubkey: Option<String>,
    pub timezone: Option<String>,
    pub packages: Vec<String>,
    pub runcmd: Vec<String>,
}

/// Fully resolved machine.
#[derive(Debug, Clone, Serialize)]
pub struct MachineSpec {
    /// Hypervisor-visible domain name; stable for the life of the instance
    pub vm_name: String,

    pub hostname: String,

    pub fqdn: String,

    /// Image name
    pub os: String,

    pub cpus: u32,

    pub memory_mib: u32,

    pub interfaces: Vec<NetworkInterface>,

    pub disks: Vec<DiskSpec>,

    pub cloud_init: CloudInitSpec,

    /// Directory holding disks and boot artifacts
    pub work_dir: PathBuf,
}

impl MachineSpec {
    /// Merge a machine declaration with its environment's defaults.
    pub fn resolve(decl: &MachineDecl, env: &Environment) -> Result<Self> {
        let defaults = &env.defaults;

        let vm_name = decl
            .vm_name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .ok_or_else(|| LabError::ConfigError("Machine declared without vm_name".to_string()))?;

        let hostname = decl.hostname.clone().unwrap_or_else(|| vm_name.clone());

        let fqdn = match (&decl.fqdn, &env.domain) {
            (Some(fqdn), _) => fqdn.clone(),
            (None, Some(domain)) if !domain.is_empty() => format!("{hostname}.{domain}"),
            (None, _) => hostname.clone(),
        };

        let interfaces = decl
            .interfaces
            .iter()
            .enumerate()
            .map(|(index, iface)| resolve_interface(index, &defaults.interfaces.overlay(iface)))
            .collect();

        // Undeclared disks: the default disk list, else a single boot disk
        let disks = if !decl.disks.is_empty() {
            decl.disks
                .iter()
                .map(|disk| resolve_disk(disk, &defaults.disks))
                .collect()
        } else if !defaults.disks.is_empty() {
            defaults
                .disks
                .iter()
                .map(|disk| resolve_disk(disk, &[]))
                .collect()
        } else {
            vec![DiskSpec {
                name: DEFAULT_DISK_NAME.to_string(),
                size: DEFAULT_DISK_SIZE.to_string(),
            }]
        };

        let cloud_init = match &decl.cloud_init {
            Some(declared) => defaults.cloud_init.overlay(declared),
            None => defaults.cloud_init.clone(),
        };

        Ok(Self {
            work_dir: env.work_dir(&vm_name),
            os: decl
                .os
                .clone()
                .or_else(|| defaults.os.clone())
                .unwrap_or_else(|| DEFAULT_OS.to_string()),
            cpus: decl.cpu.or(defaults.cpu).unwrap_or(DEFAULT_CPUS),
            memory_mib: decl.memory.or(defaults.memory).unwrap_or(DEFAULT_MEMORY_MIB),
            interfaces,
            disks,
            cloud_init: resolve_cloud_init(cloud_init),
            vm_name,
            hostname,
            fqdn,
        })
    }

    /// Primary network, attached first.
    pub fn primary_network(&self) -> &str {
        self.interfaces
            .first()
            .map(|iface| iface.network.as_str())
            .unwrap_or(DEFAULT_NETWORK)
    }
}

fn resolve_interface(index: usize, merged: &InterfaceDecl) -> NetworkInterface {
    let addressing = match &merged.ip4 {
        Some(address) => {
            let nameservers = merged.nameservers.clone().unwrap_or_default();
            Addressing::Static {
                address: address.clone(),
                gateway: merged.ip4gw.clone(),
                nameservers: nameservers.addresses,
                search: nameservers.search,
            }
        }
        None => Addressing::Dhcp,
    };

    NetworkInterface {
        name: merged.name.clone().unwrap_or_else(|| format!("eth{index}")),
        network: merged
            .network
            .clone()
            .unwrap_or_else(|| DEFAULT_NETWORK.to_string()),
        addressing,
    }
}

fn resolve_disk(declared: &DiskDecl, defaults: &[DiskDecl]) -> DiskSpec {
    let default_size = defaults
        .iter()
        .find(|d| d.name == declared.name)
        .and_then(|d| d.size.clone());

    DiskSpec {
        name: declared.name.clone(),
        size: declared
            .size
            .clone()
            .or(default_size)
            .unwrap_or_else(|| DEFAULT_DISK_SIZE.to_string()),
    }
}

fn resolve_cloud_init(merged: CloudInitDecl) -> CloudInitSpec {
    CloudInitSpec {
        user: merged.user.unwrap_or_else(|| DEFAULT_USER.to_string()),
        pubkey: merged.pubkey,
        timezone: merged.timezone,
        packages: merged.packages.unwrap_or_default(),
        runcmd: merged.runcmd.unwrap_or_default(),
    }
}
