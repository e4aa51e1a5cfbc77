//! Machine installation through `virt-install`.

use std::path::PathBuf;

use lvlab_core::config::MountDecl;
use lvlab_core::error::ProcessError;
use lvlab_core::machine::MachineSpec;

use crate::process::CommandRunner;

/// Domain installation tool.
pub const VIRT_INSTALL: &str = "virt-install";

/// Everything `virt-install` needs to define and boot a domain.
#[derive(Debug, Clone)]
pub struct InstallRequest {
    pub uri: String,
    pub name: String,
    pub memory_mib: u32,
    pub vcpus: u32,
    /// Disk files in attachment order; the first one is the boot disk
    pub disks: Vec<PathBuf>,
    pub boot_medium: PathBuf,
    pub os_variant: String,
    /// Networks in attachment order; the first one is the primary
    pub networks: Vec<String>,
    pub mounts: Vec<MountDecl>,
}

impl InstallRequest {
    /// Build a request for `machine`.
    pub fn new(
        uri: &str,
        machine: &MachineSpec,
        disks: Vec<PathBuf>,
        boot_medium: PathBuf,
        os_variant: &str,
        mounts: &[MountDecl],
    ) -> Self {
        let mut networks: Vec<String> = machine
            .interfaces
            .iter()
            .map(|iface| iface.network.clone())
            .collect();
        if networks.is_empty() {
            networks.push(machine.primary_network().to_string());
        }

        Self {
            uri: uri.to_string(),
            name: machine.vm_name.clone(),
            memory_mib: machine.memory_mib,
            vcpus: machine.cpus,
            disks,
            boot_medium,
            os_variant: os_variant.to_string(),
            networks,
            mounts: mounts.to_vec(),
        }
    }

    /// Argument vector for `virt-install`.
    pub fn args(&self) -> Vec<String> {
        let mut argv = vec![
            "--connect".to_string(),
            self.uri.clone(),
            "--name".to_string(),
            self.name.clone(),
            "--memory".to_string(),
            self.memory_mib.to_string(),
            "--vcpus".to_string(),
            self.vcpus.to_string(),
            "--import".to_string(),
        ];

        for disk in &self.disks {
            argv.push("--disk".to_string());
            argv.push(format!("path={},format=qcow2,bus=virtio", disk.display()));
        }

        argv.push("--disk".to_string());
        argv.push(format!("path={},device=cdrom", self.boot_medium.display()));

        argv.push("--os-variant".to_string());
        argv.push(self.os_variant.clone());

        for network in &self.networks {
            argv.push("--network".to_string());
            argv.push(format!("network={network},model=virtio"));
        }

        argv.push("--graphics".to_string());
        argv.push("vnc,listen=0.0.0.0".to_string());
        argv.push("--noautoconsole".to_string());

        for mount in &self.mounts {
            let mut spec = format!(
                "source={},target={},accessmode=passthrough",
                mount.source, mount.target
            );
            if mount.readonly {
                spec.push_str(",readonly=on");
            }
            argv.push("--filesystem".to_string());
            argv.push(spec);
        }

        argv
    }

    /// Run `virt-install`. Success is its exit status alone.
    pub async fn run(&self, runner: &dyn CommandRunner) -> Result<(), ProcessError> {
        tracing::info!(
            domain = %self.name,
            memory_mib = self.memory_mib,
            vcpus = self.vcpus,
            os_variant = %self.os_variant,
            "Installing domain"
        );
        runner.run(VIRT_INSTALL, &self.args()).await?;
        Ok(())
    }
}
