//! Machine lifecycle controller.
//!
//! Reconciles a declared machine with what the hypervisor reports. Every
//! decision is taken on a fresh state query, every step runs to completion
//! before the next one starts, and nothing is rolled back: artifacts left
//! by a failed `up` are picked up again by the next `up` or `destroy`.

use lvlab_core::config::{Environment, ImageDecl};
use lvlab_core::error::{LabError, Result};
use lvlab_core::image::CloudImage;
use lvlab_core::machine::MachineSpec;
use serde::Serialize;

use crate::cloudinit::{BootConfigBundle, BootDocuments};
use crate::disk::VirtualDisk;
use crate::hypervisor::{DomainState, DomainStatus, Hypervisor};
use crate::install::InstallRequest;
use crate::process::CommandRunner;

/// Result of `up`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpOutcome {
    /// Nothing to do
    AlreadyRunning,
    /// A stopped domain was powered on; carries the state queried afterwards
    Started(DomainStatus),
    /// The domain is mid-transition and was left alone
    Transitional(DomainStatus),
    /// The domain was created
    Deployed,
}

/// Result of `down`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownOutcome {
    /// Graceful shutdown requested; completion is not awaited
    ShutdownRequested,
    /// The domain is in a state shutdown does not apply to
    NotRunning(DomainStatus),
    NotDeployed,
}

/// Result of `destroy`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DestroyOutcome {
    /// The hypervisor has no such domain; nothing was touched
    NotDeployed,
    Destroyed {
        /// Snapshots removed before undefining
        snapshots_deleted: usize,
        /// Whether the working directory itself was removed
        work_dir_removed: bool,
    },
}

/// Existence and state of one declared machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MachineStatus {
    pub vm_name: String,
    pub hostname: String,
    pub deployed: bool,
    pub state: Option<DomainState>,
    pub reason: Option<String>,
}

/// Drives machine lifecycles for one environment against one hypervisor.
pub struct MachineController<'a> {
    env: &'a Environment,
    images: &'a [ImageDecl],
    hypervisor: &'a dyn Hypervisor,
    runner: &'a dyn CommandRunner,
    hosts_commands: Vec<String>,
}

impl<'a> MachineController<'a> {
    pub fn new(
        env: &'a Environment,
        images: &'a [ImageDecl],
        hypervisor: &'a dyn Hypervisor,
        runner: &'a dyn CommandRunner,
    ) -> Self {
        Self {
            env,
            images,
            hypervisor,
            runner,
            hosts_commands: Vec::new(),
        }
    }

    /// Guest commands run before each machine's own `runcmd`.
    pub fn with_hosts_commands(mut self, commands: Vec<String>) -> Self {
        self.hosts_commands = commands;
        self
    }

    /// Ensure the machine is running, creating it when absent.
    pub async fn up(&self, machine: &MachineSpec) -> Result<UpOutcome> {
        let name = machine.vm_name.as_str();

        let Some(status) = self.hypervisor.lookup(name).await? else {
            tracing::info!(vm = name, "Machine not deployed, creating");
            self.deploy(machine).await?;
            return Ok(UpOutcome::Deployed);
        };

        match status.state {
            DomainState::Running => {
                tracing::info!(vm = name, "Machine already running");
                Ok(UpOutcome::AlreadyRunning)
            }
            DomainState::ShutOff | DomainState::Crashed => {
                tracing::info!(vm = name, state = %status.state, "Powering on");
                self.hypervisor.start(name).await?;
                let after = self.require(name).await?;
                Ok(UpOutcome::Started(after))
            }
            _ => {
                tracing::info!(vm = name, state = %status, "Machine is transitioning, leaving it alone");
                Ok(UpOutcome::Transitional(status))
            }
        }
    }

    /// Create path: disks, boot documents, boot medium, then installation.
    async fn deploy(&self, machine: &MachineSpec) -> Result<()> {
        let image = self.image_for(machine)?;
        let backing = image.require_trusted()?;

        let disks = VirtualDisk::for_machine(machine);
        let mut failures = Vec::new();
        for disk in &disks {
            // The first disk boots from the image; the rest start blank
            let disk_backing = (disk.index == 0).then_some(backing);
            if let Err(e) = disk.create(self.runner, disk_backing).await {
                tracing::error!(vm = %machine.vm_name, disk = %disk.name, error = %e, "Disk creation failed");
                failures.push(e);
            }
        }
        if !failures.is_empty() {
            return Err(LabError::DisksFailed {
                vm_name: machine.vm_name.clone(),
                total: disks.len(),
                failures,
            });
        }

        let bundle = BootConfigBundle::new(&machine.work_dir);
        let docs = BootDocuments::render(machine, image.network_version, &self.hosts_commands)?;
        bundle.stage(&docs).await?;
        bundle.package(self.runner).await?;

        let request = InstallRequest::new(
            self.hypervisor.uri(),
            machine,
            disks.iter().map(|d| d.path.clone()).collect(),
            bundle.iso.clone(),
            &image.os_variant,
            self.env.mounts(),
        );
        request.run(self.runner).await?;

        tracing::info!(vm = %machine.vm_name, "Machine deployed");
        Ok(())
    }

    fn image_for(&self, machine: &MachineSpec) -> Result<CloudImage> {
        let decl = self
            .images
            .iter()
            .find(|img| img.name == machine.os)
            .ok_or_else(|| {
                LabError::ConfigError(format!(
                    "Machine {} uses image {} which is not declared",
                    machine.vm_name, machine.os
                ))
            })?;
        CloudImage::resolve(decl, self.env)
    }

    /// Request a graceful shutdown.
    pub async fn down(&self, machine: &MachineSpec) -> Result<DownOutcome> {
        let name = machine.vm_name.as_str();

        let Some(status) = self.hypervisor.lookup(name).await? else {
            return Ok(DownOutcome::NotDeployed);
        };

        if !status.state.accepts_shutdown() {
            tracing::info!(vm = name, state = %status, "Not shutting down");
            return Ok(DownOutcome::NotRunning(status));
        }

        self.hypervisor.shutdown(name).await?;
        Ok(DownOutcome::ShutdownRequested)
    }

    /// Force off, drop snapshots, undefine, then remove local artifacts.
    pub async fn destroy(&self, machine: &MachineSpec) -> Result<DestroyOutcome> {
        let name = machine.vm_name.as_str();

        let Some(status) = self.hypervisor.lookup(name).await? else {
            tracing::info!(vm = name, "Machine not deployed");
            return Ok(DestroyOutcome::NotDeployed);
        };

        if status.state.is_active() {
            self.hypervisor.destroy(name).await?;
            let after = self.require(name).await?;
            if after.state.is_active() {
                return Err(LabError::HypervisorError {
                    operation: "destroy".to_string(),
                    domain: name.to_string(),
                    message: format!("domain is still {after} after forced stop"),
                });
            }
        }

        let snapshots = self.hypervisor.snapshot_list(name).await?;
        let mut failed = Vec::new();
        for snapshot in &snapshots {
            if let Err(e) = self.hypervisor.snapshot_delete(name, snapshot).await {
                tracing::error!(vm = name, snapshot = %snapshot, error = %e, "Snapshot deletion failed");
                failed.push(snapshot.clone());
            }
        }
        if !failed.is_empty() {
            return Err(LabError::HypervisorError {
                operation: "snapshot-delete".to_string(),
                domain: name.to_string(),
                message: format!("could not delete snapshot(s) {}", failed.join(", ")),
            });
        }

        self.hypervisor.undefine(name).await?;

        for disk in VirtualDisk::for_machine(machine) {
            disk.delete().await;
        }
        BootConfigBundle::new(&machine.work_dir).delete().await;

        let work_dir_removed = match tokio::fs::remove_dir(&machine.work_dir).await {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
            Err(e) => {
                tracing::warn!(
                    vm = name,
                    dir = %machine.work_dir.display(),
                    error = %e,
                    "Working directory not removed"
                );
                false
            }
        };

        tracing::info!(vm = name, "Machine destroyed");
        Ok(DestroyOutcome::Destroyed {
            snapshots_deleted: snapshots.len(),
            work_dir_removed,
        })
    }

    /// Create a snapshot of a deployed machine.
    pub async fn snapshot_create(
        &self,
        machine: &MachineSpec,
        snapshot: &str,
        description: Option<&str>,
    ) -> Result<()> {
        let name = machine.vm_name.as_str();
        self.require(name).await?;

        let description = match description {
            Some(d) => d.to_string(),
            None => default_snapshot_description(name),
        };
        self.hypervisor
            .snapshot_create(name, snapshot, &description)
            .await
    }

    /// Snapshots of a deployed machine.
    pub async fn snapshot_list(&self, machine: &MachineSpec) -> Result<Vec<String>> {
        let name = machine.vm_name.as_str();
        self.require(name).await?;
        self.hypervisor.snapshot_list(name).await
    }

    /// Delete a known snapshot of a deployed machine.
    pub async fn snapshot_delete(&self, machine: &MachineSpec, snapshot: &str) -> Result<()> {
        let name = machine.vm_name.as_str();
        self.require(name).await?;

        let known = self.hypervisor.snapshot_list(name).await?;
        if !known.iter().any(|s| s == snapshot) {
            return Err(LabError::SnapshotNotFound {
                domain: name.to_string(),
                snapshot: snapshot.to_string(),
            });
        }
        self.hypervisor.snapshot_delete(name, snapshot).await
    }

    /// Existence and state of every given machine.
    pub async fn status(&self, machines: &[MachineSpec]) -> Result<Vec<MachineStatus>> {
        let mut statuses = Vec::with_capacity(machines.len());
        for machine in machines {
            let status = self.hypervisor.lookup(&machine.vm_name).await?;
            statuses.push(MachineStatus {
                vm_name: machine.vm_name.clone(),
                hostname: machine.hostname.clone(),
                deployed: status.is_some(),
                state: status.as_ref().map(|s| s.state),
                reason: status.map(|s| s.reason),
            });
        }
        Ok(statuses)
    }

    async fn require(&self, name: &str) -> Result<DomainStatus> {
        self.hypervisor
            .lookup(name)
            .await?
            .ok_or_else(|| LabError::NotDeployed(name.to_string()))
    }
}

/// Description used when a snapshot is created without one.
pub fn default_snapshot_description(domain: &str) -> String {
    format!(
        "Snapshot of {domain} taken {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    )
}
