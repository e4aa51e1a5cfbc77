//! Virtual disks: deterministic paths and copy-on-write creation via `qemu-img`.

use std::path::{Path, PathBuf};

use lvlab_core::error::DiskError;
use lvlab_core::machine::MachineSpec;

use crate::process::{args, CommandRunner};

/// Disk image creation tool.
pub const QEMU_IMG: &str = "qemu-img";

/// Path of disk `index` under a machine's working directory.
///
/// With the working directory from [`lvlab_core::Environment::work_dir`] this is
/// `{base}/{environment}/{vm_name}/disk{index}.qcow2`.
pub fn disk_path(work_dir: &Path, index: usize) -> PathBuf {
    work_dir.join(format!("disk{index}.qcow2"))
}

/// A machine disk backed by a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualDisk {
    pub name: String,
    pub index: usize,
    pub size: String,
    pub path: PathBuf,
}

impl VirtualDisk {
    pub fn new(name: &str, index: usize, size: &str, path: PathBuf) -> Self {
        Self {
            name: name.to_string(),
            index,
            size: size.to_string(),
            path,
        }
    }

    /// Disks of a machine, in declaration order, under its working directory.
    pub fn for_machine(machine: &MachineSpec) -> Vec<VirtualDisk> {
        machine
            .disks
            .iter()
            .enumerate()
            .map(|(index, disk)| {
                VirtualDisk::new(
                    &disk.name,
                    index,
                    &disk.size,
                    disk_path(&machine.work_dir, index),
                )
            })
            .collect()
    }

    /// Whether the disk file is present. Size and backing are not checked.
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// `qemu-img` arguments creating this disk.
    pub fn create_args(&self, backing: Option<&Path>) -> Vec<String> {
        let mut argv = args(["create", "-f", "qcow2"]);
        if let Some(backing) = backing {
            argv.extend(args(["-b".to_string(), backing.display().to_string()]));
            argv.extend(args(["-F", "qcow2"]));
        }
        argv.push(self.path.display().to_string());
        argv.push(self.size.clone());
        argv
    }

    /// Create the disk, cloning `backing` copy-on-write when given.
    ///
    /// An existing file is left untouched.
    pub async fn create(
        &self,
        runner: &dyn CommandRunner,
        backing: Option<&Path>,
    ) -> Result<(), DiskError> {
        if self.exists() {
            tracing::info!(disk = %self.path.display(), "Disk already exists");
            return Ok(());
        }

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| DiskError::PathCreation {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        tracing::info!(
            disk = %self.path.display(),
            size = %self.size,
            backing = ?backing.map(|p| p.display().to_string()),
            "Creating disk"
        );

        runner
            .run(QEMU_IMG, &self.create_args(backing))
            .await
            .map_err(|source| DiskError::ToolFailed {
                path: self.path.clone(),
                source,
            })?;

        Ok(())
    }

    /// Remove the disk file if present. Failures are logged only.
    pub async fn delete(&self) {
        if !self.exists() {
            return;
        }
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => tracing::info!(disk = %self.path.display(), "Deleted disk"),
            Err(e) => tracing::warn!(
                disk = %self.path.display(),
                error = %e,
                "Failed to delete disk"
            ),
        }
    }
}
