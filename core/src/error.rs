use std::path::PathBuf;

use thiserror::Error;

/// lvlab error types
#[derive(Error, Debug)]
pub enum LabError {
    /// Malformed or missing manifest data
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// The named machine is not declared in the manifest
    #[error("Machine not found in manifest: {0}")]
    MachineNotFound(String),

    /// Hypervisor endpoint could not be opened
    #[error("Failed to connect to hypervisor {uri}: {message}")]
    HypervisorConnectError { uri: String, message: String },

    /// A hypervisor call returned an error
    #[error("Hypervisor {operation} failed for {domain}: {message}")]
    HypervisorError {
        operation: String,
        domain: String,
        message: String,
    },

    /// The machine has no domain registered with the hypervisor
    #[error("Machine {0} is not deployed")]
    NotDeployed(String),

    /// Snapshot name unknown to the hypervisor
    #[error("Snapshot {snapshot} not found for {domain}")]
    SnapshotNotFound { domain: String, snapshot: String },

    /// Single disk failure
    #[error("Disk error: {0}")]
    DiskError(#[from] DiskError),

    /// One or more disks of a machine could not be created
    #[error("Disk creation failed for {vm_name}: {} of {total} disk(s) failed", .failures.len())]
    DisksFailed {
        vm_name: String,
        total: usize,
        failures: Vec<DiskError>,
    },

    /// Boot document could not be written
    #[error("Staging error: {}: {message}", .path.display())]
    StagingError { path: PathBuf, message: String },

    /// External tool failure
    #[error("Process error: {0}")]
    ProcessError(#[from] ProcessError),

    /// Cloud image missing or untrusted
    #[error("Image error: {image}: {message}")]
    ImageError { image: String, message: String },

    /// Download failed
    #[error("Download failed: {url} -> {status_code}: {message}")]
    DownloadError {
        url: String,
        status_code: u16,
        message: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<serde_json::Error> for LabError {
    fn from(err: serde_json::Error) -> Self {
        LabError::SerializationError(err.to_string())
    }
}

impl From<serde_yaml::Error> for LabError {
    fn from(err: serde_yaml::Error) -> Self {
        LabError::SerializationError(err.to_string())
    }
}

/// Virtual disk failures, reported per disk.
#[derive(Error, Debug)]
pub enum DiskError {
    /// Parent directory could not be created; the clone was not attempted
    #[error("Failed to create disk directory {}: {source}", .path.display())]
    PathCreation {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The disk-creation tool exited unsuccessfully
    #[error("Failed to create disk {}: {source}", .path.display())]
    ToolFailed {
        path: PathBuf,
        #[source]
        source: ProcessError,
    },
}

/// External process failures.
#[derive(Error, Debug)]
pub enum ProcessError {
    /// The tool could not be launched at all
    #[error("Failed to launch {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    /// The tool ran and exited non-zero
    #[error("`{tool} {}` exited with code {code}: {}", .args.join(" "), .stderr.trim())]
    NonZeroExit {
        tool: String,
        args: Vec<String>,
        code: i32,
        stderr: String,
    },
}

impl ProcessError {
    /// Name of the tool that failed.
    pub fn tool(&self) -> &str {
        match self {
            ProcessError::Spawn { tool, .. } | ProcessError::NonZeroExit { tool, .. } => tool,
        }
    }
}

/// Result type alias for lvlab operations
pub type Result<T> = std::result::Result<T, LabError>;
