//! lvlab runtime: the machine lifecycle engine.
//!
//! Provides the process adapter, disk manager, boot configuration staging,
//! image acquisition, the hypervisor session, and the lifecycle controller
//! tying them together.

#![allow(clippy::result_large_err)]

pub mod cloudinit;
pub mod controller;
pub mod disk;
pub mod hypervisor;
pub mod image;
pub mod install;
pub mod process;

#[cfg(test)]
mod testing;

// Re-export common types
pub use cloudinit::{BootConfigBundle, BootDocuments};
pub use controller::{DestroyOutcome, DownOutcome, MachineController, MachineStatus, UpOutcome};
pub use disk::VirtualDisk;
pub use hypervisor::{DomainState, DomainStatus, Hypervisor, VirshSession};
pub use image::{AcquireReport, ImageAcquirer};
pub use install::InstallRequest;
pub use process::{CommandOutput, CommandRunner, SystemRunner};

/// lvlab runtime version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
