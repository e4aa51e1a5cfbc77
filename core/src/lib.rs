//! lvlab Core - Manifest Model and Shared Types
//!
//! This crate provides the manifest types, the configuration merge model,
//! image path resolution and the error taxonomy shared by the lvlab runtime
//! and CLI.

pub mod config;
pub mod error;
pub mod hosts;
pub mod image;
pub mod machine;

// Re-export commonly used types
pub use config::{Environment, ImageDecl, MachineDecl, Manifest};
pub use error::{DiskError, LabError, ProcessError, Result};
pub use hosts::HostsEntry;
pub use image::{ChecksumAlgorithm, CloudImage};
pub use machine::MachineSpec;

/// lvlab version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
