//! lvlab CLI - lab virtual machines on libvirt from a YAML manifest.

pub mod commands;
pub mod output;
