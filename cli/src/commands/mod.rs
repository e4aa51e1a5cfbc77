//! CLI command definitions and dispatch.

mod capabilities;
mod destroy;
mod down;
mod hosts;
mod init;
mod snapshot;
mod status;
mod up;
mod version;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use lvlab_core::config::{Environment, Manifest, DEFAULT_MANIFEST};
use lvlab_core::error::Result;
use lvlab_core::hosts::{hosts_commands, hosts_entries};
use lvlab_core::machine::MachineSpec;
use lvlab_runtime::{MachineController, SystemRunner, VirshSession};

/// lvlab - lab virtual machines on libvirt from a YAML manifest.
#[derive(Parser)]
#[command(name = "lvlab", version, about)]
pub struct Cli {
    /// Path to the lab manifest
    #[arg(
        short = 'f',
        long,
        global = true,
        env = "LVLAB_MANIFEST",
        default_value = DEFAULT_MANIFEST
    )]
    pub manifest: PathBuf,

    /// Hypervisor URI, overriding the manifest's libvirt_uri
    #[arg(short = 'c', long, global = true)]
    pub connect: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Command {
    /// Download and verify the declared cloud images
    Init(init::InitArgs),
    /// Create or start a machine
    Up(up::UpArgs),
    /// Gracefully shut down a machine
    Down(down::DownArgs),
    /// Remove a machine, its snapshots and its disks
    Destroy(destroy::DestroyArgs),
    /// Show the state of every declared machine
    Status(status::StatusArgs),
    /// Manage machine snapshots
    Snapshot(snapshot::SnapshotArgs),
    /// Print an /etc/hosts block for the environment
    Hosts(hosts::HostsArgs),
    /// Show hypervisor host capabilities
    Capabilities(capabilities::CapabilitiesArgs),
    /// Show version information
    Version(version::VersionArgs),
}

/// Loaded manifest and its resolved environment.
pub(crate) struct Lab {
    pub manifest: Manifest,
    pub env: Environment,
    runner: Arc<SystemRunner>,
}

impl Lab {
    /// Load the manifest at `path`, applying a URI override.
    pub fn load(path: &Path, connect: Option<&str>) -> Result<Self> {
        let manifest = Manifest::load(path)?;
        let mut env = manifest.environment()?;
        if let Some(uri) = connect {
            env.uri = uri.to_string();
        }
        tracing::debug!(environment = %env.name, uri = %env.uri, "Loaded manifest");

        Ok(Self {
            manifest,
            env,
            runner: Arc::new(SystemRunner),
        })
    }

    /// Every declared machine, resolved.
    pub fn machines(&self) -> Result<Vec<MachineSpec>> {
        self.manifest
            .machines()
            .iter()
            .map(|decl| MachineSpec::resolve(decl, &self.env))
            .collect()
    }

    /// One declared machine, by vm name or hostname.
    pub fn machine(&self, name: &str) -> Result<MachineSpec> {
        MachineSpec::resolve(self.manifest.find_machine(name)?, &self.env)
    }

    pub fn runner(&self) -> &SystemRunner {
        &self.runner
    }

    /// Open a session to the environment's hypervisor.
    pub async fn connect(&self) -> Result<VirshSession> {
        VirshSession::connect(&self.env.uri, self.runner.clone()).await
    }

    /// Controller for this environment, seeding every guest's hosts file.
    pub fn controller<'a>(&'a self, session: &'a VirshSession) -> Result<MachineController<'a>> {
        let entries = hosts_entries(&self.machines()?);
        Ok(
            MachineController::new(&self.env, &self.manifest.images, session, self.runner())
                .with_hosts_commands(hosts_commands(&entries)),
        )
    }
}

/// Dispatch a parsed CLI to the appropriate command handler.
pub async fn dispatch(cli: Cli) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let load = || Lab::load(&cli.manifest, cli.connect.as_deref());

    match cli.command {
        Command::Init(args) => init::execute(args, &load()?).await,
        Command::Up(args) => up::execute(args, &load()?).await,
        Command::Down(args) => down::execute(args, &load()?).await,
        Command::Destroy(args) => destroy::execute(args, &load()?).await,
        Command::Status(args) => status::execute(args, &load()?).await,
        Command::Snapshot(args) => snapshot::execute(args, &load()?).await,
        Command::Hosts(args) => hosts::execute(args, &load()?).await,
        Command::Capabilities(args) => capabilities::execute(args, &load()?).await,
        Command::Version(args) => version::execute(args).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_manifest_defaults_to_lvlab_yml() {
        let cli = Cli::try_parse_from(["lvlab", "status"]).unwrap();
        assert_eq!(cli.manifest, PathBuf::from("Lvlab.yml"));
        assert!(cli.connect.is_none());
    }

    #[test]
    fn test_global_options_after_subcommand() {
        let cli = Cli::try_parse_from([
            "lvlab",
            "up",
            "web01",
            "-f",
            "lab/Lvlab.yml",
            "--connect",
            "qemu+ssh://host/system",
        ])
        .unwrap();
        assert_eq!(cli.manifest, PathBuf::from("lab/Lvlab.yml"));
        assert_eq!(cli.connect.as_deref(), Some("qemu+ssh://host/system"));
        assert!(matches!(cli.command, Command::Up(_)));
    }

    #[test]
    fn test_snapshot_create_with_description() {
        let cli = Cli::try_parse_from([
            "lvlab",
            "snapshot",
            "create",
            "web01",
            "before-upgrade",
            "-d",
            "pre dnf upgrade",
        ])
        .unwrap();
        assert!(matches!(cli.command, Command::Snapshot(_)));
    }

    #[test]
    fn test_up_requires_machine_name() {
        assert!(Cli::try_parse_from(["lvlab", "up"]).is_err());
    }

    #[test]
    fn test_connect_overrides_manifest_uri() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("Lvlab.yml");
        std::fs::write(
            &path,
            "environment:\n  - name: lab1\n    libvirt_uri: qemu:///session\n    machines:\n      - vm_name: web01\n",
        )
        .unwrap();

        let lab = Lab::load(&path, None).unwrap();
        assert_eq!(lab.env.uri, "qemu:///session");

        let lab = Lab::load(&path, Some("test:///default")).unwrap();
        assert_eq!(lab.env.uri, "test:///default");
        assert_eq!(lab.machine("web01").unwrap().vm_name, "web01");
    }
}
