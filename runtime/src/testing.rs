//! Recording fakes for the process and hypervisor seams.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use lvlab_core::error::{LabError, ProcessError, Result};

use crate::cloudinit::GENISOIMAGE;
use crate::disk::QEMU_IMG;
use crate::hypervisor::{DomainState, DomainStatus, Hypervisor};
use crate::install::VIRT_INSTALL;
use crate::process::{CommandOutput, CommandRunner};

/// Command runner that records calls and simulates tool side effects.
///
/// `qemu-img` and `genisoimage` create their output file, `virt-install`
/// defines a running domain on the attached [`FakeHypervisor`].
#[derive(Default)]
pub struct FakeRunner {
    calls: Mutex<Vec<(String, Vec<String>)>>,
    failing: Mutex<HashSet<String>>,
    responses: Mutex<Vec<(String, String, String)>>,
    hypervisor: Option<Arc<FakeHypervisor>>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_hypervisor(hypervisor: Arc<FakeHypervisor>) -> Self {
        Self {
            hypervisor: Some(hypervisor),
            ..Self::default()
        }
    }

    /// Make every later call to `tool` exit non-zero.
    pub fn fail_tool(&self, tool: &str) {
        self.failing.lock().unwrap().insert(tool.to_string());
    }

    /// Reply with `stdout` to calls of `tool` whose arguments include `arg`.
    pub fn respond(&self, tool: &str, arg: &str, stdout: &str) {
        self.responses
            .lock()
            .unwrap()
            .push((tool.to_string(), arg.to_string(), stdout.to_string()));
    }

    pub fn calls(&self) -> Vec<(String, Vec<String>)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, tool: &str) -> Vec<Vec<String>> {
        self.calls()
            .into_iter()
            .filter(|(t, _)| t == tool)
            .map(|(_, args)| args)
            .collect()
    }

    pub fn tools(&self) -> Vec<String> {
        self.calls().into_iter().map(|(tool, _)| tool).collect()
    }
}

fn value_after<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

fn simulated_failure(tool: &str, args: &[String], stderr: &str) -> ProcessError {
    ProcessError::NonZeroExit {
        tool: tool.to_string(),
        args: args.to_vec(),
        code: 1,
        stderr: stderr.to_string(),
    }
}

#[async_trait]
impl CommandRunner for FakeRunner {
    async fn run(&self, tool: &str, args: &[String]) -> std::result::Result<CommandOutput, ProcessError> {
        self.calls
            .lock()
            .unwrap()
            .push((tool.to_string(), args.to_vec()));

        if self.failing.lock().unwrap().contains(tool) {
            return Err(simulated_failure(tool, args, "simulated failure"));
        }

        let output = match tool {
            QEMU_IMG => args.len().checked_sub(2).and_then(|i| args.get(i)),
            GENISOIMAGE => args.get(1),
            _ => None,
        };
        if let Some(path) = output {
            std::fs::write(Path::new(path), b"")
                .map_err(|e| simulated_failure(tool, args, &e.to_string()))?;
        }

        if tool == VIRT_INSTALL {
            if let (Some(hypervisor), Some(name)) = (&self.hypervisor, value_after(args, "--name")) {
                hypervisor.add_domain(name, DomainState::Running);
            }
        }

        let stdout = self
            .responses
            .lock()
            .unwrap()
            .iter()
            .find(|(t, arg, _)| t == tool && args.iter().any(|a| a == arg))
            .map(|(_, _, stdout)| stdout.clone())
            .unwrap_or_default();

        Ok(CommandOutput {
            stdout,
            stderr: String::new(),
        })
    }
}

#[derive(Debug, Clone)]
struct FakeDomain {
    state: DomainState,
    snapshots: Vec<String>,
}

/// In-memory hypervisor recording every call as `"{op} {domain}"`.
#[derive(Default)]
pub struct FakeHypervisor {
    domains: Mutex<BTreeMap<String, FakeDomain>>,
    calls: Mutex<Vec<String>>,
    failing: Mutex<HashSet<String>>,
    stuck_active: Mutex<bool>,
}

impl FakeHypervisor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_domain(&self, name: &str, state: DomainState) {
        self.domains.lock().unwrap().insert(
            name.to_string(),
            FakeDomain {
                state,
                snapshots: Vec::new(),
            },
        );
    }

    pub fn add_snapshot(&self, name: &str, snapshot: &str) {
        if let Some(domain) = self.domains.lock().unwrap().get_mut(name) {
            domain.snapshots.push(snapshot.to_string());
        }
    }

    /// Make every later call of `operation` fail.
    pub fn fail(&self, operation: &str) {
        self.failing.lock().unwrap().insert(operation.to_string());
    }

    /// Forced stops succeed but leave the domain active.
    pub fn ignore_destroy(&self) {
        *self.stuck_active.lock().unwrap() = true;
    }

    pub fn state_of(&self, name: &str) -> Option<DomainState> {
        self.domains.lock().unwrap().get(name).map(|d| d.state)
    }

    pub fn snapshots_of(&self, name: &str) -> Vec<String> {
        self.domains
            .lock()
            .unwrap()
            .get(name)
            .map(|d| d.snapshots.clone())
            .unwrap_or_default()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Recorded calls other than queries.
    pub fn actions(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| !(c == "list" || c.starts_with("status ") || c.starts_with("snapshot-list ")))
            .collect()
    }

    fn record(&self, operation: &str, domain: &str) -> Result<()> {
        let call = if domain.is_empty() {
            operation.to_string()
        } else {
            format!("{operation} {domain}")
        };
        self.calls.lock().unwrap().push(call);

        if self.failing.lock().unwrap().contains(operation) {
            return Err(LabError::HypervisorError {
                operation: operation.to_string(),
                domain: domain.to_string(),
                message: "simulated failure".to_string(),
            });
        }
        Ok(())
    }

    fn with_domain<T>(&self, operation: &str, name: &str, f: impl FnOnce(&mut FakeDomain) -> T) -> Result<T> {
        let mut domains = self.domains.lock().unwrap();
        let domain = domains.get_mut(name).ok_or_else(|| LabError::HypervisorError {
            operation: operation.to_string(),
            domain: name.to_string(),
            message: "Domain not found".to_string(),
        })?;
        Ok(f(domain))
    }
}

#[async_trait]
impl Hypervisor for FakeHypervisor {
    fn uri(&self) -> &str {
        "test:///default"
    }

    async fn list_domain_names(&self) -> Result<Vec<String>> {
        self.record("list", "")?;
        Ok(self.domains.lock().unwrap().keys().cloned().collect())
    }

    async fn domain_status(&self, name: &str) -> Result<DomainStatus> {
        self.record("status", name)?;
        self.with_domain("status", name, |d| DomainStatus::from_codes(state_code(d.state), 0))
    }

    async fn start(&self, name: &str) -> Result<()> {
        self.record("start", name)?;
        self.with_domain("start", name, |d| d.state = DomainState::Running)
    }

    async fn shutdown(&self, name: &str) -> Result<()> {
        self.record("shutdown", name)?;
        self.with_domain("shutdown", name, |d| d.state = DomainState::ShuttingDown)
    }

    async fn destroy(&self, name: &str) -> Result<()> {
        self.record("destroy", name)?;
        let stuck = *self.stuck_active.lock().unwrap();
        self.with_domain("destroy", name, |d| {
            if !stuck {
                d.state = DomainState::ShutOff;
            }
        })
    }

    async fn undefine(&self, name: &str) -> Result<()> {
        self.record("undefine", name)?;
        self.with_domain("undefine", name, |_| ())?;
        self.domains.lock().unwrap().remove(name);
        Ok(())
    }

    async fn snapshot_create(&self, name: &str, snapshot: &str, _description: &str) -> Result<()> {
        self.record("snapshot-create", name)?;
        self.with_domain("snapshot-create", name, |d| d.snapshots.push(snapshot.to_string()))
    }

    async fn snapshot_list(&self, name: &str) -> Result<Vec<String>> {
        self.record("snapshot-list", name)?;
        self.with_domain("snapshot-list", name, |d| d.snapshots.clone())
    }

    async fn snapshot_delete(&self, name: &str, snapshot: &str) -> Result<()> {
        self.record("snapshot-delete", name)?;
        self.with_domain("snapshot-delete", name, |d| d.snapshots.retain(|s| s != snapshot))
    }

    async fn capabilities(&self) -> Result<String> {
        self.record("capabilities", "")?;
        Ok("<capabilities/>".to_string())
    }
}

fn state_code(state: DomainState) -> i64 {
    match state {
        DomainState::NoState => 0,
        DomainState::Running => 1,
        DomainState::Blocked => 2,
        DomainState::Paused => 3,
        DomainState::ShuttingDown => 4,
        DomainState::ShutOff => 5,
        DomainState::Crashed => 6,
        DomainState::Suspended => 7,
        DomainState::Unknown => -1,
    }
}
