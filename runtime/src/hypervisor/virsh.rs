//! libvirt session driven through the `virsh` client.

use std::sync::Arc;

use async_trait::async_trait;
use lvlab_core::error::{LabError, ProcessError, Result};

use super::{DomainStatus, Hypervisor};
use crate::process::{args, CommandOutput, CommandRunner};

/// libvirt command-line client.
pub const VIRSH: &str = "virsh";

/// A libvirt connection addressed by URI.
pub struct VirshSession {
    uri: String,
    runner: Arc<dyn CommandRunner>,
}

impl VirshSession {
    /// Open a session, checking the endpoint answers.
    pub async fn connect(uri: &str, runner: Arc<dyn CommandRunner>) -> Result<Self> {
        let session = Self {
            uri: uri.to_string(),
            runner,
        };

        session
            .virsh(&["uri"])
            .await
            .map_err(|e| LabError::HypervisorConnectError {
                uri: uri.to_string(),
                message: process_message(&e),
            })?;

        tracing::debug!(uri, "Connected to hypervisor");
        Ok(session)
    }

    async fn virsh(&self, sub: &[&str]) -> std::result::Result<CommandOutput, ProcessError> {
        let mut argv = args(["-c", self.uri.as_str()]);
        argv.extend(args(sub.iter().copied()));
        self.runner.run(VIRSH, &argv).await
    }

    /// Run a domain operation, mapping failures to [`LabError::HypervisorError`].
    async fn domain_op(&self, operation: &str, domain: &str, sub: &[&str]) -> Result<CommandOutput> {
        self.virsh(sub)
            .await
            .map_err(|e| LabError::HypervisorError {
                operation: operation.to_string(),
                domain: domain.to_string(),
                message: process_message(&e),
            })
    }
}

fn process_message(err: &ProcessError) -> String {
    match err {
        ProcessError::NonZeroExit { stderr, .. } if !stderr.trim().is_empty() => {
            stderr.trim().to_string()
        }
        other => other.to_string(),
    }
}

/// Parse `virsh list --name` / `snapshot-list --name` output.
pub fn parse_domain_list(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse `virsh domstats --state` output into a normalized status.
pub fn parse_domstats(output: &str) -> Option<DomainStatus> {
    let mut state = None;
    let mut reason = None;
    for line in output.lines() {
        if let Some((key, value)) = line.trim().split_once('=') {
            match key {
                "state.state" => state = value.trim().parse::<i64>().ok(),
                "state.reason" => reason = value.trim().parse::<i64>().ok(),
                _ => {}
            }
        }
    }
    // A missing reason is reported as reason 0
    Some(DomainStatus::from_codes(state?, reason.unwrap_or(0)))
}

#[async_trait]
impl Hypervisor for VirshSession {
    fn uri(&self) -> &str {
        &self.uri
    }

    async fn list_domain_names(&self) -> Result<Vec<String>> {
        let output = self
            .virsh(&["list", "--all", "--name"])
            .await
            .map_err(|e| LabError::HypervisorError {
                operation: "list".to_string(),
                domain: self.uri.clone(),
                message: process_message(&e),
            })?;
        Ok(parse_domain_list(&output.stdout))
    }

    async fn domain_status(&self, name: &str) -> Result<DomainStatus> {
        let output = self
            .domain_op("domstats", name, &["domstats", "--state", name])
            .await?;
        parse_domstats(&output.stdout).ok_or_else(|| LabError::HypervisorError {
            operation: "domstats".to_string(),
            domain: name.to_string(),
            message: "no state reported".to_string(),
        })
    }

    async fn start(&self, name: &str) -> Result<()> {
        tracing::info!(domain = name, "Starting domain");
        self.domain_op("start", name, &["start", name]).await?;
        Ok(())
    }

    async fn shutdown(&self, name: &str) -> Result<()> {
        tracing::info!(domain = name, "Shutting down domain");
        self.domain_op("shutdown", name, &["shutdown", name]).await?;
        Ok(())
    }

    async fn destroy(&self, name: &str) -> Result<()> {
        tracing::info!(domain = name, "Forcing domain off");
        self.domain_op("destroy", name, &["destroy", name]).await?;
        Ok(())
    }

    async fn undefine(&self, name: &str) -> Result<()> {
        tracing::info!(domain = name, "Undefining domain");
        self.domain_op("undefine", name, &["undefine", name]).await?;
        Ok(())
    }

    async fn snapshot_create(&self, name: &str, snapshot: &str, description: &str) -> Result<()> {
        tracing::info!(domain = name, snapshot, "Creating snapshot");
        self.domain_op(
            "snapshot-create",
            name,
            &[
                "snapshot-create-as",
                "--domain",
                name,
                "--name",
                snapshot,
                "--description",
                description,
            ],
        )
        .await?;
        Ok(())
    }

    async fn snapshot_list(&self, name: &str) -> Result<Vec<String>> {
        let output = self
            .domain_op(
                "snapshot-list",
                name,
                &["snapshot-list", "--domain", name, "--name"],
            )
            .await?;
        Ok(parse_domain_list(&output.stdout))
    }

    async fn snapshot_delete(&self, name: &str, snapshot: &str) -> Result<()> {
        tracing::info!(domain = name, snapshot, "Deleting snapshot");
        self.domain_op(
            "snapshot-delete",
            name,
            &["snapshot-delete", "--domain", name, "--snapshotname", snapshot],
        )
        .await?;
        Ok(())
    }

    async fn capabilities(&self) -> Result<String> {
        let output = self
            .virsh(&["capabilities"])
            .await
            .map_err(|e| LabError::HypervisorError {
                operation: "capabilities".to_string(),
                domain: self.uri.clone(),
                message: process_message(&e),
            })?;
        Ok(output.stdout)
    }
}
