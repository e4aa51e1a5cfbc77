//! External command invocation.
//!
//! Every tool lvlab drives (`qemu-img`, `genisoimage`, `virt-install`,
//! `virsh`, `gpg`) goes through [`CommandRunner`], so argument vectors and
//! exit-status handling can be exercised without the real binaries.

use std::process::Stdio;

use async_trait::async_trait;
use lvlab_core::error::ProcessError;
use tokio::process::Command;

/// Captured output of a successful command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Runs external tools to completion.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `tool` with `args`, waiting for it to exit.
    ///
    /// A non-zero exit is [`ProcessError::NonZeroExit`] carrying the command
    /// line and captured stderr.
    async fn run(&self, tool: &str, args: &[String]) -> Result<CommandOutput, ProcessError>;
}

/// Runs tools as child processes of this one.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, tool: &str, args: &[String]) -> Result<CommandOutput, ProcessError> {
        tracing::debug!(tool, args = %args.join(" "), "exec");

        let output = Command::new(tool)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| ProcessError::Spawn {
                tool: tool.to_string(),
                source,
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            return Err(ProcessError::NonZeroExit {
                tool: tool.to_string(),
                args: args.to_vec(),
                // Killed by a signal
                code: output.status.code().unwrap_or(-1),
                stderr,
            });
        }

        Ok(CommandOutput { stdout, stderr })
    }
}

/// Build an owned argument vector from string-like parts.
pub fn args<I, S>(parts: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    parts.into_iter().map(Into::into).collect()
}
