//! Hypervisor session abstraction.
//!
//! The lifecycle controller only talks to a [`Hypervisor`]; [`VirshSession`]
//! drives libvirt through `virsh`.

mod state;
mod virsh;

pub use state::{DomainState, DomainStatus, UNKNOWN_REASON};
pub use virsh::{parse_domain_list, parse_domstats, VirshSession, VIRSH};

use async_trait::async_trait;
use lvlab_core::error::Result;

/// Session to one hypervisor endpoint.
///
/// Nothing is cached: every query goes to the hypervisor.
#[async_trait]
pub trait Hypervisor: Send + Sync {
    /// Endpoint URI of this session.
    fn uri(&self) -> &str;

    /// Names of all defined domains, active or not.
    async fn list_domain_names(&self) -> Result<Vec<String>>;

    /// Current state of a defined domain.
    async fn domain_status(&self, name: &str) -> Result<DomainStatus>;

    /// Existence and state of a domain; `None` when not defined.
    async fn lookup(&self, name: &str) -> Result<Option<DomainStatus>> {
        let names = self.list_domain_names().await?;
        if !names.iter().any(|n| n == name) {
            return Ok(None);
        }
        Ok(Some(self.domain_status(name).await?))
    }

    /// Power on a defined domain.
    async fn start(&self, name: &str) -> Result<()>;

    /// Request a graceful shutdown. Returns without waiting for it.
    async fn shutdown(&self, name: &str) -> Result<()>;

    /// Forcibly stop a domain.
    async fn destroy(&self, name: &str) -> Result<()>;

    /// Remove the domain definition.
    async fn undefine(&self, name: &str) -> Result<()>;

    async fn snapshot_create(&self, name: &str, snapshot: &str, description: &str) -> Result<()>;

    async fn snapshot_list(&self, name: &str) -> Result<Vec<String>>;

    async fn snapshot_delete(&self, name: &str, snapshot: &str) -> Result<()>;

    /// Host capabilities document.
    async fn capabilities(&self) -> Result<String>;
}
