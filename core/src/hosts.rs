//! `/etc/hosts` snippet for an environment.

use serde::Serialize;

use crate::machine::MachineSpec;

/// One hosts line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostsEntry {
    pub ip4: String,
    pub fqdn: String,
    pub hostname: String,
}

impl HostsEntry {
    /// `{ip} {fqdn} {hostname}`
    pub fn line(&self) -> String {
        if self.fqdn == self.hostname {
            format!("{} {}", self.ip4, self.hostname)
        } else {
            format!("{} {} {}", self.ip4, self.fqdn, self.hostname)
        }
    }
}

/// Entries for every machine whose first interface has a static address.
pub fn hosts_entries(machines: &[MachineSpec]) -> Vec<HostsEntry> {
    machines
        .iter()
        .filter_map(|machine| {
            let ip4 = machine.interfaces.first()?.ip4()?;
            Some(HostsEntry {
                ip4: ip4.to_string(),
                fqdn: machine.fqdn.clone(),
                hostname: machine.hostname.clone(),
            })
        })
        .collect()
}

/// Render the hosts block for an environment.
pub fn render_hosts(env_name: &str, entries: &[HostsEntry]) -> String {
    let mut out = format!("# BEGIN lvlab {env_name}\n");
    for entry in entries {
        out.push_str(&entry.line());
        out.push('\n');
    }
    out.push_str(&format!("# END lvlab {env_name}\n"));
    out
}

/// Guest commands appending each entry to `/etc/hosts` unless already present.
pub fn hosts_commands(entries: &[HostsEntry]) -> Vec<String> {
    entries
        .iter()
        .map(|entry| {
            let line = entry.line();
            format!("grep -qxF '{line}' /etc/hosts || echo '{line}' >> /etc/hosts")
        })
        .collect()
}
