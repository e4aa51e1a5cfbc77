//! Table formatting helpers for CLI output.

use comfy_table::{ContentArrangement, Table};
use lvlab_runtime::MachineStatus;

/// Placeholder for values a machine does not have.
const NONE: &str = "-";

/// Create a styled table with the given headers.
pub fn new_table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.load_preset(comfy_table::presets::NOTHING);
    table.set_header(headers);
    table
}

/// One row per machine: name, hostname, state and reason.
pub fn status_table(statuses: &[MachineStatus]) -> Table {
    let mut table = new_table(&["NAME", "HOSTNAME", "STATE", "REASON"]);
    for status in statuses {
        let state = match status.state {
            Some(state) => state.to_string(),
            None => "Not Deployed".to_string(),
        };
        table.add_row([
            status.vm_name.as_str(),
            status.hostname.as_str(),
            state.as_str(),
            status.reason.as_deref().unwrap_or(NONE),
        ]);
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use lvlab_runtime::DomainState;

    #[test]
    fn test_new_table() {
        let table = new_table(&["NAME", "STATE"]);
        let output = table.to_string();
        assert!(output.contains("NAME"));
        assert!(output.contains("STATE"));
    }

    #[test]
    fn test_status_table_rows() {
        let statuses = vec![
            MachineStatus {
                vm_name: "web01".to_string(),
                hostname: "web01".to_string(),
                deployed: true,
                state: Some(DomainState::ShutOff),
                reason: Some("normal shutdown".to_string()),
            },
            MachineStatus {
                vm_name: "db01".to_string(),
                hostname: "db".to_string(),
                deployed: false,
                state: None,
                reason: None,
            },
        ];

        let output = status_table(&statuses).to_string();
        assert!(output.contains("web01"));
        assert!(output.contains("Shut Off"));
        assert!(output.contains("normal shutdown"));
        assert!(output.contains("db01"));
        assert!(output.contains("Not Deployed"));
    }
}
