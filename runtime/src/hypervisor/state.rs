//! libvirt domain state normalization.
//!
//! libvirt reports a numeric `(state, reason)` pair. The reason code space
//! depends on the state (running reason 1 is "booted", shutoff reason 1 is
//! "normal shutdown"), so each state has its own reason table. Codes
//! missing from the tables never fail: they become [`DomainState::Unknown`]
//! or [`UNKNOWN_REASON`].

use serde::Serialize;
use std::fmt;

/// Reason label for codes not in the tables.
pub const UNKNOWN_REASON: &str = "Unknown Reason";

/// Normalized domain state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DomainState {
    NoState,
    Running,
    Blocked,
    Paused,
    ShuttingDown,
    ShutOff,
    Crashed,
    Suspended,
    Unknown,
}

const RUNNING_REASONS: &[&str] = &[
    "the reason is unknown",
    "normal startup from boot",
    "migrated from another host",
    "restored from a state file",
    "restored from snapshot",
    "returned from paused state",
    "returned from migration",
    "returned from failed save process",
    "returned from pmsuspended due to wakeup event",
    "resumed from crashed",
    "running in post-copy migration mode",
    "running in failed post-copy migration",
];

const BLOCKED_REASONS: &[&str] = &["the reason is unknown"];

const PAUSED_REASONS: &[&str] = &[
    "the reason is unknown",
    "paused on user request",
    "paused for offline migration",
    "paused for save",
    "paused for offline core dump",
    "paused due to a disk I/O error",
    "paused due to a watchdog event",
    "restored from a snapshot which was taken while domain was paused",
    "paused during shutdown process",
    "paused while creating a snapshot",
    "paused due to a guest crash",
    "the domain is being started",
    "paused for post-copy migration",
    "paused after failed post-copy",
];

const SHUTDOWN_REASONS: &[&str] = &["the reason is unknown", "shutting down on user request"];

const SHUTOFF_REASONS: &[&str] = &[
    "the reason is unknown",
    "normal shutdown",
    "forced poweroff",
    "domain crashed",
    "migrated to another host",
    "saved to a file",
    "domain failed to start",
    "restored from a snapshot which was taken while domain was shutoff",
    "daemon decided to kill domain during reconnection processing",
];

const CRASHED_REASONS: &[&str] = &["crashed for unknown reason", "domain panicked"];

const PMSUSPENDED_REASONS: &[&str] = &["the reason is unknown"];

const NOSTATE_REASONS: &[&str] = &["the reason is unknown"];

impl DomainState {
    /// Map a libvirt `virDomainState` code.
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => DomainState::NoState,
            1 => DomainState::Running,
            2 => DomainState::Blocked,
            3 => DomainState::Paused,
            4 => DomainState::ShuttingDown,
            5 => DomainState::ShutOff,
            6 => DomainState::Crashed,
            7 => DomainState::Suspended,
            _ => DomainState::Unknown,
        }
    }

    /// Human label.
    pub fn label(&self) -> &'static str {
        match self {
            DomainState::NoState => "No State",
            DomainState::Running => "Running",
            DomainState::Blocked => "Blocked",
            DomainState::Paused => "Paused",
            DomainState::ShuttingDown => "Shutting Down",
            DomainState::ShutOff => "Shut Off",
            DomainState::Crashed => "Crashed",
            DomainState::Suspended => "Suspended by Power Management",
            DomainState::Unknown => "Unknown State",
        }
    }

    /// Reason labels qualifying this state.
    fn reasons(&self) -> &'static [&'static str] {
        match self {
            DomainState::NoState => NOSTATE_REASONS,
            DomainState::Running => RUNNING_REASONS,
            DomainState::Blocked => BLOCKED_REASONS,
            DomainState::Paused => PAUSED_REASONS,
            DomainState::ShuttingDown => SHUTDOWN_REASONS,
            DomainState::ShutOff => SHUTOFF_REASONS,
            DomainState::Crashed => CRASHED_REASONS,
            DomainState::Suspended => PMSUSPENDED_REASONS,
            DomainState::Unknown => &[],
        }
    }

    /// Reason label for `code`, looked up in this state's table only.
    pub fn reason_label(&self, code: i64) -> &'static str {
        usize::try_from(code)
            .ok()
            .and_then(|index| self.reasons().get(index).copied())
            .unwrap_or(UNKNOWN_REASON)
    }

    /// States a destroy must force-stop before undefining.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            DomainState::Running
                | DomainState::Blocked
                | DomainState::Paused
                | DomainState::ShuttingDown
                | DomainState::Suspended
        )
    }

    /// States a graceful shutdown is issued for.
    pub fn accepts_shutdown(&self) -> bool {
        matches!(
            self,
            DomainState::Running | DomainState::Blocked | DomainState::Paused | DomainState::Suspended
        )
    }
}

impl fmt::Display for DomainState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A state and the label of its reason, freshly queried.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DomainStatus {
    pub state: DomainState,
    pub reason: String,
}

impl DomainStatus {
    /// Normalize a raw libvirt `(state, reason)` pair.
    pub fn from_codes(state: i64, reason: i64) -> Self {
        let state = DomainState::from_code(state);
        Self {
            reason: state.reason_label(reason).to_string(),
            state,
        }
    }
}

impl fmt::Display for DomainStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.state, self.reason)
    }
}
