//! Execution constraints and the readiness evaluator.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Network requirement declared on a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkType {
    /// No network required.
    None,
    /// Any connection, including roaming.
    Any,
    /// Unmetered connection only.
    Unmetered,
    /// Metered or unmetered connection.
    Metered,
    /// Any non-roaming connection.
    NotRoaming,
}

impl Default for NetworkType {
    fn default() -> Self {
        NetworkType::None
    }
}

impl NetworkType {
    /// Stable string form used by the persistence layer and CLI.
    pub fn as_str(self) -> &'static str {
        match self {
            NetworkType::None => "none",
            NetworkType::Any => "any",
            NetworkType::Unmetered => "unmetered",
            NetworkType::Metered => "metered",
            NetworkType::NotRoaming => "not_roaming",
        }
    }

    /// Parse the persisted string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "none" => Some(NetworkType::None),
            "any" => Some(NetworkType::Any),
            "unmetered" => Some(NetworkType::Unmetered),
            "metered" => Some(NetworkType::Metered),
            "not_roaming" => Some(NetworkType::NotRoaming),
            _ => None,
        }
    }
}

/// Current connection state reported by the system condition collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Connectivity {
    /// No connection.
    Offline,
    /// Unmetered connection (e.g. wifi).
    Unmetered,
    /// Metered connection.
    Metered,
    /// Metered connection while roaming.
    Roaming,
}

impl Default for Connectivity {
    fn default() -> Self {
        Connectivity::Offline
    }
}

/// Point-in-time snapshot of system conditions.
///
/// The scheduler only ever consumes these snapshots; how they are produced
/// (OS signals, polling, test fixtures) is a collaborator concern.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemSnapshot {
    /// Device is plugged in.
    pub charging: bool,
    /// Device is idle.
    pub device_idle: bool,
    /// Battery is above the low threshold.
    pub battery_not_low: bool,
    /// Storage is above the low threshold.
    pub storage_not_low: bool,
    /// Current connection state.
    pub network: Connectivity,
}

impl SystemSnapshot {
    /// Snapshot that satisfies every possible constraint.
    ///
    /// Used by hosts with no condition source wired in.
    pub fn permissive() -> Self {
        Self {
            charging: true,
            device_idle: true,
            battery_not_low: true,
            storage_not_low: true,
            network: Connectivity::Unmetered,
        }
    }
}

/// Conditions that must all hold before a job may be dispatched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Constraints {
    /// Require the device to be charging.
    #[serde(default)]
    pub requires_charging: bool,
    /// Require the device to be idle.
    #[serde(default)]
    pub requires_device_idle: bool,
    /// Require battery not low.
    #[serde(default)]
    pub requires_battery_not_low: bool,
    /// Require storage not low.
    #[serde(default)]
    pub requires_storage_not_low: bool,
    /// Required network state.
    #[serde(default)]
    pub required_network: NetworkType,
    /// Delay after enqueue before the first attempt may run.
    #[serde(default)]
    pub initial_delay: Duration,
}

impl Constraints {
    /// Create constraints with no requirements.
    pub fn none() -> Self {
        Self::default()
    }

    /// Evaluate declared requirements against a snapshot.
    ///
    /// Pure: every requirement is ANDed, undeclared requirements are
    /// vacuously satisfied. Delay handling lives on [`crate::Job`], which
    /// knows its enqueue and re-arm times.
    pub fn satisfied_by(&self, snapshot: &SystemSnapshot) -> bool {
        if self.requires_charging && !snapshot.charging {
            return false;
        }
        if self.requires_device_idle && !snapshot.device_idle {
            return false;
        }
        if self.requires_battery_not_low && !snapshot.battery_not_low {
            return false;
        }
        if self.requires_storage_not_low && !snapshot.storage_not_low {
            return false;
        }
        network_satisfied(self.required_network, snapshot.network)
    }
}

fn network_satisfied(required: NetworkType, actual: Connectivity) -> bool {
    match required {
        NetworkType::None => true,
        NetworkType::Any => actual != Connectivity::Offline,
        NetworkType::Unmetered => actual == Connectivity::Unmetered,
        NetworkType::Metered => actual != Connectivity::Offline,
        NetworkType::NotRoaming => {
            matches!(actual, Connectivity::Unmetered | Connectivity::Metered)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_constraints_always_satisfied() {
        let constraints = Constraints::none();
        assert!(constraints.satisfied_by(&SystemSnapshot::default()));
        assert!(constraints.satisfied_by(&SystemSnapshot::permissive()));
    }

    #[test]
    fn test_charging_requirement() {
        let constraints = Constraints {
            requires_charging: true,
            ..Default::default()
        };

        let mut snapshot = SystemSnapshot::default();
        assert!(!constraints.satisfied_by(&snapshot));

        snapshot.charging = true;
        assert!(constraints.satisfied_by(&snapshot));
    }

    #[test]
    fn test_all_requirements_are_anded() {
        let constraints = Constraints {
            requires_charging: true,
            requires_device_idle: true,
            requires_battery_not_low: true,
            requires_storage_not_low: true,
            ..Default::default()
        };

        let mut snapshot = SystemSnapshot::permissive();
        assert!(constraints.satisfied_by(&snapshot));

        snapshot.battery_not_low = false;
        assert!(!constraints.satisfied_by(&snapshot));
    }

    #[test]
    fn test_network_matrix() {
        let cases = [
            // (required, offline, unmetered, metered, roaming)
            (NetworkType::None, true, true, true, true),
            (NetworkType::Any, false, true, true, true),
            (NetworkType::Unmetered, false, true, false, false),
            (NetworkType::Metered, false, true, true, true),
            (NetworkType::NotRoaming, false, true, true, false),
        ];

        for (required, offline, unmetered, metered, roaming) in cases {
            assert_eq!(network_satisfied(required, Connectivity::Offline), offline);
            assert_eq!(
                network_satisfied(required, Connectivity::Unmetered),
                unmetered
            );
            assert_eq!(network_satisfied(required, Connectivity::Metered), metered);
            assert_eq!(network_satisfied(required, Connectivity::Roaming), roaming);
        }
    }
}
