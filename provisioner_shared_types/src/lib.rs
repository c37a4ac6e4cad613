//! Types shared by every crate of the provisioner workspace.
//!
//! - [`Preset`]: the closed set of backing-service flavours and their seed data
//! - [`Options`]: knobs that apply to every preset
//! - [`Address`] / [`PortSpec`]: declared and bound container ports
//! - [`ProvisionError`]: the error taxonomy surfaced to callers

pub mod error;
pub mod network;
pub mod options;
pub mod preset;

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use error::{DriverErrorKind, ProvisionError, Result};
pub use network::{Address, BoundPort, BoundPorts, NamedPorts, PortSpec, Protocol, DEFAULT_PORT};
pub use options::Options;
pub use preset::*;

/// Opaque identifier handed out for every running instance.
pub type InstanceId = Uuid;

/// Identifier the container runtime assigned to a container.
pub type ContainerId = String;

/// Lifecycle states of a provisioned instance.
///
/// `Failed` is terminal and reachable from any of the first four states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstanceState {
    Creating,
    Starting,
    AwaitingReady,
    Seeding,
    Running,
    Stopping,
    Removed,
    Failed,
}

impl InstanceState {
    /// Whether `self -> next` is a legal transition.
    pub fn can_transition_to(self, next: InstanceState) -> bool {
        use InstanceState::*;
        matches!(
            (self, next),
            (Creating, Starting)
                | (Starting, AwaitingReady)
                | (AwaitingReady, Seeding)
                | (Seeding, Running)
                | (Running, Stopping)
                | (Stopping, Removed)
                | (Creating | Starting | AwaitingReady | Seeding, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, InstanceState::Removed | InstanceState::Failed)
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InstanceState::Creating => "creating",
            InstanceState::Starting => "starting",
            InstanceState::AwaitingReady => "awaiting_ready",
            InstanceState::Seeding => "seeding",
            InstanceState::Running => "running",
            InstanceState::Stopping => "stopping",
            InstanceState::Removed => "removed",
            InstanceState::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        let path = [
            InstanceState::Creating,
            InstanceState::Starting,
            InstanceState::AwaitingReady,
            InstanceState::Seeding,
            InstanceState::Running,
            InstanceState::Stopping,
            InstanceState::Removed,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_failed_only_reachable_before_running() {
        assert!(InstanceState::Seeding.can_transition_to(InstanceState::Failed));
        assert!(InstanceState::Creating.can_transition_to(InstanceState::Failed));
        assert!(!InstanceState::Running.can_transition_to(InstanceState::Failed));
        assert!(!InstanceState::Removed.can_transition_to(InstanceState::Failed));
    }

    #[test]
    fn test_no_skipping_readiness() {
        assert!(!InstanceState::Starting.can_transition_to(InstanceState::Seeding));
        assert!(!InstanceState::Creating.can_transition_to(InstanceState::Running));
        assert!(InstanceState::Failed.is_terminal());
    }
}
