use chrono::{DateTime, Utc};
use container_driver_interface::ContainerHandle;
use provisioner_shared_types::{Address, BoundPorts, InstanceId, PresetKind, ProvisionError};
use serde::Serialize;

/// A running, seeded container owned by the lifecycle manager.
#[derive(Debug, Clone)]
pub struct Instance {
    pub id: InstanceId,
    pub kind: PresetKind,
    pub address: Address,
    pub created_at: DateTime<Utc>,
    pub(crate) handle: ContainerHandle,
}

impl Instance {
    pub fn view(&self) -> InstanceView {
        InstanceView {
            id: self.id,
            kind: self.kind,
            host: self.address.host.clone(),
            ports: self.address.ports.clone(),
            created_at: self.created_at,
        }
    }
}

/// What callers get to see of an instance; the container handle stays
/// inside the manager.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstanceView {
    pub id: InstanceId,
    pub kind: PresetKind,
    pub host: String,
    pub ports: BoundPorts,
    pub created_at: DateTime<Utc>,
}

/// A provisioning attempt that was rolled back.
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct ProvisionFailure {
    #[source]
    pub error: ProvisionError,
    /// Tail of the container output captured before removal.
    pub container_logs: Vec<String>,
}

impl ProvisionFailure {
    pub fn new(error: ProvisionError) -> Self {
        Self {
            error,
            container_logs: Vec::new(),
        }
    }

    pub fn with_logs(mut self, logs: Vec<String>) -> Self {
        self.container_logs = logs;
        self
    }
}

impl From<ProvisionError> for ProvisionFailure {
    fn from(error: ProvisionError) -> Self {
        Self::new(error)
    }
}
