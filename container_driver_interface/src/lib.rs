use std::collections::BTreeMap;

use async_trait::async_trait;
use provisioner_shared_types::{
    Address, ContainerId, DriverErrorKind, InstanceId, NamedPorts, ProvisionError,
};
use serde::{Deserialize, Serialize};

/// Label put on every container the provisioner creates.
pub const MANAGED_LABEL: &str = "provisioner.managed";
/// Label carrying the instance id a container belongs to.
pub const INSTANCE_LABEL: &str = "provisioner.instance";
/// Label carrying the preset kind.
pub const KIND_LABEL: &str = "provisioner.kind";

/// Everything the runtime needs to create one container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSpec {
    /// Fully qualified image reference including the tag.
    pub image: String,
    /// `KEY=VALUE` entries.
    pub env: Vec<String>,
    pub ports: NamedPorts,
    pub cmd: Option<Vec<String>>,
    pub name: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub privileged: bool,
    /// Base64 encoded registry auth used for the pull.
    pub auth: Option<String>,
    pub use_local_images_first: bool,
}

/// Handle to a container created through a [`ContainerDriver`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerHandle {
    pub id: ContainerId,
    pub name: Option<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl ContainerHandle {
    pub fn new(id: impl Into<ContainerId>) -> Self {
        Self {
            id: id.into(),
            name: None,
            labels: BTreeMap::new(),
        }
    }

    /// Instance this container was created for, read from its labels.
    pub fn instance_id(&self) -> Option<InstanceId> {
        self.labels
            .get(INSTANCE_LABEL)
            .and_then(|value| value.parse().ok())
    }
}

/// Runtime failure, classified so the caller knows whether to retry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind} container runtime error: {message}")]
pub struct DriverError {
    pub kind: DriverErrorKind,
    pub message: String,
}

impl DriverError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: DriverErrorKind::Transient,
            message: message.into(),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            kind: DriverErrorKind::Fatal,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind == DriverErrorKind::Transient
    }
}

impl From<DriverError> for ProvisionError {
    fn from(err: DriverError) -> Self {
        ProvisionError::Driver {
            kind: err.kind,
            message: err.message,
        }
    }
}

pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// Trait for interacting with a container runtime (e.g., Docker, Podman)
#[async_trait]
pub trait ContainerDriver: Send + Sync {
    /// Pulls the image if needed and creates (but does not start) a container.
    async fn create(&self, spec: &ContainerSpec) -> DriverResult<ContainerHandle>;

    /// Starts a created container.
    async fn start(&self, handle: &ContainerHandle) -> DriverResult<()>;

    /// Waits until every declared port is published and returns where the
    /// container can be reached. Callers bound the wait with a timeout.
    async fn address(&self, handle: &ContainerHandle, ports: &NamedPorts) -> DriverResult<Address>;

    /// Stops a container. Stopping an already stopped or missing container succeeds.
    async fn stop(&self, handle: &ContainerHandle) -> DriverResult<()>;

    /// Removes a container. Removing a missing container succeeds.
    async fn remove(&self, handle: &ContainerHandle) -> DriverResult<()>;

    /// Lists containers created by the provisioner; stopped ones only when
    /// `include_stopped` is set.
    async fn list(&self, include_stopped: bool) -> DriverResult<Vec<ContainerHandle>>;

    /// Last `tail` lines of container output.
    async fn logs(&self, handle: &ContainerHandle, tail: usize) -> DriverResult<Vec<String>> {
        // Default implementation - logs not supported
        let _ = (handle, tail);
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_error_conversion_keeps_kind() {
        let err: ProvisionError = DriverError::transient("socket closed").into();
        match err {
            ProvisionError::Driver { kind, message } => {
                assert_eq!(kind, DriverErrorKind::Transient);
                assert_eq!(message, "socket closed");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_handle_instance_label() {
        let id = uuid::Uuid::new_v4();
        let mut handle = ContainerHandle::new("abc");
        assert_eq!(handle.instance_id(), None);

        handle.labels.insert(INSTANCE_LABEL.to_string(), id.to_string());
        assert_eq!(handle.instance_id(), Some(id));
    }
}
