//! Mock container driver for testing and development.
//!
//! Containers live in memory, published ports come from a counter and any
//! operation can be made to fail or stall on demand.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use container_driver_interface::{
    ContainerDriver, ContainerHandle, ContainerSpec, DriverError, DriverResult, MANAGED_LABEL,
};
use provisioner_shared_types::{Address, BoundPort, BoundPorts, ContainerId, NamedPorts};

const FIRST_MOCK_PORT: u16 = 40000;

/// Driver operations a failure or delay can be attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOperation {
    Create,
    Start,
    Address,
    Stop,
    Remove,
    List,
    Logs,
}

/// Mock container state
#[derive(Debug, Clone)]
struct MockContainer {
    handle: ContainerHandle,
    spec: ContainerSpec,
    running: bool,
    ports: BoundPorts,
}

/// Mock driver that simulates container operations in-memory.
#[derive(Debug, Clone)]
pub struct MockDriver {
    /// All containers by ID
    containers: Arc<RwLock<HashMap<ContainerId, MockContainer>>>,
    /// Errors returned by the next calls of an operation, oldest first
    failures: Arc<RwLock<HashMap<MockOperation, VecDeque<DriverError>>>>,
    /// Errors returned after the call has already taken effect
    lost_replies: Arc<RwLock<HashMap<MockOperation, VecDeque<DriverError>>>>,
    /// Per-operation sleep before the call does anything
    delays: HashMap<MockOperation, Duration>,
    next_port: Arc<AtomicU16>,
    host: String,
    logs: Vec<String>,
}

impl Default for MockDriver {
    fn default() -> Self {
        Self {
            containers: Arc::default(),
            failures: Arc::default(),
            lost_replies: Arc::default(),
            delays: HashMap::new(),
            next_port: Arc::new(AtomicU16::new(FIRST_MOCK_PORT)),
            host: "127.0.0.1".to_string(),
            logs: Vec::new(),
        }
    }
}

impl MockDriver {
    /// Create a new mock driver instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Output every container reports from [`ContainerDriver::logs`].
    pub fn with_logs<I, S>(mut self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.logs = lines.into_iter().map(Into::into).collect();
        self
    }

    /// Sleep for `delay` at the start of every `operation` call.
    pub fn with_delay(mut self, operation: MockOperation, delay: Duration) -> Self {
        self.delays.insert(operation, delay);
        self
    }

    /// Make the next call of `operation` fail with `error`. Queued errors are
    /// consumed in order, one per call.
    pub async fn fail_on(&self, operation: MockOperation, error: DriverError) {
        self.failures
            .write()
            .await
            .entry(operation)
            .or_default()
            .push_back(error);
    }

    /// Make the next call of `operation` take effect and then fail with
    /// `error`, as when the runtime's reply is lost. Honoured by create,
    /// start, stop and remove.
    pub async fn fail_after(&self, operation: MockOperation, error: DriverError) {
        self.lost_replies
            .write()
            .await
            .entry(operation)
            .or_default()
            .push_back(error);
    }

    /// Get the count of containers, stopped ones included (for testing).
    pub async fn container_count(&self) -> usize {
        self.containers.read().await.len()
    }

    /// Get the count of running containers (for testing).
    pub async fn running_count(&self) -> usize {
        self.containers
            .read()
            .await
            .values()
            .filter(|c| c.running)
            .count()
    }

    /// Spec a container was created from (for testing).
    pub async fn spec_of(&self, id: &ContainerId) -> Option<ContainerSpec> {
        self.containers.read().await.get(id).map(|c| c.spec.clone())
    }

    async fn enter(&self, operation: MockOperation) -> DriverResult<()> {
        if let Some(delay) = self.delays.get(&operation) {
            tokio::time::sleep(*delay).await;
        }

        let injected = self
            .failures
            .write()
            .await
            .get_mut(&operation)
            .and_then(VecDeque::pop_front);

        match injected {
            Some(err) => {
                debug!("MockDriver: Injected failure for {:?}: {}", operation, err);
                Err(err)
            }
            None => Ok(()),
        }
    }

    async fn leave(&self, operation: MockOperation) -> DriverResult<()> {
        let lost = self
            .lost_replies
            .write()
            .await
            .get_mut(&operation)
            .and_then(VecDeque::pop_front);

        match lost {
            Some(err) => {
                debug!("MockDriver: Dropping reply of {:?}: {}", operation, err);
                Err(err)
            }
            None => Ok(()),
        }
    }

    fn allocate_ports(&self, declared: &NamedPorts) -> BoundPorts {
        declared
            .iter()
            .map(|(name, spec)| {
                let port = spec
                    .host_port
                    .unwrap_or_else(|| self.next_port.fetch_add(1, Ordering::Relaxed));
                (
                    name.clone(),
                    BoundPort {
                        protocol: spec.protocol,
                        port,
                    },
                )
            })
            .collect()
    }
}

#[async_trait]
impl ContainerDriver for MockDriver {
    async fn create(&self, spec: &ContainerSpec) -> DriverResult<ContainerHandle> {
        self.enter(MockOperation::Create).await?;

        let mut containers = self.containers.write().await;
        if let Some(name) = &spec.name {
            let taken: Vec<ContainerId> = containers
                .values()
                .filter(|c| c.handle.name.as_ref() == Some(name))
                .map(|c| c.handle.id.clone())
                .collect();
            for id in taken {
                warn!(name = %name, "Container name in use, removing the previous container");
                containers.remove(&id);
            }
        }

        let id = format!("mock-container-{}", Uuid::new_v4());
        info!("MockDriver: Creating container {} from {}", id, spec.image);
        debug!("Container spec: {:?}", spec);

        let handle = ContainerHandle {
            id: id.clone(),
            name: spec.name.clone(),
            labels: spec.labels.clone(),
        };
        containers.insert(
            id,
            MockContainer {
                handle: handle.clone(),
                spec: spec.clone(),
                running: false,
                ports: BoundPorts::new(),
            },
        );
        drop(containers);

        self.leave(MockOperation::Create).await?;
        Ok(handle)
    }

    async fn start(&self, handle: &ContainerHandle) -> DriverResult<()> {
        self.enter(MockOperation::Start).await?;
        info!("MockDriver: Starting container {}", handle.id);

        let mut containers = self.containers.write().await;
        let container = containers
            .get_mut(&handle.id)
            .ok_or_else(|| DriverError::fatal(format!("no such container: {}", handle.id)))?;

        if container.ports.is_empty() {
            container.ports = self.allocate_ports(&container.spec.ports);
        }
        container.running = true;
        drop(containers);

        self.leave(MockOperation::Start).await
    }

    async fn address(&self, handle: &ContainerHandle, ports: &NamedPorts) -> DriverResult<Address> {
        self.enter(MockOperation::Address).await?;
        debug!("MockDriver: Resolving address of container {}", handle.id);

        let containers = self.containers.read().await;
        let container = containers
            .get(&handle.id)
            .ok_or_else(|| DriverError::fatal(format!("no such container: {}", handle.id)))?;

        if !container.running {
            return Err(DriverError::fatal(format!(
                "container {} is not running",
                handle.id
            )));
        }

        let mut address = Address::new(self.host.clone());
        for name in ports.keys() {
            let bound = container.ports.get(name).ok_or_else(|| {
                DriverError::fatal(format!("port {name} is not published by {}", handle.id))
            })?;
            address = address.with_port(name.clone(), *bound);
        }

        Ok(address)
    }

    async fn stop(&self, handle: &ContainerHandle) -> DriverResult<()> {
        self.enter(MockOperation::Stop).await?;
        info!("MockDriver: Stopping container {}", handle.id);

        if let Some(container) = self.containers.write().await.get_mut(&handle.id) {
            container.running = false;
        }
        self.leave(MockOperation::Stop).await
    }

    async fn remove(&self, handle: &ContainerHandle) -> DriverResult<()> {
        self.enter(MockOperation::Remove).await?;
        info!("MockDriver: Removing container {}", handle.id);

        self.containers.write().await.remove(&handle.id);
        self.leave(MockOperation::Remove).await
    }

    async fn list(&self, include_stopped: bool) -> DriverResult<Vec<ContainerHandle>> {
        self.enter(MockOperation::List).await?;
        debug!("MockDriver: Listing containers");

        let containers = self.containers.read().await;
        let mut handles: Vec<ContainerHandle> = containers
            .values()
            .filter(|c| include_stopped || c.running)
            .filter(|c| c.handle.labels.get(MANAGED_LABEL).map(String::as_str) == Some("true"))
            .map(|c| c.handle.clone())
            .collect();
        handles.sort_by(|a, b| a.id.cmp(&b.id));

        Ok(handles)
    }

    async fn logs(&self, handle: &ContainerHandle, tail: usize) -> DriverResult<Vec<String>> {
        self.enter(MockOperation::Logs).await?;

        if !self.containers.read().await.contains_key(&handle.id) {
            return Err(DriverError::fatal(format!("no such container: {}", handle.id)));
        }

        let skip = self.logs.len().saturating_sub(tail);
        Ok(self.logs[skip..].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use provisioner_shared_types::{PortSpec, DEFAULT_PORT};
    use std::collections::BTreeMap;

    fn create_test_spec() -> ContainerSpec {
        let mut ports = NamedPorts::new();
        ports.insert(DEFAULT_PORT.to_string(), PortSpec::tcp(6379));
        ports.insert("fixed".to_string(), PortSpec::tcp(49092).fixed());

        let mut labels = BTreeMap::new();
        labels.insert(MANAGED_LABEL.to_string(), "true".to_string());

        ContainerSpec {
            image: "docker.io/library/redis:6.0.9".to_string(),
            ports,
            labels,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_start_address() {
        let driver = MockDriver::new();
        let spec = create_test_spec();

        let handle = driver.create(&spec).await.unwrap();
        assert_eq!(driver.container_count().await, 1);
        assert_eq!(driver.running_count().await, 0);

        driver.start(&handle).await.unwrap();
        let address = driver.address(&handle, &spec.ports).await.unwrap();

        assert_eq!(address.host, "127.0.0.1");
        assert_eq!(address.port("fixed"), Some(49092));
        assert!(address.port(DEFAULT_PORT).unwrap() >= FIRST_MOCK_PORT);
    }

    #[tokio::test]
    async fn test_address_requires_running_container() {
        let driver = MockDriver::new();
        let spec = create_test_spec();
        let handle = driver.create(&spec).await.unwrap();

        let err = driver.address(&handle, &spec.ports).await.unwrap_err();
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_stop_and_remove_are_idempotent() {
        let driver = MockDriver::new();
        let handle = driver.create(&create_test_spec()).await.unwrap();
        driver.start(&handle).await.unwrap();

        driver.stop(&handle).await.unwrap();
        driver.stop(&handle).await.unwrap();
        driver.remove(&handle).await.unwrap();
        driver.remove(&handle).await.unwrap();

        assert_eq!(driver.container_count().await, 0);
    }

    #[tokio::test]
    async fn test_injected_failures_are_consumed_in_order() {
        let driver = MockDriver::new();
        driver
            .fail_on(MockOperation::Create, DriverError::transient("daemon busy"))
            .await;

        let err = driver.create(&create_test_spec()).await.unwrap_err();
        assert!(err.is_transient());
        assert!(driver.create(&create_test_spec()).await.is_ok());
    }

    #[tokio::test]
    async fn test_list_filters_stopped() {
        let driver = MockDriver::new();
        let spec = create_test_spec();
        let running = driver.create(&spec).await.unwrap();
        let _created = driver.create(&spec).await.unwrap();
        driver.start(&running).await.unwrap();

        assert_eq!(driver.list(false).await.unwrap(), vec![running]);
        assert_eq!(driver.list(true).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_name_replaces_previous() {
        let driver = MockDriver::new();
        let spec = ContainerSpec {
            name: Some("cache".to_string()),
            ..create_test_spec()
        };

        let first = driver.create(&spec).await.unwrap();
        let second = driver.create(&spec).await.unwrap();

        assert_eq!(driver.container_count().await, 1);
        assert!(driver.spec_of(&first.id).await.is_none());
        assert!(driver.spec_of(&second.id).await.is_some());
    }

    #[tokio::test]
    async fn test_lost_reply_still_creates() {
        let driver = MockDriver::new();
        driver
            .fail_after(MockOperation::Create, DriverError::transient("connection reset"))
            .await;

        let err = driver.create(&create_test_spec()).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(driver.container_count().await, 1);

        driver.create(&create_test_spec()).await.unwrap();
        assert_eq!(driver.container_count().await, 2);
    }

    #[tokio::test]
    async fn test_logs_tail() {
        let driver = MockDriver::new().with_logs(["one", "two", "three"]);
        let handle = driver.create(&create_test_spec()).await.unwrap();

        assert_eq!(driver.logs(&handle, 2).await.unwrap(), vec!["two", "three"]);
        assert_eq!(driver.logs(&handle, 10).await.unwrap().len(), 3);
    }
}
