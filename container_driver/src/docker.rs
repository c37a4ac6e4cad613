//! Docker Engine container driver.
//!
//! Talks to the local Docker daemon (or whatever `DOCKER_HOST` points at)
//! through `bollard`. Every container it creates carries the provisioner
//! labels so [`ContainerDriver::list`] only ever reports our own containers.
//!
//! # Error classification
//!
//! Daemon responses with a 5xx or 429 status, socket I/O errors and request
//! timeouts are reported as transient; everything else (unknown image, bad
//! config, 4xx) is fatal.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bollard::auth::DockerCredentials;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, ListContainersOptions, LogsOptions,
    RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::image::CreateImageOptions;
use bollard::models::{HostConfig, PortBinding};
use bollard::Docker;
use futures_util::stream::StreamExt;
use tracing::{debug, info, warn};

use container_driver_interface::{
    ContainerDriver, ContainerHandle, ContainerSpec, DriverError, DriverResult, MANAGED_LABEL,
};
use provisioner_shared_types::{Address, BoundPort, BoundPorts, NamedPorts};

/// Published port bindings as reported by container inspection.
type PublishedPorts = HashMap<String, Option<Vec<PortBinding>>>;

/// Configuration for DockerDriver.
#[derive(Debug, Clone)]
pub struct DockerDriverConfig {
    /// Host reported to callers (default: "127.0.0.1")
    pub host_addr: String,
    /// Interface published ports bind to (default: "127.0.0.1")
    pub bind_ip: String,
    /// Timeout for individual API calls, image pulls excluded (default: 30s)
    pub command_timeout: Duration,
    /// Grace period before the daemon sends SIGKILL (default: 10s)
    pub stop_timeout: Duration,
    /// Interval between inspections while waiting for ports (default: 250ms)
    pub poll_interval: Duration,
}

impl Default for DockerDriverConfig {
    fn default() -> Self {
        Self {
            host_addr: "127.0.0.1".to_string(),
            bind_ip: "127.0.0.1".to_string(),
            command_timeout: Duration::from_secs(30),
            stop_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(250),
        }
    }
}

/// Container driver backed by the Docker Engine API.
pub struct DockerDriver {
    docker: Docker,
    config: DockerDriverConfig,
}

impl DockerDriver {
    /// Connect to the daemon using local defaults and verify it answers.
    pub async fn connect(config: DockerDriverConfig) -> DriverResult<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| DriverError::fatal(format!("cannot connect to docker: {e}")))?;

        let driver = Self::with_client(docker, config);
        let version = driver.call("version", driver.docker.version()).await?;
        info!(
            version = version.version.as_deref().unwrap_or("unknown"),
            api_version = version.api_version.as_deref().unwrap_or("unknown"),
            "DockerDriver connected"
        );

        Ok(driver)
    }

    pub fn with_client(docker: Docker, config: DockerDriverConfig) -> Self {
        Self { docker, config }
    }

    // ==================== Docker API Helper Methods ====================

    /// Run a daemon call under the command timeout, leaving the daemon's
    /// answer unclassified.
    async fn call_raw<T, F>(&self, operation: &str, fut: F) -> DriverResult<Result<T, BollardError>>
    where
        F: std::future::Future<Output = Result<T, BollardError>>,
    {
        tokio::time::timeout(self.config.command_timeout, fut)
            .await
            .map_err(|_| {
                DriverError::transient(format!(
                    "docker {operation} did not answer within {:?}",
                    self.config.command_timeout
                ))
            })
    }

    async fn call<T, F>(&self, operation: &str, fut: F) -> DriverResult<T>
    where
        F: std::future::Future<Output = Result<T, BollardError>>,
    {
        self.call_raw(operation, fut)
            .await?
            .map_err(|e| classify(operation, e))
    }

    async fn ensure_image(&self, spec: &ContainerSpec) -> DriverResult<()> {
        if spec.use_local_images_first && self.docker.inspect_image(&spec.image).await.is_ok() {
            debug!(image = %spec.image, "Using local image");
            return Ok(());
        }

        info!(image = %spec.image, "Pulling image");
        let options = CreateImageOptions {
            from_image: spec.image.as_str(),
            ..Default::default()
        };
        let credentials = spec.auth.as_ref().map(|auth| DockerCredentials {
            auth: Some(auth.clone()),
            ..Default::default()
        });

        let mut stream = self.docker.create_image(Some(options), None, credentials);
        while let Some(progress) = stream.next().await {
            let progress = progress.map_err(|e| classify("pull", e))?;
            if let Some(status) = progress.status {
                debug!(image = %spec.image, status = %status, "Pull progress");
            }
        }

        Ok(())
    }

    fn container_config(&self, spec: &ContainerSpec) -> Config<String> {
        let mut exposed_ports = HashMap::new();
        let mut port_bindings = HashMap::new();

        for port in spec.ports.values() {
            let key = port.runtime_key();
            exposed_ports.insert(key.clone(), HashMap::new());
            port_bindings.insert(
                key,
                Some(vec![PortBinding {
                    host_ip: Some(self.config.bind_ip.clone()),
                    host_port: Some(port.host_port.map(|p| p.to_string()).unwrap_or_default()),
                }]),
            );
        }

        let host_config = HostConfig {
            port_bindings: Some(port_bindings),
            privileged: Some(spec.privileged),
            ..Default::default()
        };

        Config {
            image: Some(spec.image.clone()),
            env: Some(spec.env.clone()),
            cmd: spec.cmd.clone(),
            exposed_ports: Some(exposed_ports),
            labels: Some(spec.labels.clone().into_iter().collect()),
            host_config: Some(host_config),
            ..Default::default()
        }
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, BollardError> {
        let options = spec.name.as_deref().map(|name| CreateContainerOptions {
            name,
            ..Default::default()
        });
        let response = self
            .docker
            .create_container(options, self.container_config(spec))
            .await?;

        for warning in &response.warnings {
            warn!(container = %response.id, "Docker warning: {}", warning);
        }

        Ok(response.id)
    }
}

#[async_trait]
impl ContainerDriver for DockerDriver {
    async fn create(&self, spec: &ContainerSpec) -> DriverResult<ContainerHandle> {
        self.ensure_image(spec).await?;

        let id = match self.call_raw("create", self.create_container(spec)).await? {
            Ok(id) => id,
            Err(BollardError::DockerResponseServerError { status_code: 409, .. })
                if spec.name.is_some() =>
            {
                // Name taken by a leftover container: replace it once.
                let name = spec.name.as_deref().unwrap_or_default();
                warn!(name, "Container name in use, removing the previous container");
                self.call(
                    "remove",
                    self.docker.remove_container(
                        name,
                        Some(RemoveContainerOptions {
                            force: true,
                            v: true,
                            ..Default::default()
                        }),
                    ),
                )
                .await?;
                self.call("create", self.create_container(spec)).await?
            }
            Err(e) => return Err(classify("create", e)),
        };

        info!(container = %id, image = %spec.image, "DockerDriver: Created container");
        Ok(ContainerHandle {
            id,
            name: spec.name.clone(),
            labels: spec.labels.clone(),
        })
    }

    async fn start(&self, handle: &ContainerHandle) -> DriverResult<()> {
        self.call(
            "start",
            self.docker
                .start_container(&handle.id, None::<StartContainerOptions<String>>),
        )
        .await?;

        debug!(container = %handle.id, "DockerDriver: Started container");
        Ok(())
    }

    async fn address(&self, handle: &ContainerHandle, ports: &NamedPorts) -> DriverResult<Address> {
        loop {
            let info = self
                .call(
                    "inspect",
                    self.docker
                        .inspect_container(&handle.id, None::<InspectContainerOptions>),
                )
                .await?;

            if let Some(state) = &info.state {
                if state.running == Some(false) {
                    return Err(DriverError::fatal(format!(
                        "container {} is not running (exit code {:?})",
                        handle.id, state.exit_code
                    )));
                }
            }

            let published = info
                .network_settings
                .and_then(|settings| settings.ports)
                .unwrap_or_default();

            if let Some(bound) = bound_ports(&published, ports) {
                return Ok(Address {
                    host: self.config.host_addr.clone(),
                    ports: bound,
                });
            }

            debug!(container = %handle.id, "Waiting for port allocation");
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    async fn stop(&self, handle: &ContainerHandle) -> DriverResult<()> {
        info!("DockerDriver: Stopping container {}", handle.id);

        let options = StopContainerOptions {
            t: i64::try_from(self.config.stop_timeout.as_secs()).unwrap_or(i64::MAX),
        };
        match self
            .call_raw("stop", self.docker.stop_container(&handle.id, Some(options)))
            .await?
        {
            Ok(()) => Ok(()),
            Err(BollardError::DockerResponseServerError {
                status_code: 304 | 404,
                ..
            }) => {
                debug!(container = %handle.id, "Container already stopped or gone");
                Ok(())
            }
            Err(e) => Err(classify("stop", e)),
        }
    }

    async fn remove(&self, handle: &ContainerHandle) -> DriverResult<()> {
        info!("DockerDriver: Removing container {}", handle.id);

        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };
        match self
            .call_raw("remove", self.docker.remove_container(&handle.id, Some(options)))
            .await?
        {
            Ok(()) => Ok(()),
            Err(BollardError::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(()),
            Err(e) => Err(classify("remove", e)),
        }
    }

    async fn list(&self, include_stopped: bool) -> DriverResult<Vec<ContainerHandle>> {
        let mut filters = HashMap::new();
        filters.insert("label".to_string(), vec![format!("{MANAGED_LABEL}=true")]);

        let options = ListContainersOptions {
            all: include_stopped,
            filters,
            ..Default::default()
        };
        let summaries = self
            .call("list", self.docker.list_containers(Some(options)))
            .await?;

        Ok(summaries
            .into_iter()
            .filter_map(|summary| {
                let id = summary.id?;
                let name = summary
                    .names
                    .and_then(|names| names.into_iter().next())
                    .map(|name| name.trim_start_matches('/').to_string());
                Some(ContainerHandle {
                    id,
                    name,
                    labels: summary.labels.unwrap_or_default().into_iter().collect(),
                })
            })
            .collect())
    }

    async fn logs(&self, handle: &ContainerHandle, tail: usize) -> DriverResult<Vec<String>> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            tail: tail.to_string(),
            ..Default::default()
        };

        let mut stream = self.docker.logs(&handle.id, Some(options));
        let mut lines = Vec::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| classify("logs", e))?;
            lines.extend(
                String::from_utf8_lossy(&chunk.into_bytes())
                    .lines()
                    .map(str::to_string),
            );
        }

        Ok(lines)
    }
}

// ==================== Helper Functions ====================

/// Map a bollard error onto the transient/fatal split.
fn classify(operation: &str, err: BollardError) -> DriverError {
    let message = format!("docker {operation} failed: {err}");
    match &err {
        BollardError::DockerResponseServerError { status_code, .. }
            if *status_code >= 500 || *status_code == 429 =>
        {
            DriverError::transient(message)
        }
        BollardError::DockerResponseServerError { .. } => DriverError::fatal(message),
        BollardError::RequestTimeoutError | BollardError::IOError { .. } => {
            DriverError::transient(message)
        }
        _ => DriverError::fatal(message),
    }
}

/// Host ports for every declared port, or `None` while any is still unbound.
fn bound_ports(published: &PublishedPorts, declared: &NamedPorts) -> Option<BoundPorts> {
    let mut bound = BoundPorts::new();

    for (name, spec) in declared {
        let bindings = published.get(&spec.runtime_key())?.as_ref()?;
        let port = bindings
            .iter()
            // Docker reports both an IPv4 and an IPv6 binding on dual-stack hosts
            .filter(|binding| {
                binding
                    .host_ip
                    .as_deref()
                    .map_or(true, |ip| !ip.contains(':'))
            })
            .find_map(|binding| {
                binding
                    .host_port
                    .as_deref()
                    .and_then(|port| port.parse::<u16>().ok())
                    .filter(|port| *port != 0)
            })?;

        bound.insert(
            name.clone(),
            BoundPort {
                protocol: spec.protocol,
                port,
            },
        );
    }

    Some(bound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use provisioner_shared_types::{PortSpec, Protocol};

    fn binding(ip: &str, port: &str) -> PortBinding {
        PortBinding {
            host_ip: Some(ip.to_string()),
            host_port: Some(port.to_string()),
        }
    }

    fn declared() -> NamedPorts {
        let mut ports = NamedPorts::new();
        ports.insert("default".to_string(), PortSpec::tcp(6379));
        ports
    }

    #[test]
    fn test_config_default() {
        let config = DockerDriverConfig::default();
        assert_eq!(config.host_addr, "127.0.0.1");
        assert_eq!(config.stop_timeout, Duration::from_secs(10));
        assert_eq!(config.poll_interval, Duration::from_millis(250));
    }

    #[test]
    fn test_bound_ports_prefers_ipv4() {
        let mut published = PublishedPorts::new();
        published.insert(
            "6379/tcp".to_string(),
            Some(vec![binding("::", "49154"), binding("127.0.0.1", "49153")]),
        );

        let bound = bound_ports(&published, &declared()).unwrap();
        assert_eq!(
            bound.get("default"),
            Some(&BoundPort {
                protocol: Protocol::Tcp,
                port: 49153
            })
        );
    }

    #[test]
    fn test_bound_ports_waits_for_allocation() {
        let mut published = PublishedPorts::new();
        assert!(bound_ports(&published, &declared()).is_none());

        published.insert("6379/tcp".to_string(), None);
        assert!(bound_ports(&published, &declared()).is_none());

        published.insert("6379/tcp".to_string(), Some(vec![binding("127.0.0.1", "0")]));
        assert!(bound_ports(&published, &declared()).is_none());
    }

    #[test]
    fn test_classify_server_errors() {
        let unavailable = classify(
            "pull",
            BollardError::DockerResponseServerError {
                status_code: 503,
                message: "registry unavailable".to_string(),
            },
        );
        assert!(unavailable.is_transient());

        let missing = classify(
            "pull",
            BollardError::DockerResponseServerError {
                status_code: 404,
                message: "manifest unknown".to_string(),
            },
        );
        assert!(!missing.is_transient());
        assert!(missing.message.contains("manifest unknown"));
    }

    #[test]
    fn test_classify_timeout_is_transient() {
        assert!(classify("start", BollardError::RequestTimeoutError).is_transient());
    }
}
