//! Server configuration: an optional TOML file, overridden by flags and
//! `PROVISIONER_*` environment variables.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;
use thiserror::Error;

use container_driver::DockerDriverConfig;
use observability::{parse_level, TracingConfig, TracingError};
use provisioner_core::api::{ApiServerConfig, DEFAULT_API_PORT};
use provisioner_core::LifecycleConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("can't read config file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error(transparent)]
    LogLevel(#[from] TracingError),

    #[error("{0}")]
    Invalid(String),
}

#[derive(Debug, Default, Parser)]
#[command(name = "provisioner-api")]
#[command(version)]
#[command(about = "Ephemeral backing-service containers over HTTP", long_about = None)]
pub struct Cli {
    /// TOML configuration file
    #[arg(short, long, env = "PROVISIONER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Address the HTTP server listens on
    #[arg(long, env = "PROVISIONER_BIND_ADDR")]
    pub bind_addr: Option<SocketAddr>,

    /// Host reported to callers in every address
    #[arg(long, env = "PROVISIONER_HOST_ADDR")]
    pub host_addr: Option<String>,

    /// Publish container ports on all interfaces instead of loopback
    #[arg(long, env = "PROVISIONER_IN_DOCKER", num_args = 0..=1, default_missing_value = "true")]
    pub in_docker: Option<bool>,

    /// trace, debug, info, warn or error
    #[arg(long, env = "PROVISIONER_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Log one JSON object per line
    #[arg(long, env = "PROVISIONER_LOG_JSON", num_args = 0..=1, default_missing_value = "true")]
    pub log_json: Option<bool>,
}

/// Fully resolved server settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub host_addr: String,
    pub in_docker: bool,
    pub log_level: String,
    pub log_json: bool,
    /// Default budget for pull, create, start and port binding.
    pub start_timeout_secs: u64,
    /// Default readiness budget.
    pub wait_timeout_secs: u64,
    /// Container log lines attached to failed provisions.
    pub log_tail: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_API_PORT)),
            host_addr: "127.0.0.1".to_string(),
            in_docker: false,
            log_level: "info".to_string(),
            log_json: false,
            start_timeout_secs: 300,
            wait_timeout_secs: 60,
            log_tail: 50,
        }
    }
}

impl ServerConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// File settings (or defaults) with every flag or variable that was set
    /// applied on top.
    pub fn resolve(cli: &Cli) -> Result<Self, ConfigError> {
        let mut config = match &cli.config {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };

        if let Some(bind_addr) = cli.bind_addr {
            config.bind_addr = bind_addr;
        }
        if let Some(host_addr) = &cli.host_addr {
            config.host_addr = host_addr.clone();
        }
        if let Some(in_docker) = cli.in_docker {
            config.in_docker = in_docker;
        }
        if let Some(log_level) = &cli.log_level {
            config.log_level = log_level.clone();
        }
        if let Some(log_json) = cli.log_json {
            config.log_json = log_json;
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        parse_level(&self.log_level)?;
        if self.host_addr.trim().is_empty() {
            return Err(ConfigError::Invalid("host_addr must not be empty".to_string()));
        }
        if self.start_timeout_secs == 0 || self.wait_timeout_secs == 0 {
            return Err(ConfigError::Invalid("timeouts must be at least one second".to_string()));
        }
        Ok(())
    }

    pub fn tracing_config(&self) -> Result<TracingConfig, ConfigError> {
        Ok(TracingConfig::new("provisioner")
            .with_level(parse_level(&self.log_level)?)
            .with_json(self.log_json))
    }

    /// Interface published container ports bind to.
    pub fn bind_ip(&self) -> IpAddr {
        if self.in_docker {
            IpAddr::V4(Ipv4Addr::UNSPECIFIED)
        } else {
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        }
    }

    pub fn driver_config(&self) -> DockerDriverConfig {
        DockerDriverConfig {
            host_addr: self.host_addr.clone(),
            bind_ip: self.bind_ip().to_string(),
            ..Default::default()
        }
    }

    pub fn lifecycle_config(&self) -> LifecycleConfig {
        LifecycleConfig {
            start_timeout: Duration::from_secs(self.start_timeout_secs),
            wait_timeout: Duration::from_secs(self.wait_timeout_secs),
            log_tail: self.log_tail,
            ..Default::default()
        }
    }

    pub fn api_config(&self) -> ApiServerConfig {
        ApiServerConfig {
            bind_addr: self.bind_addr,
        }
    }
}
