//! Declared container ports and the host addresses they end up bound to.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Name of the port for presets exposing a single endpoint.
pub const DEFAULT_PORT: &str = "default";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => f.write_str("tcp"),
            Protocol::Udp => f.write_str("udp"),
        }
    }
}

/// A port a preset wants published.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortSpec {
    pub protocol: Protocol,
    /// Port inside the container.
    pub port: u16,
    /// Fixed host port; `None` lets the runtime pick one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_port: Option<u16>,
}

impl PortSpec {
    pub fn tcp(port: u16) -> Self {
        Self {
            protocol: Protocol::Tcp,
            port,
            host_port: None,
        }
    }

    /// Publish on the same port number on the host.
    pub fn fixed(mut self) -> Self {
        self.host_port = Some(self.port);
        self
    }

    /// Key the container runtime uses for this port, e.g. `6379/tcp`.
    pub fn runtime_key(&self) -> String {
        format!("{}/{}", self.port, self.protocol)
    }
}

/// Logical port name -> declared port.
pub type NamedPorts = BTreeMap<String, PortSpec>;

/// A port reachable from the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundPort {
    pub protocol: Protocol,
    pub port: u16,
}

/// Logical port name -> host port.
pub type BoundPorts = BTreeMap<String, BoundPort>;

/// Where a started container can be reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub host: String,
    pub ports: BoundPorts,
}

impl Address {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ports: BoundPorts::new(),
        }
    }

    pub fn with_port(mut self, name: impl Into<String>, port: BoundPort) -> Self {
        self.ports.insert(name.into(), port);
        self
    }

    pub fn port(&self, name: &str) -> Option<u16> {
        self.ports.get(name).map(|bound| bound.port)
    }

    /// `host:port` for the named port.
    pub fn endpoint(&self, name: &str) -> Option<String> {
        self.port(name).map(|port| format!("{}:{}", self.host, port))
    }

    pub fn default_endpoint(&self) -> Option<String> {
        self.endpoint(DEFAULT_PORT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_key() {
        assert_eq!(PortSpec::tcp(6379).runtime_key(), "6379/tcp");
    }

    #[test]
    fn test_fixed_port_uses_container_port() {
        let spec = PortSpec::tcp(49092).fixed();
        assert_eq!(spec.host_port, Some(49092));
    }

    #[test]
    fn test_endpoint_lookup() {
        let address = Address::new("127.0.0.1").with_port(
            DEFAULT_PORT,
            BoundPort {
                protocol: Protocol::Tcp,
                port: 32768,
            },
        );
        assert_eq!(address.default_endpoint().as_deref(), Some("127.0.0.1:32768"));
        assert_eq!(address.endpoint("web"), None);
    }

    #[test]
    fn test_bound_ports_json_shape() {
        let address = Address::new("127.0.0.1").with_port(
            DEFAULT_PORT,
            BoundPort {
                protocol: Protocol::Tcp,
                port: 5432,
            },
        );
        let json = serde_json::to_value(&address.ports).unwrap();
        assert_eq!(json, serde_json::json!({"default": {"protocol": "tcp", "port": 5432}}));
    }
}
