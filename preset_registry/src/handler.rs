use async_trait::async_trait;
use provisioner_shared_types::{Address, NamedPorts, PortSpec, Preset, PresetKind, ProvisionError};

use crate::error::{ProbeFailure, SeedError};

/// Image, ports and startup configuration a preset kind runs with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSpec {
    /// Repository without tag, e.g. `docker.io/library/redis`.
    pub image: String,
    pub default_tag: String,
    pub ports: NamedPorts,
    /// `KEY=VALUE` entries.
    pub env: Vec<String>,
    pub cmd: Option<Vec<String>>,
    pub privileged: bool,
}

impl ImageSpec {
    pub fn new(image: impl Into<String>, default_tag: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            default_tag: default_tag.into(),
            ports: NamedPorts::new(),
            env: Vec::new(),
            cmd: None,
            privileged: false,
        }
    }

    pub fn with_port(mut self, name: impl Into<String>, port: PortSpec) -> Self {
        self.ports.insert(name.into(), port);
        self
    }

    pub fn with_env(mut self, key: &str, value: impl AsRef<str>) -> Self {
        self.env.push(format!("{}={}", key, value.as_ref()));
        self
    }

    pub fn with_cmd<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cmd = Some(args.into_iter().map(Into::into).collect());
        self
    }

    pub fn privileged(mut self) -> Self {
        self.privileged = true;
        self
    }

    /// Full image reference for `tag`, falling back to the default tag.
    pub fn reference(&self, tag: Option<&str>) -> String {
        let tag = tag.filter(|t| !t.is_empty()).unwrap_or(&self.default_tag);
        format!("{}:{}", self.image, tag)
    }
}

/// Everything the provisioner knows about one preset kind.
///
/// Handlers are stateless and shared between concurrent provisioning
/// pipelines.
#[async_trait]
pub trait PresetHandler: Send + Sync {
    fn kind(&self) -> PresetKind;

    /// Image and startup configuration for this preset.
    fn image_spec(&self, preset: &Preset) -> Result<ImageSpec, ProvisionError>;

    /// Kind-specific request checks, run before any container is created.
    fn validate(&self, preset: &Preset) -> Result<(), ProvisionError> {
        let _ = preset;
        Ok(())
    }

    /// Application-level handshake, polled until it passes.
    async fn health_check(&self, preset: &Preset, address: &Address) -> Result<(), ProbeFailure> {
        let _ = (preset, address);
        Ok(())
    }

    /// Load the preset's seed data into a ready container.
    async fn seed(&self, preset: &Preset, address: &Address) -> Result<(), SeedError> {
        let _ = (preset, address);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_prefers_explicit_tag() {
        let spec = ImageSpec::new("docker.io/library/redis", "6.0.9");
        assert_eq!(spec.reference(None), "docker.io/library/redis:6.0.9");
        assert_eq!(spec.reference(Some("")), "docker.io/library/redis:6.0.9");
        assert_eq!(spec.reference(Some("5")), "docker.io/library/redis:5");
    }

    #[test]
    fn test_builder_collects_env() {
        let spec = ImageSpec::new("docker.io/library/postgres", "12")
            .with_port("default", PortSpec::tcp(5432))
            .with_env("POSTGRES_PASSWORD", "password");

        assert_eq!(spec.env, vec!["POSTGRES_PASSWORD=password"]);
        assert_eq!(spec.ports["default"].port, 5432);
        assert!(!spec.privileged);
    }
}
