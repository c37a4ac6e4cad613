use async_trait::async_trait;
use provisioner_shared_types::{Address, PortSpec, Preset, PresetKind, ProvisionError, DEFAULT_PORT};

use super::{endpoint, ensure_success, expect_preset, http_client};
use crate::error::ProbeFailure;
use crate::handler::{ImageSpec, PresetHandler};

/// Serves the cluster's kubeconfig over plain HTTP.
pub const KUBECONFIG_PORT: &str = "kubeconfig";
const DEFAULT_API_PORT: u16 = 48443;

/// k3s in a single privileged container. There is nothing to seed; the
/// cluster is usable once it hands out its kubeconfig.
pub struct KubernetesHandler;

#[async_trait]
impl PresetHandler for KubernetesHandler {
    fn kind(&self) -> PresetKind {
        PresetKind::Kubernetes
    }

    fn image_spec(&self, preset: &Preset) -> Result<ImageSpec, ProvisionError> {
        let p = expect_preset!(preset, Kubernetes, self.kind())?;
        let api_port = p.port.unwrap_or(DEFAULT_API_PORT);

        // the API server certificate names this port, so it is published 1:1
        Ok(ImageSpec::new("docker.io/orlangure/k3s", "latest")
            .with_port(DEFAULT_PORT, PortSpec::tcp(api_port).fixed())
            .with_port(KUBECONFIG_PORT, PortSpec::tcp(80))
            .with_env("K3S_API_HOST", "localhost")
            .with_env("K3S_API_PORT", api_port.to_string())
            .privileged())
    }

    fn validate(&self, preset: &Preset) -> Result<(), ProvisionError> {
        let p = expect_preset!(preset, Kubernetes, self.kind())?;
        match p.port {
            Some(port) if port < 1024 => Err(ProvisionError::validation(format!(
                "kubernetes: port {port} is privileged"
            ))),
            _ => Ok(()),
        }
    }

    async fn health_check(&self, _preset: &Preset, address: &Address) -> Result<(), ProbeFailure> {
        let client = http_client().map_err(ProbeFailure::context("http client"))?;
        let response = client
            .get(format!("http://{}/kubeconfig", endpoint(address, KUBECONFIG_PORT)?))
            .send()
            .await
            .map_err(ProbeFailure::context("kubeconfig"))?;
        let kubeconfig = ensure_success(response)
            .await
            .map_err(ProbeFailure::context("kubeconfig"))?
            .text()
            .await
            .map_err(ProbeFailure::context("kubeconfig"))?;

        if kubeconfig.trim().is_empty() {
            return Err(ProbeFailure::new("kubeconfig is not ready yet"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use provisioner_shared_types::KubernetesPreset;

    #[test]
    fn test_api_port_is_fixed_and_privileged() {
        let spec = KubernetesHandler
            .image_spec(&Preset::Kubernetes(KubernetesPreset::default()))
            .unwrap();
        assert!(spec.privileged);
        assert_eq!(spec.ports[DEFAULT_PORT].host_port, Some(48443));
        assert_eq!(spec.ports[KUBECONFIG_PORT].host_port, None);
        assert!(spec.env.contains(&"K3S_API_PORT=48443".to_string()));
    }

    #[test]
    fn test_custom_port() {
        let preset = Preset::Kubernetes(KubernetesPreset {
            port: Some(50443),
            ..Default::default()
        });
        let spec = KubernetesHandler.image_spec(&preset).unwrap();
        assert_eq!(spec.ports[DEFAULT_PORT].port, 50443);
        assert!(KubernetesHandler.validate(&preset).is_ok());

        let preset = Preset::Kubernetes(KubernetesPreset {
            port: Some(443),
            ..Default::default()
        });
        assert!(KubernetesHandler.validate(&preset).is_err());
    }
}
