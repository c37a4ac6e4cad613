use std::collections::BTreeMap;

use async_trait::async_trait;
use provisioner_shared_types::{
    Address, LocalstackPreset, PortSpec, Preset, PresetKind, ProvisionError,
};
use serde::Deserialize;
use tracing::{debug, info};

use super::{endpoint, ensure_success, expect_preset, http_client, seed_endpoint};
use crate::error::{ProbeFailure, SeedError};
use crate::handler::{ImageSpec, PresetHandler};
use crate::seed_files::{data_dirs, files_recursive};

const API_PORT: &str = "api";
const WEB_PORT: &str = "web";
const DEFAULT_VERSION: &str = "0.12.2";
const S3: &str = "s3";

/// Sub-services that can be enabled through `services`.
pub const LOCALSTACK_SERVICES: &[&str] = &[
    "apigateway",
    "cloudformation",
    "cloudwatch",
    "logs",
    "events",
    "dynamodb",
    "dynamodbstreams",
    "ec2",
    "es",
    "firehose",
    "iam",
    "kinesis",
    "kms",
    "lambda",
    "redshift",
    "route53",
    "s3",
    "secretsmanager",
    "ses",
    "sns",
    "sqs",
    "ssm",
    "sts",
    "stepfunctions",
];

pub struct LocalstackHandler;

/// Before 0.11.3 the health endpoint lived on the web port.
fn uses_web_port_for_health(version: &str) -> bool {
    let parts: Vec<u32> = match version
        .split('.')
        .map(str::parse::<u32>)
        .collect::<Result<Vec<_>, _>>()
    {
        Ok(parts) if parts.len() == 3 => parts,
        _ => return false,
    };

    match parts.as_slice() {
        [0, minor, _] if *minor < 11 => true,
        [0, 11, patch] => *patch <= 2,
        _ => false,
    }
}

#[derive(Debug, Deserialize)]
struct HealthResponse {
    #[serde(default)]
    services: BTreeMap<String, String>,
}

#[async_trait]
impl PresetHandler for LocalstackHandler {
    fn kind(&self) -> PresetKind {
        PresetKind::Localstack
    }

    fn image_spec(&self, preset: &Preset) -> Result<ImageSpec, ProvisionError> {
        let p = expect_preset!(preset, Localstack, self.kind())?;
        Ok(ImageSpec::new("docker.io/localstack/localstack", DEFAULT_VERSION)
            .with_port(API_PORT, PortSpec::tcp(4566))
            .with_port(WEB_PORT, PortSpec::tcp(8080))
            .with_env("SERVICES", p.services.join(",")))
    }

    fn validate(&self, preset: &Preset) -> Result<(), ProvisionError> {
        let p = expect_preset!(preset, Localstack, self.kind())?;
        if let Some(unknown) = p
            .services
            .iter()
            .find(|s| !LOCALSTACK_SERVICES.contains(&s.as_str()))
        {
            return Err(ProvisionError::validation(format!(
                "localstack: unknown service {unknown:?}"
            )));
        }
        Ok(())
    }

    /// Every requested service must report itself running.
    async fn health_check(&self, preset: &Preset, address: &Address) -> Result<(), ProbeFailure> {
        let p = expect_preset!(preset, Localstack, self.kind())?;
        let version = p.version.as_deref().unwrap_or(DEFAULT_VERSION);
        let port = if uses_web_port_for_health(version) {
            WEB_PORT
        } else {
            API_PORT
        };

        let client = http_client().map_err(ProbeFailure::context("http client"))?;
        let response = client
            .get(format!("http://{}/health", endpoint(address, port)?))
            .send()
            .await
            .map_err(ProbeFailure::context("health"))?;
        let health: HealthResponse = ensure_success(response)
            .await
            .map_err(ProbeFailure::context("health"))?
            .json()
            .await
            .map_err(ProbeFailure::context("health body"))?;

        for service in &p.services {
            match health.services.get(service).map(String::as_str) {
                Some("running") | Some("available") => {}
                status => {
                    return Err(ProbeFailure::new(format!(
                        "service {service} is not running ({})",
                        status.unwrap_or("absent")
                    )))
                }
            }
        }
        Ok(())
    }

    /// With `s3` enabled, each top-level directory of `s3_path` becomes a
    /// bucket holding its files under their relative paths.
    async fn seed(&self, preset: &Preset, address: &Address) -> Result<(), SeedError> {
        let p: &LocalstackPreset = expect_preset!(preset, Localstack, self.kind())?;
        let Some(root) = &p.s3_path else {
            return Ok(());
        };
        if !p.services.iter().any(|s| s == S3) {
            debug!("s3 is not enabled, skipping s3_path");
            return Ok(());
        }

        let kind = self.kind();
        let api = seed_endpoint(address, API_PORT, kind)?;
        let client = http_client().map_err(SeedError::connection(kind))?;

        let mut objects = 0;
        for bucket in data_dirs(root)? {
            let response = client
                .put(format!("http://{api}/{}", bucket.name))
                .send()
                .await
                .map_err(SeedError::connection(kind))?;
            ensure_success(response).await.map_err(SeedError::rejected(kind))?;

            let bucket_dir = root.join(&bucket.name);
            for (key, path) in files_recursive(&bucket_dir)? {
                let body = std::fs::read(&path).map_err(SeedError::file(&path))?;
                let response = client
                    .put(format!("http://{api}/{}/{key}", bucket.name))
                    .body(body)
                    .send()
                    .await
                    .map_err(SeedError::connection(kind))?;
                ensure_success(response).await.map_err(SeedError::rejected(kind))?;
                objects += 1;
            }
        }

        info!(objects, "Localstack s3 seeded");
        Ok(())
    }
}
