//! Key/value caches: Redis and Memcached.

use std::collections::BTreeMap;

use async_trait::async_trait;
use base64::prelude::*;
use provisioner_shared_types::{Address, PortSpec, Preset, PresetKind, ProvisionError, DEFAULT_PORT};
use tracing::info;

use super::{default_endpoint, expect_preset};
use crate::error::{ProbeFailure, SeedError};
use crate::handler::{ImageSpec, PresetHandler};

fn decode_byte_values(
    kind: PresetKind,
    values: &BTreeMap<String, String>,
) -> Result<Vec<(String, Vec<u8>)>, ProvisionError> {
    values
        .iter()
        .map(|(key, encoded)| {
            BASE64_STANDARD
                .decode(encoded)
                .map(|bytes| (key.clone(), bytes))
                .map_err(|e| {
                    ProvisionError::validation(format!(
                        "{kind}: byte value for {key:?} is not valid base64: {e}"
                    ))
                })
        })
        .collect()
}

/// String form stored for a JSON scalar; strings are stored without quotes.
fn scalar_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

// ==================== Redis ====================

pub struct RedisHandler;

impl RedisHandler {
    async fn connect(address: &Address) -> Result<redis::aio::MultiplexedConnection, String> {
        let endpoint = default_endpoint(address).map_err(|e| e.to_string())?;
        let client = redis::Client::open(format!("redis://{endpoint}/")).map_err(|e| e.to_string())?;
        client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| e.to_string())
    }
}

#[async_trait]
impl PresetHandler for RedisHandler {
    fn kind(&self) -> PresetKind {
        PresetKind::Redis
    }

    fn image_spec(&self, preset: &Preset) -> Result<ImageSpec, ProvisionError> {
        expect_preset!(preset, Redis, self.kind())?;
        Ok(ImageSpec::new("docker.io/library/redis", "6.0.9")
            .with_port(DEFAULT_PORT, PortSpec::tcp(6379)))
    }

    fn validate(&self, preset: &Preset) -> Result<(), ProvisionError> {
        let p = expect_preset!(preset, Redis, self.kind())?;
        for (key, value) in &p.values {
            if scalar_string(value).is_none() {
                return Err(ProvisionError::validation(format!(
                    "redis: value for {key:?} must be a string, number or boolean"
                )));
            }
        }
        decode_byte_values(self.kind(), &p.byte_values).map(|_| ())
    }

    async fn health_check(&self, _preset: &Preset, address: &Address) -> Result<(), ProbeFailure> {
        let mut con = Self::connect(address).await.map_err(ProbeFailure::new)?;
        let pong: String = redis::cmd("PING")
            .query_async(&mut con)
            .await
            .map_err(ProbeFailure::context("ping"))?;

        if pong != "PONG" {
            return Err(ProbeFailure::new(format!("unexpected ping reply {pong:?}")));
        }
        Ok(())
    }

    /// All keys go in one MULTI/EXEC transaction.
    async fn seed(&self, preset: &Preset, address: &Address) -> Result<(), SeedError> {
        let p = expect_preset!(preset, Redis, self.kind())?;
        if p.values.is_empty() && p.byte_values.is_empty() {
            return Ok(());
        }

        let kind = self.kind();
        let byte_values = decode_byte_values(kind, &p.byte_values).map_err(SeedError::rejected(kind))?;

        let mut pipe = redis::pipe();
        pipe.atomic();
        for (key, value) in &p.values {
            let value = scalar_string(value).unwrap_or_else(|| value.to_string());
            pipe.set(key, value).ignore();
        }
        for (key, bytes) in &byte_values {
            pipe.set(key, bytes.as_slice()).ignore();
        }

        let mut con = Self::connect(address)
            .await
            .map_err(SeedError::connection(kind))?;
        let _: () = pipe
            .query_async(&mut con)
            .await
            .map_err(SeedError::rejected(kind))?;

        info!(keys = p.values.len() + byte_values.len(), "Redis seeded");
        Ok(())
    }
}

// ==================== Memcached ====================

pub struct MemcachedHandler;

impl MemcachedHandler {
    fn connect(endpoint: &str) -> Result<memcache::Client, memcache::MemcacheError> {
        memcache::connect(format!("memcache://{endpoint}?timeout=2"))
    }
}

#[async_trait]
impl PresetHandler for MemcachedHandler {
    fn kind(&self) -> PresetKind {
        PresetKind::Memcached
    }

    fn image_spec(&self, preset: &Preset) -> Result<ImageSpec, ProvisionError> {
        expect_preset!(preset, Memcached, self.kind())?;
        Ok(ImageSpec::new("docker.io/library/memcached", "1.6.9")
            .with_port(DEFAULT_PORT, PortSpec::tcp(11211)))
    }

    fn validate(&self, preset: &Preset) -> Result<(), ProvisionError> {
        let p = expect_preset!(preset, Memcached, self.kind())?;
        decode_byte_values(self.kind(), &p.byte_values).map(|_| ())
    }

    async fn health_check(&self, _preset: &Preset, address: &Address) -> Result<(), ProbeFailure> {
        let endpoint = default_endpoint(address)?;

        // the memcache client is blocking
        tokio::task::spawn_blocking(move || {
            Self::connect(&endpoint)
                .and_then(|client| client.version())
                .map(|_| ())
                .map_err(ProbeFailure::context("memcached version"))
        })
        .await
        .map_err(ProbeFailure::context("memcached probe task"))?
    }

    async fn seed(&self, preset: &Preset, address: &Address) -> Result<(), SeedError> {
        let p = expect_preset!(preset, Memcached, self.kind())?;
        if p.values.is_empty() && p.byte_values.is_empty() {
            return Ok(());
        }

        let kind = self.kind();
        let endpoint = default_endpoint(address).map_err(SeedError::connection(kind))?;
        let values = p.values.clone();
        let byte_values = decode_byte_values(kind, &p.byte_values).map_err(SeedError::rejected(kind))?;
        let count = values.len() + byte_values.len();

        tokio::task::spawn_blocking(move || {
            let client = Self::connect(&endpoint).map_err(SeedError::connection(kind))?;
            for (key, value) in &values {
                client
                    .set(key, value.as_str(), 0)
                    .map_err(SeedError::rejected(kind))?;
            }
            for (key, bytes) in &byte_values {
                client
                    .set(key, bytes.as_slice(), 0)
                    .map_err(SeedError::rejected(kind))?;
            }
            Ok::<_, SeedError>(())
        })
        .await
        .map_err(SeedError::connection(kind))??;

        info!(keys = count, "Memcached seeded");
        Ok(())
    }
}
