//! Built-in preset handlers, one module per service family.

use std::sync::Arc;
use std::time::Duration;

use provisioner_shared_types::{Address, PresetKind, DEFAULT_PORT};

use crate::error::{ProbeFailure, SeedError};
use crate::handler::PresetHandler;

mod cache;
mod elastic;
mod kubernetes;
mod localstack;
mod messaging;
mod mongo;
mod splunk;
mod sql;

pub use cache::{MemcachedHandler, RedisHandler};
pub use elastic::ElasticHandler;
pub use kubernetes::KubernetesHandler;
pub use localstack::{LocalstackHandler, LOCALSTACK_SERVICES};
pub use messaging::{KafkaHandler, RabbitmqHandler};
pub use mongo::MongoHandler;
pub use splunk::SplunkHandler;
pub use sql::{CockroachdbHandler, MssqlHandler, MysqlHandler, PostgresHandler};

/// Timeout for a single client connection attempt during probing or seeding.
pub(crate) const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Handlers for every supported preset kind.
pub fn all() -> Vec<Arc<dyn PresetHandler>> {
    vec![
        Arc::new(MongoHandler),
        Arc::new(MysqlHandler::mysql()),
        Arc::new(MysqlHandler::mariadb()),
        Arc::new(MssqlHandler),
        Arc::new(PostgresHandler),
        Arc::new(CockroachdbHandler),
        Arc::new(RedisHandler),
        Arc::new(MemcachedHandler),
        Arc::new(SplunkHandler),
        Arc::new(LocalstackHandler),
        Arc::new(RabbitmqHandler),
        Arc::new(KafkaHandler),
        Arc::new(ElasticHandler),
        Arc::new(KubernetesHandler),
    ]
}

/// Pull the payload for `$variant` out of a preset, or report the mismatch.
macro_rules! expect_preset {
    ($preset:expr, $($variant:ident)|+, $kind:expr) => {
        match $preset {
            $(provisioner_shared_types::Preset::$variant(inner))|+ => Ok(inner),
            other => Err($crate::error::PresetMismatch {
                handler: $kind,
                received: other.kind(),
            }),
        }
    };
}
pub(crate) use expect_preset;

/// `host:port` of a named port; the port set comes from the handler itself,
/// so a missing name is a probe failure rather than a panic.
pub(crate) fn endpoint(address: &Address, name: &str) -> Result<String, ProbeFailure> {
    address
        .endpoint(name)
        .ok_or_else(|| ProbeFailure::new(format!("port {name} is not published")))
}

pub(crate) fn default_endpoint(address: &Address) -> Result<String, ProbeFailure> {
    endpoint(address, DEFAULT_PORT)
}

pub(crate) fn seed_endpoint(address: &Address, name: &str, kind: PresetKind) -> Result<String, SeedError> {
    endpoint(address, name).map_err(SeedError::connection(kind))
}

/// HTTP client for service APIs; self-signed certificates are accepted
/// because the services run with their bundled certificates.
pub(crate) fn http_client() -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .danger_accept_invalid_certs(true)
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(Duration::from_secs(10))
        .build()
}

/// Fail unless `response` has a success status, keeping the body for the message.
pub(crate) async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, String> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(format!("{status}: {}", body.trim()))
}
