//! End-to-end tests of the HTTP surface over the mock container driver.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tower::ServiceExt;

use container_driver::{ContainerDriver, MockDriver};
use preset_registry::{ImageSpec, PresetHandler, PresetRegistry, SeedError};
use provisioner_core::api::{build_router, ApiState};
use provisioner_core::{LifecycleConfig, LifecycleManager, ReadinessProber, RetryPolicy};
use provisioner_shared_types::{
    Address, PortSpec, Preset, PresetKind, ProvisionError, DEFAULT_PORT,
};

/// Redis stand-in that remembers what it was seeded with.
#[derive(Default)]
struct RecordingRedis {
    seeded: Mutex<BTreeMap<String, String>>,
}

#[async_trait]
impl PresetHandler for RecordingRedis {
    fn kind(&self) -> PresetKind {
        PresetKind::Redis
    }

    fn image_spec(&self, _preset: &Preset) -> Result<ImageSpec, ProvisionError> {
        Ok(ImageSpec::new("docker.io/library/redis", "6.0.9").with_port(DEFAULT_PORT, PortSpec::tcp(6379)))
    }

    async fn seed(&self, preset: &Preset, _address: &Address) -> Result<(), SeedError> {
        if let Preset::Redis(p) = preset {
            let mut seeded = self.seeded.lock().await;
            for (key, value) in &p.values {
                let value = value.as_str().map(str::to_string).unwrap_or_else(|| value.to_string());
                seeded.insert(key.clone(), value);
            }
        }
        Ok(())
    }
}

/// Postgres stand-in whose seed data is always rejected.
struct BrokenPostgres;

#[async_trait]
impl PresetHandler for BrokenPostgres {
    fn kind(&self) -> PresetKind {
        PresetKind::Postgres
    }

    fn image_spec(&self, _preset: &Preset) -> Result<ImageSpec, ProvisionError> {
        Ok(ImageSpec::new("docker.io/library/postgres", "12").with_port(DEFAULT_PORT, PortSpec::tcp(5432)))
    }

    async fn seed(&self, _preset: &Preset, _address: &Address) -> Result<(), SeedError> {
        Err(SeedError::Rejected {
            kind: PresetKind::Postgres,
            message: "syntax error at or near \"CRATE\"".to_string(),
        })
    }
}

struct TestServer {
    router: Router,
    driver: MockDriver,
    redis: Arc<RecordingRedis>,
}

fn test_server() -> TestServer {
    let driver = MockDriver::new().with_logs(["database system is ready to accept connections"]);
    let redis = Arc::new(RecordingRedis::default());
    let registry = PresetRegistry::builtin()
        .with_handler(redis.clone())
        .with_handler(Arc::new(BrokenPostgres));

    let lifecycle = LifecycleManager::new(Arc::new(driver.clone()), Arc::new(registry))
        .with_prober(ReadinessProber::new(Duration::from_millis(10)).with_connect_check(false))
        .with_config(LifecycleConfig {
            wait_timeout: Duration::from_secs(1),
            retry: RetryPolicy::none(),
            ..Default::default()
        });

    TestServer {
        router: build_router(ApiState::new(lifecycle)),
        driver,
        redis,
    }
}

async fn request(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let body = match body {
        Some(value) => Body::from(value.to_string()),
        None => Body::empty(),
    };
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(body)
        .unwrap();

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

#[tokio::test]
async fn test_start_redis_returns_address_and_seeds() {
    let server = test_server();

    let (status, body) = request(
        &server.router,
        "POST",
        "/start/redis",
        Some(json!({"options": {}, "preset": {"version": "5", "values": {"foo": "bar", "n": 1}}})),
    )
    .await;

    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["host"], "127.0.0.1");
    assert_eq!(body["ports"]["default"]["protocol"], "tcp");
    assert!(body["ports"]["default"]["port"].as_u64().unwrap() > 0);
    assert!(body["id"].as_str().is_some());

    let seeded = server.redis.seeded.lock().await;
    assert_eq!(seeded.get("foo").map(String::as_str), Some("bar"));
    assert_eq!(seeded.get("n").map(String::as_str), Some("1"));
}

#[tokio::test]
async fn test_start_then_stop_twice() {
    let server = test_server();
    let (_, started) = request(&server.router, "POST", "/start/redis", Some(json!({}))).await;
    let id = started["id"].as_str().unwrap().to_string();

    let (status, body) = request(&server.router, "GET", "/instances", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 1);
    assert_eq!(body["items"][0]["id"], id);

    let (status, body) = request(&server.router, "POST", "/stop", Some(json!({"id": id}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({}));
    assert_eq!(server.driver.container_count().await, 0);

    let (status, body) = request(&server.router, "POST", "/stop", Some(json!({"id": id}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_unknown_kind_is_not_found() {
    let server = test_server();
    let (status, body) = request(&server.router, "POST", "/start/oracle", Some(json!({}))).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "PRESET_NOT_FOUND");
}

#[tokio::test]
async fn test_kind_aliases_are_accepted() {
    let server = test_server();
    let (status, _) = request(&server.router, "POST", "/start/Redis", None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_unaccepted_license_never_reaches_driver() {
    let server = test_server();
    let (status, body) = request(
        &server.router,
        "POST",
        "/start/mssql",
        Some(json!({"preset": {"license": false}})),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");
    assert_eq!(server.driver.container_count().await, 0);
}

#[tokio::test]
async fn test_missing_seed_file_is_rejected() {
    let server = test_server();
    let (status, body) = request(
        &server.router,
        "POST",
        "/start/postgres",
        Some(json!({"preset": {"queries_files": ["/nonexistent/schema.sql"]}})),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("/nonexistent/schema.sql"));
    assert_eq!(server.driver.container_count().await, 0);
}

#[tokio::test]
async fn test_seed_failure_rolls_back_and_reports_logs() {
    let server = test_server();
    let schema = tempfile::NamedTempFile::new().unwrap();
    std::fs::write(schema.path(), "CRATE TABLE t (id int);").unwrap();
    let before = server.driver.list(true).await.unwrap();

    let (status, body) = request(
        &server.router,
        "POST",
        "/start/postgres",
        Some(json!({"preset": {"queriesFiles": [schema.path()]}})),
    )
    .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "SEED_FAILED");
    assert!(body["error"].as_str().unwrap().contains("CRATE"));
    assert_eq!(
        body["details"]["container_logs"],
        json!(["database system is ready to accept connections"])
    );
    assert_eq!(server.driver.list(true).await.unwrap(), before);
}

#[tokio::test]
async fn test_stop_requires_an_id() {
    let server = test_server();

    let (status, body) = request(&server.router, "POST", "/stop", Some(json!({"id": ""}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "missing container id");

    let (status, _) = request(&server.router, "POST", "/stop", Some(json!({"id": "not-a-uuid"}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_malformed_body_is_bad_request() {
    let server = test_server();
    let (status, body) = request(&server.router, "POST", "/start/redis", Some(json!("not an object"))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");

    let (status, _) = request(
        &server.router,
        "POST",
        "/start/redis",
        Some(json!({"preset": {"values": "should be a map"}})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_invalid_env_option_is_rejected() {
    let server = test_server();
    let (status, body) = request(
        &server.router,
        "POST",
        "/start/redis",
        Some(json!({"options": {"env": ["NOT_KEY_VALUE"]}})),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("NOT_KEY_VALUE"));
}

#[tokio::test]
async fn test_health_and_presets() {
    let server = test_server();

    let (status, body) = request(&server.router, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, body) = request(&server.router, "GET", "/presets", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 14);
}
