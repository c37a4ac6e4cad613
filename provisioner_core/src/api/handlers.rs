//! API request handlers.

use axum::{
    body::Bytes,
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use uuid::Uuid;

use provisioner_shared_types::{BoundPorts, InstanceId, Options, Preset, PresetKind};

use super::error::{ApiError, ApiResult};
use super::state::ApiState;
use crate::lifecycle::InstanceView;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Body of `POST /start/:kind`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StartRequest {
    #[serde(default)]
    pub options: Options,
    /// Decoded against the kind from the route.
    #[serde(default)]
    pub preset: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartResponse {
    pub id: InstanceId,
    pub host: String,
    pub ports: BoundPorts,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StopRequest {
    #[serde(default)]
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListResponse<T> {
    pub items: Vec<T>,
    pub count: usize,
}

impl From<InstanceView> for StartResponse {
    fn from(view: InstanceView) -> Self {
        StartResponse {
            id: view.id,
            host: view.host,
            ports: view.ports,
        }
    }
}

/// An empty body decodes to the type's default.
fn parse_body<T: DeserializeOwned + Default>(body: &Bytes) -> ApiResult<T> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| ApiError::validation_error(format!("Invalid request body: {}", e)))
}

// ============================================================================
// Instance Handlers
// ============================================================================

/// Provision a container for the preset kind named in the path.
pub async fn start_preset(
    State(state): State<ApiState>,
    Path(kind): Path<String>,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let kind: PresetKind = kind.parse()?;
    let request: StartRequest = parse_body(&body)?;
    let preset = Preset::from_json(kind, request.preset)
        .map_err(|e| ApiError::validation_error(format!("Invalid {} preset: {}", kind, e)))?;

    let view = state.lifecycle.provision(request.options, preset).await?;
    Ok(Json(StartResponse::from(view)))
}

/// Stop and remove an instance.
pub async fn stop_instance(State(state): State<ApiState>, body: Bytes) -> ApiResult<impl IntoResponse> {
    let request: StopRequest = parse_body(&body)?;
    let raw_id = request.id.trim();
    if raw_id.is_empty() {
        return Err(ApiError::validation_error("missing container id"));
    }

    // an id we could never have handed out is simply unknown
    let id = Uuid::parse_str(raw_id).map_err(|_| ApiError::not_found("Instance", raw_id))?;
    state.lifecycle.stop(id).await?;

    Ok(Json(serde_json::json!({})))
}

/// List running instances.
pub async fn list_instances(State(state): State<ApiState>) -> ApiResult<impl IntoResponse> {
    let items = state.lifecycle.list().await;
    let count = items.len();
    Ok(Json(ListResponse { items, count }))
}

/// Get a single running instance.
pub async fn get_instance(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    state
        .lifecycle
        .get(id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Instance", &id.to_string()))
}

/// Preset kinds this server can provision.
pub async fn list_presets(State(state): State<ApiState>) -> ApiResult<impl IntoResponse> {
    let items: Vec<String> = state
        .lifecycle
        .registry()
        .kinds()
        .into_iter()
        .map(|kind| kind.to_string())
        .collect();
    let count = items.len();
    Ok(Json(ListResponse { items, count }))
}

/// Liveness.
pub async fn health(State(state): State<ApiState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "instances": state.lifecycle.list().await.len(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use provisioner_shared_types::{BoundPort, Protocol, DEFAULT_PORT};

    #[test]
    fn test_start_response_conversion() {
        let view = InstanceView {
            id: Uuid::new_v4(),
            kind: PresetKind::Postgres,
            host: "127.0.0.1".to_string(),
            ports: [(
                DEFAULT_PORT.to_string(),
                BoundPort {
                    protocol: Protocol::Tcp,
                    port: 32771,
                },
            )]
            .into(),
            created_at: Utc::now(),
        };

        let json = serde_json::to_value(StartResponse::from(view.clone())).unwrap();
        assert_eq!(json["id"], view.id.to_string());
        assert_eq!(json["host"], "127.0.0.1");
        assert_eq!(json["ports"]["default"]["protocol"], "tcp");
        assert_eq!(json["ports"]["default"]["port"], 32771);
        assert!(json.get("kind").is_none());
    }

    #[test]
    fn test_empty_body_is_default_request() {
        let request: StartRequest = parse_body(&Bytes::from_static(b"  ")).unwrap();
        assert_eq!(request.options, Options::default());
        assert!(request.preset.is_null());
    }

    #[test]
    fn test_malformed_body_is_validation_error() {
        let err = parse_body::<StopRequest>(&Bytes::from_static(b"{\"id\": 4")).unwrap_err();
        assert_eq!(err.code, "VALIDATION_ERROR");
    }
}
