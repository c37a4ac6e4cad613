//! API error types and responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use provisioner_shared_types::{DriverErrorKind, ProvisionError};

use crate::lifecycle::ProvisionFailure;

/// API error response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    /// Human-readable error message.
    pub error: String,
    /// Machine-readable error code.
    pub code: String,
    /// Optional details about the error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(error: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: code.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    // Common error constructors
    pub fn not_found(resource: &str, id: &str) -> Self {
        Self::new(format!("{} not found: {}", resource, id), "NOT_FOUND")
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(message, "INTERNAL_ERROR")
    }

    pub fn validation_error(message: impl Into<String>) -> Self {
        Self::new(message, "VALIDATION_ERROR")
    }

    fn status(&self) -> StatusCode {
        match self.code.as_str() {
            "VALIDATION_ERROR" => StatusCode::BAD_REQUEST,
            "NOT_FOUND" | "PRESET_NOT_FOUND" => StatusCode::NOT_FOUND,
            "SEED_FAILED" => StatusCode::UNPROCESSABLE_ENTITY,
            "RUNTIME_ERROR" => StatusCode::BAD_GATEWAY,
            "RUNTIME_UNAVAILABLE" => StatusCode::SERVICE_UNAVAILABLE,
            "READINESS_TIMEOUT" => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(self)).into_response()
    }
}

impl From<ProvisionError> for ApiError {
    fn from(err: ProvisionError) -> Self {
        let message = err.to_string();
        match err {
            ProvisionError::Validation(_) => ApiError::validation_error(message),
            ProvisionError::PresetNotFound(_) => ApiError::new(message, "PRESET_NOT_FOUND"),
            ProvisionError::NotFound(id) => ApiError::not_found("Instance", &id),
            ProvisionError::Driver {
                kind: DriverErrorKind::Fatal,
                ..
            } => ApiError::new(message, "RUNTIME_ERROR"),
            ProvisionError::Driver {
                kind: DriverErrorKind::Transient,
                ..
            } => ApiError::new(message, "RUNTIME_UNAVAILABLE"),
            ProvisionError::Timeout { .. } => ApiError::new(message, "READINESS_TIMEOUT"),
            ProvisionError::Seed(_) => ApiError::new(message, "SEED_FAILED"),
            ProvisionError::Cancelled => ApiError::new(message, "CANCELLED"),
            ProvisionError::Internal(_) => ApiError::internal_error(message),
        }
    }
}

impl From<ProvisionFailure> for ApiError {
    fn from(failure: ProvisionFailure) -> Self {
        let error = ApiError::from(failure.error);
        if failure.container_logs.is_empty() {
            error
        } else {
            error.with_details(serde_json::json!({ "container_logs": failure.container_logs }))
        }
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;
