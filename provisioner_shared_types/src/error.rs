use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How a container runtime failure should be treated by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverErrorKind {
    /// Worth retrying with backoff (network blip, runtime overloaded).
    Transient,
    /// Retrying cannot help (bad image reference, rejected config).
    Fatal,
}

impl fmt::Display for DriverErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverErrorKind::Transient => f.write_str("transient"),
            DriverErrorKind::Fatal => f.write_str("fatal"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Preset not found: {0}")]
    PresetNotFound(String),

    #[error("Instance not found: {0}")]
    NotFound(String),

    #[error("Container runtime error ({kind}): {message}")]
    Driver {
        kind: DriverErrorKind,
        message: String,
    },

    #[error("Timed out after {}ms waiting for {what}: {last_error}", elapsed.as_millis())]
    Timeout {
        what: String,
        elapsed: Duration,
        last_error: String,
    },

    #[error("Seeding failed: {0}")]
    Seed(String),

    #[error("Provisioning cancelled by caller")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ProvisionError {
    pub fn validation(message: impl Into<String>) -> Self {
        ProvisionError::Validation(message.into())
    }

    /// Errors raised before any container was requested.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ProvisionError::Validation(_) | ProvisionError::PresetNotFound(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ProvisionError>;
