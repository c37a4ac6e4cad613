use std::fmt::Display;
use std::path::PathBuf;

use provisioner_shared_types::{PresetKind, ProvisionError};
use thiserror::Error;

/// A handler was given the preset of another kind.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{handler} handler cannot process a {received} preset")]
pub struct PresetMismatch {
    pub handler: PresetKind,
    pub received: PresetKind,
}

impl From<PresetMismatch> for ProvisionError {
    fn from(err: PresetMismatch) -> Self {
        ProvisionError::Internal(err.to_string())
    }
}

/// Why a readiness probe did not pass.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ProbeFailure(pub String);

impl ProbeFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }

    /// Wrap a client error with what was being attempted.
    pub fn context<E: Display>(what: &'static str) -> impl FnOnce(E) -> Self {
        move |err| Self(format!("{what}: {err}"))
    }
}

impl From<PresetMismatch> for ProbeFailure {
    fn from(err: PresetMismatch) -> Self {
        Self(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum SeedError {
    #[error("can't read {}: {source}", path.display())]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{}:{line}: {message}", path.display())]
    Record {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("can't connect to {kind}: {message}")]
    Connection { kind: PresetKind, message: String },

    #[error("{kind} rejected seed data: {message}")]
    Rejected { kind: PresetKind, message: String },

    #[error(transparent)]
    Mismatch(#[from] PresetMismatch),
}

impl SeedError {
    pub fn file(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| SeedError::File { path, source }
    }

    pub fn connection<E: Display>(kind: PresetKind) -> impl FnOnce(E) -> Self {
        move |err| SeedError::Connection {
            kind,
            message: err.to_string(),
        }
    }

    pub fn rejected<E: Display>(kind: PresetKind) -> impl FnOnce(E) -> Self {
        move |err| SeedError::Rejected {
            kind,
            message: err.to_string(),
        }
    }
}

impl From<SeedError> for ProvisionError {
    fn from(err: SeedError) -> Self {
        match err {
            SeedError::Mismatch(mismatch) => mismatch.into(),
            other => ProvisionError::Seed(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seed_error_maps_to_seed_failure() {
        let err: ProvisionError = SeedError::rejected(PresetKind::Postgres)("syntax error").into();
        match err {
            ProvisionError::Seed(message) => {
                assert_eq!(message, "postgres rejected seed data: syntax error")
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_mismatch_is_internal() {
        let mismatch = PresetMismatch {
            handler: PresetKind::Redis,
            received: PresetKind::Kafka,
        };
        let err: ProvisionError = SeedError::from(mismatch).into();
        assert!(matches!(err, ProvisionError::Internal(_)));
    }

    #[test]
    fn test_record_error_names_line() {
        let err = SeedError::Record {
            path: PathBuf::from("messages.jsonl"),
            line: 3,
            message: "expected value".into(),
        };
        assert_eq!(err.to_string(), "messages.jsonl:3: expected value");
    }
}
