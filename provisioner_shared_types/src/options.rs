//! Options shared by every preset.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ProvisionError, Result};

/// Runtime options accepted next to any preset.
///
/// Timeouts travel as integer nanoseconds on the wire; zero or absent means
/// "use the server default".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Log every provisioning step at info level.
    pub debug: bool,
    /// Budget for image pull, container creation, start and port binding.
    #[serde(with = "duration_nanos")]
    pub start_timeout: Option<Duration>,
    /// Budget for the readiness probe.
    #[serde(with = "duration_nanos")]
    pub wait_timeout: Option<Duration>,
    /// Extra environment, `KEY=VALUE`.
    pub env: Vec<String>,
    /// Image tag, takes precedence over the preset version.
    pub tag: Option<String>,
    pub container_name: Option<String>,
    pub labels: BTreeMap<String, String>,
    /// Skip the pull when the image already exists locally.
    pub use_local_images_first: bool,
    /// Base64 encoded registry auth.
    pub auth: Option<String>,
}

impl Options {
    /// Structural checks that do not depend on the preset.
    pub fn validate(&self) -> Result<()> {
        for entry in &self.env {
            match entry.split_once('=') {
                Some((key, _)) if !key.is_empty() => {}
                _ => {
                    return Err(ProvisionError::validation(format!(
                        "invalid env entry {entry:?}, expected KEY=VALUE"
                    )))
                }
            }
        }

        if let Some(name) = &self.container_name {
            let valid = !name.is_empty()
                && name
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));
            if !valid {
                return Err(ProvisionError::validation(format!(
                    "invalid container name {name:?}"
                )));
            }
        }

        Ok(())
    }

    /// The explicit tag, if one was given.
    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref().filter(|tag| !tag.is_empty())
    }
}

mod duration_nanos {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => {
                serializer.serialize_u64(u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX))
            }
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        let nanos = Option::<u64>::deserialize(deserializer)?;
        Ok(nanos.filter(|n| *n > 0).map(Duration::from_nanos))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_off() {
        let options: Options = serde_json::from_str("{}").unwrap();
        assert_eq!(options, Options::default());
        assert!(!options.debug);
        assert!(options.wait_timeout.is_none());
    }

    #[test]
    fn test_timeouts_are_nanoseconds() {
        let options: Options =
            serde_json::from_str(r#"{"wait_timeout": 30000000000, "start_timeout": 0}"#).unwrap();
        assert_eq!(options.wait_timeout, Some(Duration::from_secs(30)));
        assert_eq!(options.start_timeout, None);

        let json = serde_json::to_value(&options).unwrap();
        assert_eq!(json["wait_timeout"], 30_000_000_000u64);
    }

    #[test]
    fn test_env_validation() {
        let mut options = Options {
            env: vec!["FOO=bar".into(), "EMPTY=".into()],
            ..Default::default()
        };
        assert!(options.validate().is_ok());

        options.env.push("broken".into());
        assert!(matches!(options.validate(), Err(ProvisionError::Validation(_))));
    }

    #[test]
    fn test_container_name_validation() {
        let options = Options {
            container_name: Some("my db".into()),
            ..Default::default()
        };
        assert!(options.validate().is_err());

        let options = Options {
            container_name: Some("my-db_1".into()),
            ..Default::default()
        };
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_empty_tag_is_ignored() {
        let options = Options {
            tag: Some(String::new()),
            ..Default::default()
        };
        assert_eq!(options.tag(), None);
    }
}
