use std::collections::HashMap;
use std::sync::Arc;

use provisioner_shared_types::{Address, Preset, PresetKind, ProvisionError, Result};
use tracing::debug;

use crate::handler::{ImageSpec, PresetHandler};
use crate::presets;

/// Kind -> handler table, built once at startup and shared read-only.
#[derive(Clone)]
pub struct PresetRegistry {
    handlers: HashMap<PresetKind, Arc<dyn PresetHandler>>,
}

impl PresetRegistry {
    /// Registry with a handler for every supported kind.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        for handler in presets::all() {
            registry = registry.with_handler(handler);
        }
        registry
    }

    pub fn empty() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register `handler` for its kind, replacing any previous one.
    pub fn with_handler(mut self, handler: Arc<dyn PresetHandler>) -> Self {
        self.handlers.insert(handler.kind(), handler);
        self
    }

    pub fn get(&self, kind: PresetKind) -> Result<Arc<dyn PresetHandler>> {
        self.handlers
            .get(&kind)
            .cloned()
            .ok_or_else(|| ProvisionError::PresetNotFound(kind.to_string()))
    }

    pub fn kinds(&self) -> Vec<PresetKind> {
        let mut kinds: Vec<_> = self.handlers.keys().copied().collect();
        kinds.sort();
        kinds
    }

    pub fn resolve(&self, preset: &Preset) -> Result<ImageSpec> {
        self.get(preset.kind())?.image_spec(preset)
    }

    /// Reject a request before anything is created: kind-specific rules plus
    /// existence of every seed file it names.
    pub fn validate(&self, preset: &Preset) -> Result<()> {
        let handler = self.get(preset.kind())?;
        handler.validate(preset)?;

        for path in preset.seed_paths() {
            if !path.exists() {
                return Err(ProvisionError::validation(format!(
                    "seed path {} does not exist",
                    path.display()
                )));
            }
        }

        debug!(kind = %preset.kind(), "Preset validated");
        Ok(())
    }

    pub async fn seed(&self, preset: &Preset, address: &Address) -> Result<()> {
        let handler = self.get(preset.kind())?;
        handler.seed(preset, address).await.map_err(ProvisionError::from)
    }
}

impl Default for PresetRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use provisioner_shared_types::{MssqlPreset, PostgresPreset, RedisPreset};
    use std::path::PathBuf;

    #[test]
    fn test_builtin_covers_every_kind() {
        let registry = PresetRegistry::builtin();
        assert_eq!(registry.kinds(), {
            let mut all = PresetKind::ALL.to_vec();
            all.sort();
            all
        });
    }

    #[test]
    fn test_empty_registry_reports_preset_not_found() {
        let registry = PresetRegistry::empty();
        let err = registry
            .resolve(&Preset::Redis(RedisPreset::default()))
            .unwrap_err();
        assert!(matches!(err, ProvisionError::PresetNotFound(_)));
    }

    #[test]
    fn test_validate_requires_existing_seed_files() {
        let registry = PresetRegistry::builtin();
        let preset = Preset::Postgres(PostgresPreset {
            queries_files: vec![PathBuf::from("/nonexistent/schema.sql")],
            ..Default::default()
        });

        let err = registry.validate(&preset).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_validate_runs_kind_rules() {
        let registry = PresetRegistry::builtin();
        let preset = Preset::Mssql(MssqlPreset::default());
        assert!(registry.validate(&preset).is_err());

        let preset = Preset::Mssql(MssqlPreset {
            license: true,
            ..Default::default()
        });
        assert!(registry.validate(&preset).is_ok());
    }

    #[test]
    fn test_resolve_uses_preset_handler() {
        let registry = PresetRegistry::builtin();
        let spec = registry.resolve(&Preset::Redis(RedisPreset::default())).unwrap();
        assert_eq!(spec.reference(None), "docker.io/library/redis:6.0.9");
    }
}
