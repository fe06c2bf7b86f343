//! Engine configuration.
//!
//! Loaded from TOML, with an environment override for the storage location
//! so deployments can point the engine at a data directory without editing
//! the config file:
//!
//! ```toml
//! [storage]
//! type = "file"
//! path = "/var/lib/hopflow"
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::storage::StorageConfig;

pub const STORAGE_DIR_ENV: &str = "HOPFLOW_STORAGE_DIR";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub storage: StorageConfig,
}

impl EngineConfig {
    pub fn from_toml(content: &str) -> EngineResult<Self> {
        toml::from_str(content)
            .map_err(|e| EngineError::Validation(format!("invalid engine config: {}", e)))
    }

    pub fn load(path: impl AsRef<Path>) -> EngineResult<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            EngineError::Storage(format!(
                "Failed to read config {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::from_toml(&content)
    }

    /// Apply environment overrides. `HOPFLOW_STORAGE_DIR` switches the
    /// engine to file-backed storage under that directory.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(dir) = std::env::var(STORAGE_DIR_ENV) {
            if !dir.is_empty() {
                self.storage = StorageConfig::File { path: dir.into() };
            }
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_default_is_in_memory() {
        let cfg = EngineConfig::from_toml("").unwrap();
        assert_eq!(cfg.storage, StorageConfig::InMemory);
        assert_eq!(EngineConfig::default(), cfg);
    }

    #[test]
    fn test_file_backend_from_toml() {
        let cfg = EngineConfig::from_toml(
            r#"
            [storage]
            type = "file"
            path = "/var/lib/hopflow"
            "#,
        )
        .unwrap();
        assert_eq!(
            cfg.storage,
            StorageConfig::File {
                path: PathBuf::from("/var/lib/hopflow")
            }
        );
    }

    #[test]
    fn test_malformed_config_is_a_validation_error() {
        let err = EngineConfig::from_toml("[storage]\ntype = \"cloud\"").unwrap_err();
        assert_eq!(err.kind(), "validation");
    }
}
