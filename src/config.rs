//! Host-facing engine configuration: sample rate, block size, and where
//! to look for patch specs on disk.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub sample_rate: f64,
    pub max_block_size: usize,
    pub default_patch_search_paths: Vec<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000.0,
            max_block_size: 1024,
            default_patch_search_paths: Vec::new(),
        }
    }
}

impl EngineConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&text)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let text = toml::to_string_pretty(self)?;
        fs::write(path, text).map_err(|source| ConfigError::WriteFile {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_documented_values() {
        let config = EngineConfig::default();
        assert_eq!(config.sample_rate, 48_000.0);
        assert_eq!(config.max_block_size, 1024);
        assert!(config.default_patch_search_paths.is_empty());
    }

    #[test]
    fn save_then_load_roundtrips() {
        let dir = std::env::temp_dir().join("hyasynth-config-test");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("engine.toml");

        let mut config = EngineConfig::default();
        config.sample_rate = 44_100.0;
        config.default_patch_search_paths.push(PathBuf::from("/patches"));
        config.save(&path).unwrap();

        let restored = EngineConfig::load(&path).unwrap();
        assert_eq!(restored.sample_rate, 44_100.0);
        assert_eq!(restored.default_patch_search_paths, vec![PathBuf::from("/patches")]);

        let _ = fs::remove_file(&path);
    }
}
