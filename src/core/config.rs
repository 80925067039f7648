use std::fs;
use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};
use crate::core::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage_path: PathBuf,
    pub indexer_workers: usize,      // Full-text worker threads
    pub max_string_length: usize,    // Limit for `string` fields, in chars
    pub zero_fill_deletes: bool,     // Overwrite deleted segment bytes with zeros
}

impl Default for Config {
    fn default() -> Self {
        Config {
            storage_path: PathBuf::from("./data"),
            indexer_workers: num_cpus::get().clamp(1, 4),
            max_string_length: 220,
            zero_fill_deletes: true,
        }
    }
}

impl Config {
    /// Load a JSON config file; missing keys fall back to defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let data = fs::read(path)?;
        let config: Config = serde_json::from_slice(&data)?;
        Ok(config)
    }

    pub fn with_storage_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.storage_path = path.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"storage_path": "/srv/records", "max_string_length": 64}"#).unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.storage_path, PathBuf::from("/srv/records"));
        assert_eq!(config.max_string_length, 64);
        assert!(config.zero_fill_deletes);
        assert!(config.indexer_workers >= 1);
    }

    #[test]
    fn malformed_file_is_a_validation_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();

        let err = Config::from_file(&path).unwrap_err();
        assert!(err.is(crate::core::error::ErrorKind::Validation));
    }
}
