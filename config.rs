/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Editor configuration, loaded from TOML.
//!
//! Every field has a default, so an empty file (or no file) is valid.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::persistence::{KeyValueStore, MemoryStore, RedbStore, StorageError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditorConfig {
    /// Namespaces persisted history so several editors can share a store.
    pub instance: String,
    /// Quiet period before an edit is persisted.
    pub save_debounce_ms: u64,
    /// Lowest zoom at which editing (and tile loading) is allowed.
    pub min_editable_zoom: u8,
    /// Byte cap for the in-memory store.
    pub storage_quota_bytes: Option<usize>,
    /// redb file to persist into; in-memory when unset.
    pub storage_path: Option<PathBuf>,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            instance: "default".to_string(),
            save_debounce_ms: 350,
            min_editable_zoom: 16,
            storage_quota_bytes: None,
            storage_path: None,
        }
    }
}

impl EditorConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("Failed to read {}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    pub fn save_debounce(&self) -> Duration {
        Duration::from_millis(self.save_debounce_ms)
    }

    /// The store this configuration asks for.
    pub fn open_store(&self) -> Result<Box<dyn KeyValueStore>, StorageError> {
        if let Some(path) = &self.storage_path {
            return Ok(Box::new(RedbStore::open(path)?));
        }
        Ok(Box::new(match self.storage_quota_bytes {
            Some(quota) => MemoryStore::with_quota(quota),
            None => MemoryStore::new(),
        }))
    }
}

/// Errors loading configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    Io(String),
    Parse(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {e}"),
            ConfigError::Parse(e) => write!(f, "Config parse error: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = EditorConfig::from_toml_str("").unwrap();
        assert_eq!(config, EditorConfig::default());
        assert_eq!(config.save_debounce(), Duration::from_millis(350));
        assert_eq!(config.min_editable_zoom, 16);
    }

    #[test]
    fn test_partial_config_overrides() {
        let config = EditorConfig::from_toml_str(
            "instance = \"survey\"\nsave_debounce_ms = 50\nstorage_quota_bytes = 4096\n",
        )
        .unwrap();
        assert_eq!(config.instance, "survey");
        assert_eq!(config.save_debounce_ms, 50);
        assert_eq!(config.storage_quota_bytes, Some(4096));
        assert_eq!(config.min_editable_zoom, 16);
    }

    #[test]
    fn test_bad_config_is_parse_error() {
        let err = EditorConfig::from_toml_str("save_debounce_ms = \"soon\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let dir = TempDir::new().unwrap();
        let err = EditorConfig::load(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn test_open_store_respects_storage_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("editor.toml");
        let db = dir.path().join("store.redb");
        std::fs::write(
            &path,
            format!("storage_path = {:?}\n", db.to_string_lossy()),
        )
        .unwrap();
        let config = EditorConfig::load(&path).unwrap();
        let mut store = config.open_store().unwrap();
        store.set("k", "v").unwrap();
        assert!(db.exists());
    }
}
