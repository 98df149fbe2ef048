/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! History persistence over a local key/value store.
//!
//! Architecture:
//! - `KeyValueStore` abstracts the backing store (in-memory with an optional
//!   byte quota, or a redb file)
//! - `PersistenceBridge` writes the history delta as JSON under a
//!   per-instance key and reads it back on restore
//! - Store failures are logged and absorbed; they never undo an edit

pub mod types;

use std::collections::HashMap;
use std::path::Path;

use log::{debug, warn};
use redb::{ReadableDatabase, ReadableTable};
use types::HistoryDelta;

use crate::graph::EntityId;

const STORAGE_TABLE: redb::TableDefinition<&str, &str> = redb::TableDefinition::new("storage");
const KEY_PREFIX: &str = "mapshell";
/// Level to re-enter after a reload.
pub const LEVEL_KEY: &str = "level";
/// Entity to select once the stored level has been restored.
pub const SELECTION_KEY: &str = "id-level";

/// Synchronous string key/value storage.
pub trait KeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError>;

    fn remove(&mut self, key: &str) -> Result<(), StorageError>;
}

/// Errors from a key/value store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    QuotaExceeded { needed: usize, quota: usize },
    Backend(String),
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageError::QuotaExceeded { needed, quota } => {
                write!(f, "Storage quota exceeded: need {needed} bytes of {quota}")
            },
            StorageError::Backend(e) => write!(f, "Storage backend error: {e}"),
        }
    }
}

impl std::error::Error for StorageError {}

/// In-memory store, optionally capped at a total byte size of keys plus
/// values.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: HashMap<String, String>,
    quota: Option<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(quota: usize) -> Self {
        Self {
            entries: HashMap::new(),
            quota: Some(quota),
        }
    }

    pub fn used_bytes(&self) -> usize {
        self.entries.iter().map(|(k, v)| k.len() + v.len()).sum()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        if let Some(quota) = self.quota {
            let replaced = self.entries.get(key).map_or(0, |old| key.len() + old.len());
            let needed = self.used_bytes() - replaced + key.len() + value.len();
            if needed > quota {
                return Err(StorageError::QuotaExceeded { needed, quota });
            }
        }
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StorageError> {
        self.entries.remove(key);
        Ok(())
    }
}

/// File-backed store using a single redb table.
pub struct RedbStore {
    db: redb::Database,
}

impl RedbStore {
    /// Open or create the database file, creating parent directories.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .map_err(|e| StorageError::Backend(format!("Failed to create dir: {e}")))?;
        }
        let db = redb::Database::create(path).map_err(|e| StorageError::Backend(format!("{e}")))?;
        Ok(Self { db })
    }
}

impl KeyValueStore for RedbStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| StorageError::Backend(format!("{e}")))?;
        let table = match read_txn.open_table(STORAGE_TABLE) {
            Ok(table) => table,
            // Nothing has been written yet.
            Err(redb::TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(e) => return Err(StorageError::Backend(format!("{e}"))),
        };
        let entry = table
            .get(key)
            .map_err(|e| StorageError::Backend(format!("{e}")))?;
        Ok(entry.map(|value| value.value().to_string()))
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| StorageError::Backend(format!("{e}")))?;
        {
            let mut table = write_txn
                .open_table(STORAGE_TABLE)
                .map_err(|e| StorageError::Backend(format!("{e}")))?;
            table
                .insert(key, value)
                .map_err(|e| StorageError::Backend(format!("{e}")))?;
        }
        write_txn
            .commit()
            .map_err(|e| StorageError::Backend(format!("{e}")))
    }

    fn remove(&mut self, key: &str) -> Result<(), StorageError> {
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| StorageError::Backend(format!("{e}")))?;
        {
            let mut table = write_txn
                .open_table(STORAGE_TABLE)
                .map_err(|e| StorageError::Backend(format!("{e}")))?;
            table
                .remove(key)
                .map_err(|e| StorageError::Backend(format!("{e}")))?;
        }
        write_txn
            .commit()
            .map_err(|e| StorageError::Backend(format!("{e}")))
    }
}

impl std::fmt::Debug for RedbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbStore").finish_non_exhaustive()
    }
}

/// Saves and restores history deltas for one editor instance.
pub struct PersistenceBridge {
    store: Box<dyn KeyValueStore>,
    instance: String,
}

impl PersistenceBridge {
    pub fn new(store: Box<dyn KeyValueStore>, instance: impl Into<String>) -> Self {
        Self {
            store,
            instance: instance.into(),
        }
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    pub fn history_key(&self) -> String {
        format!("{KEY_PREFIX}_{}_saved_history", self.instance)
    }

    pub fn store(&self) -> &dyn KeyValueStore {
        self.store.as_ref()
    }

    /// Write `delta`, or clear the saved history for `None`.
    ///
    /// Failures (quota exceeded included) are logged and dropped; the
    /// in-memory edit always stands.
    pub fn save(&mut self, delta: Option<&HistoryDelta>) {
        let key = self.history_key();
        let Some(delta) = delta else {
            if let Err(e) = self.store.remove(&key) {
                warn!("Failed to clear saved history: {e}");
            }
            return;
        };
        let json = match serde_json::to_string(delta) {
            Ok(json) => json,
            Err(e) => {
                warn!("Failed to serialize history: {e}");
                return;
            },
        };
        match self.store.set(&key, &json) {
            Ok(()) => debug!("Saved history ({} bytes) under {key}", json.len()),
            Err(e) => warn!("Failed to save history: {e}"),
        }
    }

    /// Saved delta, if present and readable.
    pub fn restore(&self) -> Option<HistoryDelta> {
        let json = self.storage(&self.history_key())?;
        match serde_json::from_str(&json) {
            Ok(delta) => Some(delta),
            Err(e) => {
                warn!("Ignoring unreadable saved history: {e}");
                None
            },
        }
    }

    pub fn has_saved(&self) -> bool {
        self.storage(&self.history_key()).is_some()
    }

    pub fn clear_saved(&mut self) {
        let key = self.history_key();
        self.set_storage(&key, None);
    }

    /// Raw read; backend errors are logged and read as absent.
    pub fn storage(&self, key: &str) -> Option<String> {
        match self.store.get(key) {
            Ok(value) => value,
            Err(e) => {
                warn!("Failed to read '{key}' from storage: {e}");
                None
            },
        }
    }

    /// Raw write, or removal for `None`. Failures are logged.
    pub fn set_storage(&mut self, key: &str, value: Option<&str>) {
        let result = match value {
            Some(value) => self.store.set(key, value),
            None => self.store.remove(key),
        };
        if let Err(e) = result {
            warn!("Failed to write '{key}' to storage: {e}");
        }
    }

    /// Remember the level (and optionally a selection) to restore after a
    /// reload.
    pub fn store_level(&mut self, level: f64, selection: Option<EntityId>) {
        self.set_storage(LEVEL_KEY, Some(&level.to_string()));
        let selection = selection.map(|id| id.to_string());
        self.set_storage(SELECTION_KEY, selection.as_deref());
    }

    /// Stored level; unparseable values read as absent.
    pub fn stored_level(&self) -> Option<f64> {
        let raw = self.storage(LEVEL_KEY)?;
        match raw.trim().parse::<f64>() {
            Ok(level) if level.is_finite() => Some(level),
            _ => {
                debug!("Ignoring stored level '{raw}'");
                None
            },
        }
    }

    pub fn clear_stored_level(&mut self) {
        self.set_storage(LEVEL_KEY, None);
    }

    pub fn stored_selection(&self) -> Option<EntityId> {
        let raw = self.storage(SELECTION_KEY)?;
        raw.parse().ok()
    }

    pub fn clear_stored_selection(&mut self) {
        self.set_storage(SELECTION_KEY, None);
    }
}

impl std::fmt::Debug for PersistenceBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceBridge")
            .field("instance", &self.instance)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use types::{DELTA_FORMAT_VERSION, PersistedCheckpoint, PersistedEntity, PersistedNextIds};

    fn sample_delta() -> HistoryDelta {
        HistoryDelta {
            version: DELTA_FORMAT_VERSION,
            entities: vec![PersistedEntity {
                id: "n-1".to_string(),
                loc: Some([1.0, 2.0]),
                nodes: None,
                members: None,
                tags: Default::default(),
                version: 1,
            }],
            base_entities: Vec::new(),
            stack: vec![
                PersistedCheckpoint::default(),
                PersistedCheckpoint {
                    modified: vec![0],
                    annotation: Some("Added a point.".to_string()),
                    ..PersistedCheckpoint::default()
                },
            ],
            next_ids: PersistedNextIds {
                node: -2,
                way: -1,
                relation: -1,
            },
            index: 1,
        }
    }

    fn memory_bridge() -> PersistenceBridge {
        PersistenceBridge::new(Box::new(MemoryStore::new()), "default")
    }

    #[test]
    fn test_empty_startup() {
        let bridge = memory_bridge();
        assert!(bridge.restore().is_none());
        assert!(!bridge.has_saved());
    }

    #[test]
    fn test_save_and_restore() {
        let mut bridge = memory_bridge();
        bridge.save(Some(&sample_delta()));
        assert_eq!(bridge.history_key(), "mapshell_default_saved_history");
        assert_eq!(bridge.restore(), Some(sample_delta()));
    }

    #[test]
    fn test_save_none_clears() {
        let mut bridge = memory_bridge();
        bridge.save(Some(&sample_delta()));
        bridge.save(None);
        assert!(bridge.restore().is_none());
    }

    #[test]
    fn test_instances_do_not_collide() {
        let mut bridge = PersistenceBridge::new(Box::new(MemoryStore::new()), "a");
        bridge.save(Some(&sample_delta()));
        assert!(bridge.storage("mapshell_b_saved_history").is_none());
        assert!(bridge.storage("mapshell_a_saved_history").is_some());
    }

    #[test]
    fn test_quota_exceeded_is_absorbed() {
        let mut bridge = PersistenceBridge::new(Box::new(MemoryStore::with_quota(16)), "default");
        bridge.save(Some(&sample_delta()));
        assert!(bridge.restore().is_none());
    }

    #[test]
    fn test_memory_quota_counts_replaced_values_once() {
        let mut store = MemoryStore::with_quota(8);
        store.set("k", "1234567").unwrap();
        store.set("k", "7654321").unwrap();
        assert_eq!(
            store.set("x", "1"),
            Err(StorageError::QuotaExceeded {
                needed: 10,
                quota: 8
            })
        );
        assert_eq!(store.used_bytes(), 8);
    }

    #[test]
    fn test_malformed_saved_history_reads_as_absent() {
        let mut bridge = memory_bridge();
        let key = bridge.history_key();
        bridge.set_storage(&key, Some("{not json"));
        assert!(bridge.restore().is_none());
        assert!(bridge.has_saved());
        bridge.clear_saved();
        assert!(!bridge.has_saved());
    }

    #[test]
    fn test_level_keys() {
        let mut bridge = memory_bridge();
        bridge.store_level(2.0, Some(EntityId::way(7)));
        assert_eq!(bridge.storage(LEVEL_KEY).as_deref(), Some("2"));
        assert_eq!(bridge.stored_level(), Some(2.0));
        assert_eq!(bridge.stored_selection(), Some(EntityId::way(7)));
        bridge.clear_stored_level();
        bridge.clear_stored_selection();
        assert!(bridge.stored_level().is_none());
        assert!(bridge.stored_selection().is_none());

        bridge.set_storage(LEVEL_KEY, Some("roof"));
        assert!(bridge.stored_level().is_none());
    }

    #[test]
    fn test_redb_store_roundtrip_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("storage.redb");
        {
            let mut store = RedbStore::open(&path).unwrap();
            assert_eq!(store.get("missing").unwrap(), None);
            store.set("k", "v1").unwrap();
            store.set("k", "v2").unwrap();
            store.set("gone", "x").unwrap();
            store.remove("gone").unwrap();
        }
        let store = RedbStore::open(&path).unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v2"));
        assert_eq!(store.get("gone").unwrap(), None);
    }

    #[test]
    fn test_bridge_over_redb() {
        let dir = TempDir::new().unwrap();
        let store = RedbStore::open(&dir.path().join("storage.redb")).unwrap();
        let mut bridge = PersistenceBridge::new(Box::new(store), "default");
        bridge.save(Some(&sample_delta()));
        assert_eq!(bridge.restore(), Some(sample_delta()));
    }
}
