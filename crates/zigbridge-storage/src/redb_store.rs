//! redb-backed key/value store.

use redb::{Database, ReadableTable, TableDefinition};
use std::path::Path;

use zigbridge_core::error::Result as CoreResult;
use zigbridge_core::storage::{KvStore, StoredValue, validate_key};

use crate::error::{Result, StorageError};

// Single table for every namespace.
// Key format: "namespace:key"
const CONFIG_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("config");

fn make_key(namespace: &str, key: &str) -> String {
    let mut result = String::with_capacity(namespace.len() + key.len() + 1);
    result.push_str(namespace);
    result.push(':');
    result.push_str(key);
    result
}

/// Persistent store backed by a redb database file.
pub struct RedbStore {
    db: Database,
    path: Option<String>,
}

impl RedbStore {
    /// Open or create a database at `path`, creating parent directories.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let db = if path.exists() {
            Database::open(path)?
        } else {
            Database::create(path)?
        };
        tracing::info!(path = %path.display(), "Opened config store");

        let store = Self {
            db,
            path: Some(path.to_string_lossy().to_string()),
        };
        store.ensure_table()?;
        Ok(store)
    }

    /// Volatile database, for tests and runs without a storage path.
    pub fn memory() -> Result<Self> {
        let db = Database::builder()
            .create_with_backend(redb::backends::InMemoryBackend::new())?;
        let store = Self { db, path: None };
        store.ensure_table()?;
        Ok(store)
    }

    /// Database file path, `None` when in memory.
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    // Read transactions fail on a table that was never written.
    fn ensure_table(&self) -> Result<()> {
        let txn = self.db.begin_write()?;
        txn.open_table(CONFIG_TABLE)?;
        txn.commit()?;
        Ok(())
    }

    fn read_raw(&self, namespace: &str, key: &str) -> Result<Option<StoredValue>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(CONFIG_TABLE)?;
        match table.get(make_key(namespace, key).as_str())? {
            Some(bytes) => Ok(Some(bincode::deserialize(bytes.value())?)),
            None => Ok(None),
        }
    }

    fn write_raw(&self, namespace: &str, key: &str, value: &StoredValue) -> Result<()> {
        let bytes = bincode::serialize(value)?;
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(CONFIG_TABLE)?;
            table.insert(make_key(namespace, key).as_str(), bytes.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    fn remove_raw(&self, namespace: &str, key: &str) -> Result<bool> {
        let txn = self.db.begin_write()?;
        let removed = {
            let mut table = txn.open_table(CONFIG_TABLE)?;
            let removed = table.remove(make_key(namespace, key).as_str())?.is_some();
            removed
        };
        txn.commit()?;
        Ok(removed)
    }

    fn clear_raw(&self, namespace: &str) -> Result<usize> {
        let prefix = make_key(namespace, "");
        let txn = self.db.begin_write()?;
        let count = {
            let mut table = txn.open_table(CONFIG_TABLE)?;
            let mut keys = Vec::new();
            for item in table.iter()? {
                let (k, _) = item?;
                if k.value().starts_with(&prefix) {
                    keys.push(k.value().to_string());
                }
            }
            for k in &keys {
                table.remove(k.as_str())?;
            }
            keys.len()
        };
        txn.commit()?;
        tracing::debug!(namespace, count, "Cleared config namespace");
        Ok(count)
    }
}

impl KvStore for RedbStore {
    fn get(&self, namespace: &str, key: &str) -> CoreResult<Option<StoredValue>> {
        validate_key(namespace, key)?;
        Ok(self.read_raw(namespace, key)?)
    }

    fn set(&self, namespace: &str, key: &str, value: StoredValue) -> CoreResult<()> {
        validate_key(namespace, key)?;
        Ok(self.write_raw(namespace, key, &value)?)
    }

    fn erase(&self, namespace: &str, key: &str) -> CoreResult<bool> {
        validate_key(namespace, key)?;
        Ok(self.remove_raw(namespace, key)?)
    }

    fn clear(&self, namespace: &str) -> CoreResult<usize> {
        if namespace.is_empty() || namespace.contains(':') {
            return Err(StorageError::InvalidInput(format!("bad namespace: {namespace:?}")).into());
        }
        Ok(self.clear_raw(namespace)?)
    }

    fn is_persistent(&self) -> bool {
        self.path.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_make_key() {
        assert_eq!(make_key("zigbee", "pan_id"), "zigbee:pan_id");
    }

    #[test]
    fn test_memory_store() {
        let store = RedbStore::memory().unwrap();
        assert!(!store.is_persistent());
        store.set_u16("zigbee", "pan_id", 0x1A62).unwrap();
        assert_eq!(store.get_u16("zigbee", "pan_id").unwrap(), Some(0x1A62));
        assert_eq!(store.get_u8("zigbee", "channel").unwrap(), None);
    }

    #[test]
    fn test_clear_leaves_other_namespaces() {
        let store = RedbStore::memory().unwrap();
        store.set_u8("zigbee", "channel", 15).unwrap();
        store.set_u16("zigbee", "pan_id", 1).unwrap();
        store.set_str("zigbee2", "name", "other").unwrap();

        assert_eq!(store.clear("zigbee").unwrap(), 2);
        assert_eq!(store.get_u8("zigbee", "channel").unwrap(), None);
        assert_eq!(
            store.get_str("zigbee2", "name").unwrap().as_deref(),
            Some("other")
        );
    }
}
