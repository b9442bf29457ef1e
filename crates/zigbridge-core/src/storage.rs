//! Persistence collaborator interface.
//!
//! Configuration values (network parameters, user settings) are kept under a
//! `(namespace, key)` pair. Hot-path tables never go through this interface.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{Error, Result};

/// A stored configuration value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoredValue {
    Str(String),
    U8(u8),
    U16(u16),
    U32(u32),
}

impl StoredValue {
    fn type_name(&self) -> &'static str {
        match self {
            StoredValue::Str(_) => "str",
            StoredValue::U8(_) => "u8",
            StoredValue::U16(_) => "u16",
            StoredValue::U32(_) => "u32",
        }
    }
}

fn mismatch(namespace: &str, key: &str, expected: &str, found: &StoredValue) -> Error {
    Error::Storage(format!(
        "{namespace}:{key} holds {} not {expected}",
        found.type_name()
    ))
}

/// Key/value store for configuration.
///
/// Implementors provide the untyped operations; the typed accessors are
/// derived from them. Reading a key stored with another type is an error.
pub trait KvStore: Send + Sync {
    /// Read a raw value.
    fn get(&self, namespace: &str, key: &str) -> Result<Option<StoredValue>>;

    /// Write a raw value, replacing any previous one.
    fn set(&self, namespace: &str, key: &str, value: StoredValue) -> Result<()>;

    /// Delete one key. Returns whether it existed.
    fn erase(&self, namespace: &str, key: &str) -> Result<bool>;

    /// Delete every key in a namespace. Returns the number removed.
    fn clear(&self, namespace: &str) -> Result<usize>;

    /// Whether values survive a restart.
    fn is_persistent(&self) -> bool;

    fn set_str(&self, namespace: &str, key: &str, value: &str) -> Result<()> {
        self.set(namespace, key, StoredValue::Str(value.to_string()))
    }

    fn set_u8(&self, namespace: &str, key: &str, value: u8) -> Result<()> {
        self.set(namespace, key, StoredValue::U8(value))
    }

    fn set_u16(&self, namespace: &str, key: &str, value: u16) -> Result<()> {
        self.set(namespace, key, StoredValue::U16(value))
    }

    fn set_u32(&self, namespace: &str, key: &str, value: u32) -> Result<()> {
        self.set(namespace, key, StoredValue::U32(value))
    }

    fn get_str(&self, namespace: &str, key: &str) -> Result<Option<String>> {
        match self.get(namespace, key)? {
            None => Ok(None),
            Some(StoredValue::Str(s)) => Ok(Some(s)),
            Some(other) => Err(mismatch(namespace, key, "str", &other)),
        }
    }

    fn get_u8(&self, namespace: &str, key: &str) -> Result<Option<u8>> {
        match self.get(namespace, key)? {
            None => Ok(None),
            Some(StoredValue::U8(v)) => Ok(Some(v)),
            Some(other) => Err(mismatch(namespace, key, "u8", &other)),
        }
    }

    fn get_u16(&self, namespace: &str, key: &str) -> Result<Option<u16>> {
        match self.get(namespace, key)? {
            None => Ok(None),
            Some(StoredValue::U16(v)) => Ok(Some(v)),
            Some(other) => Err(mismatch(namespace, key, "u16", &other)),
        }
    }

    fn get_u32(&self, namespace: &str, key: &str) -> Result<Option<u32>> {
        match self.get(namespace, key)? {
            None => Ok(None),
            Some(StoredValue::U32(v)) => Ok(Some(v)),
            Some(other) => Err(mismatch(namespace, key, "u32", &other)),
        }
    }
}

/// Reject names the on-disk key layout cannot represent.
pub fn validate_key(namespace: &str, key: &str) -> Result<()> {
    if namespace.is_empty() || key.is_empty() {
        return Err(Error::InvalidArgument("empty namespace or key".into()));
    }
    if namespace.contains(':') {
        return Err(Error::InvalidArgument(format!(
            "namespace may not contain ':': {namespace}"
        )));
    }
    Ok(())
}

/// Volatile in-memory store.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<(String, String), StoredValue>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryStore {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<StoredValue>> {
        validate_key(namespace, key)?;
        Ok(self
            .entries
            .lock()
            .get(&(namespace.to_string(), key.to_string()))
            .cloned())
    }

    fn set(&self, namespace: &str, key: &str, value: StoredValue) -> Result<()> {
        validate_key(namespace, key)?;
        self.entries
            .lock()
            .insert((namespace.to_string(), key.to_string()), value);
        Ok(())
    }

    fn erase(&self, namespace: &str, key: &str) -> Result<bool> {
        validate_key(namespace, key)?;
        Ok(self
            .entries
            .lock()
            .remove(&(namespace.to_string(), key.to_string()))
            .is_some())
    }

    fn clear(&self, namespace: &str) -> Result<usize> {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|(ns, _), _| ns != namespace);
        Ok(before - entries.len())
    }

    fn is_persistent(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_roundtrip() {
        let store = MemoryStore::new();
        store.set_str("mqtt", "uri", "mqtt://localhost:1883").unwrap();
        store.set_u16("zigbee", "pan_id", 0x1A62).unwrap();
        store.set_u8("zigbee", "channel", 15).unwrap();

        assert_eq!(
            store.get_str("mqtt", "uri").unwrap().as_deref(),
            Some("mqtt://localhost:1883")
        );
        assert_eq!(store.get_u16("zigbee", "pan_id").unwrap(), Some(0x1A62));
        assert_eq!(store.get_u8("zigbee", "channel").unwrap(), Some(15));
        assert_eq!(store.get_u32("zigbee", "missing").unwrap(), None);
    }

    #[test]
    fn test_type_mismatch() {
        let store = MemoryStore::new();
        store.set_u8("zigbee", "channel", 15).unwrap();
        assert!(matches!(
            store.get_u16("zigbee", "channel"),
            Err(Error::Storage(_))
        ));
    }

    #[test]
    fn test_erase_and_clear() {
        let store = MemoryStore::new();
        store.set_u8("a", "x", 1).unwrap();
        store.set_u8("a", "y", 2).unwrap();
        store.set_u8("b", "x", 3).unwrap();

        assert!(store.erase("a", "x").unwrap());
        assert!(!store.erase("a", "x").unwrap());
        assert_eq!(store.clear("a").unwrap(), 1);
        assert_eq!(store.get_u8("b", "x").unwrap(), Some(3));
    }

    #[test]
    fn test_key_validation() {
        let store = MemoryStore::new();
        assert!(store.set_u8("", "x", 1).is_err());
        assert!(store.set_u8("a:b", "x", 1).is_err());
    }
}
