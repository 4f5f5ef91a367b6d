use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;

use super::KvStore;
use crate::error::{DataModelError, Result};

/// Volatile [`KvStore`] for tests and hosts without flash.
#[derive(Default)]
pub struct MemoryKvStore {
    entries: RwLock<HashMap<(String, String), Vec<u8>>>,
    value_limit: Option<usize>,
    writes: AtomicUsize,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that rejects values larger than `limit` bytes with `NoMemory`,
    /// like a flash partition with a small page size.
    pub fn with_value_limit(limit: usize) -> Self {
        Self {
            value_limit: Some(limit),
            ..Self::default()
        }
    }

    pub fn contains(&self, namespace: &str, key: &str) -> bool {
        self.entries
            .read()
            .contains_key(&(namespace.to_string(), key.to_string()))
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Number of successful `set` calls so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

impl KvStore for MemoryKvStore {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self
            .entries
            .read()
            .get(&(namespace.to_string(), key.to_string()))
            .cloned())
    }

    fn set(&self, namespace: &str, key: &str, value: &[u8]) -> Result<()> {
        if let Some(limit) = self.value_limit
            && value.len() > limit
        {
            return Err(DataModelError::NoMemory(format!(
                "{}/{}: {} bytes exceed the {} byte value limit",
                namespace,
                key,
                value.len(),
                limit
            )));
        }
        self.entries
            .write()
            .insert((namespace.to_string(), key.to_string()), value.to_vec());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn erase(&self, namespace: &str, key: &str) -> Result<bool> {
        Ok(self
            .entries
            .write()
            .remove(&(namespace.to_string(), key.to_string()))
            .is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_set_get_erase() {
        let store = MemoryKvStore::new();
        store.set("ep_1", "6:0", b"true").unwrap();
        assert_eq!(store.get("ep_1", "6:0").unwrap(), Some(b"true".to_vec()));
        assert_eq!(store.get("ep_2", "6:0").unwrap(), None);
        assert!(store.erase("ep_1", "6:0").unwrap());
        assert!(!store.erase("ep_1", "6:0").unwrap());
        assert!(store.is_empty());
    }

    #[test]
    fn test_value_limit() {
        let store = MemoryKvStore::with_value_limit(4);
        let err = store.set("ep_1", "6:0", b"12345").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoMemory);
        store.set("ep_1", "6:0", b"1234").unwrap();
        assert_eq!(store.write_count(), 1);
    }
}
