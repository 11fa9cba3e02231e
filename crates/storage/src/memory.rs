//! In-memory persister
//!
//! A plain `HashMap` behind a `RwLock`. Backs the `memory` db type and most
//! of the test suite. Data does not survive the process; the directory a
//! memory persister is nominally rooted at is managed by the caller.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::traits::{Persister, StoreError, StoreResult};

/// Memory-backed persister
///
/// The map is wrapped in an `Option` so `close` can release it exactly once;
/// every operation after close reports `StoreError::Closed`.
pub struct MemoryPersister {
    data: RwLock<Option<HashMap<Vec<u8>, Vec<u8>>>>,
}

impl Default for MemoryPersister {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryPersister {
    pub fn new() -> Self {
        Self {
            data: RwLock::new(Some(HashMap::new())),
        }
    }

    /// Number of stored entries (testing/debugging)
    pub fn len(&self) -> usize {
        self.data.read().as_ref().map_or(0, |m| m.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Persister for MemoryPersister {
    fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        let guard = self.data.read();
        let map = guard.as_ref().ok_or(StoreError::Closed)?;
        Ok(map.get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> StoreResult<()> {
        let mut guard = self.data.write();
        let map = guard.as_mut().ok_or(StoreError::Closed)?;
        map.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn remove(&self, key: &[u8]) -> StoreResult<()> {
        let mut guard = self.data.write();
        let map = guard.as_mut().ok_or(StoreError::Closed)?;
        map.remove(key);
        Ok(())
    }

    fn close(&self) -> StoreResult<()> {
        self.data.write().take();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get_remove() {
        let store = MemoryPersister::new();

        store.put(b"key1", b"value1").unwrap();
        assert_eq!(store.get(b"key1").unwrap(), Some(b"value1".to_vec()));

        store.remove(b"key1").unwrap();
        assert_eq!(store.get(b"key1").unwrap(), None);

        // Removing an absent key is fine
        store.remove(b"key1").unwrap();
    }

    #[test]
    fn test_close_is_idempotent() {
        let store = MemoryPersister::new();
        store.put(b"key1", b"value1").unwrap();

        store.close().unwrap();
        store.close().unwrap();

        assert_eq!(store.get(b"key1"), Err(StoreError::Closed));
        assert_eq!(store.put(b"key1", b"value2"), Err(StoreError::Closed));
    }
}
