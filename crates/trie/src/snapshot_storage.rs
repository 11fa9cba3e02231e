//! Snapshot traversal view
//!
//! While a snapshot is being taken, the node walk reads through the full
//! lookup chain of the storage manager but writes every visited node to one
//! dedicated snapshot database. This wrapper is that view; it lives only for
//! the duration of a single snapshot operation.

use std::sync::Arc;

use crate::errors::TrieError;
use crate::storage_manager::TrieStorageManager;
use crate::traits::TrieStorage;
use storage::Persister;

pub struct SnapshotStorageManager {
    manager: Arc<TrieStorageManager>,
    snapshot_db: Arc<dyn Persister>,
}

impl SnapshotStorageManager {
    pub(crate) fn new(manager: Arc<TrieStorageManager>, snapshot_db: Arc<dyn Persister>) -> Self {
        Self {
            manager,
            snapshot_db,
        }
    }
}

impl TrieStorage for SnapshotStorageManager {
    fn get(&self, key: &[u8]) -> Result<Vec<u8>, TrieError> {
        self.manager.get(key)
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), TrieError> {
        Ok(self.snapshot_db.put(key, value)?)
    }
}
