//! RocksDB persister
//!
//! Implements `Persister` on top of RocksDB with write batching:
//!
//! - `put`/`remove` land in a pending map first (read-your-writes)
//! - the pending map is written out as a single `WriteBatch` when it grows to
//!   `max_batch_size`, when the periodic flusher fires, and on `close`
//!
//! The flusher is a dedicated thread woken every `batch_delay_seconds`, or
//! immediately on close through a condvar.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex, RwLock};
use rocksdb::{Options, WriteBatch, DB};
use tracing::{debug, error, info};

use crate::traits::{Persister, StoreError, StoreResult};

struct RocksInner {
    /// `None` once closed; the handle is dropped exactly once.
    db: RwLock<Option<Arc<DB>>>,
    /// Writes not yet handed to RocksDB. `None` value marks a deletion.
    pending: Mutex<HashMap<Vec<u8>, Option<Vec<u8>>>>,
    max_batch_size: usize,
}

impl RocksInner {
    fn flush_pending(&self) -> StoreResult<()> {
        let drained: Vec<(Vec<u8>, Option<Vec<u8>>)> = {
            let mut pending = self.pending.lock();
            if pending.is_empty() {
                return Ok(());
            }
            pending.drain().collect()
        };

        let db = {
            let guard = self.db.read();
            match guard.as_ref() {
                Some(db) => db.clone(),
                None => return Err(StoreError::Closed),
            }
        };

        let mut batch = WriteBatch::default();
        for (key, value) in &drained {
            match value {
                Some(v) => batch.put(key, v),
                None => batch.delete(key),
            }
        }

        db.write(batch).map_err(|e| StoreError::Io(e.to_string()))?;
        debug!("flushed {} pending writes to rocksdb", drained.len());
        Ok(())
    }
}

/// RocksDB-backed persister
pub struct RocksDbPersister {
    inner: Arc<RocksInner>,
    path: PathBuf,
    /// Flusher shutdown signal: flag + condvar so close does not have to
    /// wait out a full batch delay.
    stop: Arc<(Mutex<bool>, Condvar)>,
    flusher: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl RocksDbPersister {
    /// Open or create a database at `path` with the given batching parameters.
    pub fn open(
        path: &Path,
        batch_delay_seconds: u64,
        max_batch_size: usize,
        max_open_files: i32,
    ) -> StoreResult<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_max_open_files(max_open_files);
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);

        let db = DB::open(&opts, path).map_err(|e| StoreError::Io(e.to_string()))?;
        info!("rocksdb opened at: {}", path.display());

        let inner = Arc::new(RocksInner {
            db: RwLock::new(Some(Arc::new(db))),
            pending: Mutex::new(HashMap::new()),
            max_batch_size: max_batch_size.max(1),
        });

        let stop = Arc::new((Mutex::new(false), Condvar::new()));
        let flusher = Self::spawn_flusher(
            inner.clone(),
            stop.clone(),
            Duration::from_secs(batch_delay_seconds.max(1)),
        );

        Ok(Self {
            inner,
            path: path.to_path_buf(),
            stop,
            flusher: Mutex::new(Some(flusher)),
        })
    }

    /// Database path
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn spawn_flusher(
        inner: Arc<RocksInner>,
        stop: Arc<(Mutex<bool>, Condvar)>,
        delay: Duration,
    ) -> std::thread::JoinHandle<()> {
        std::thread::spawn(move || {
            let (lock, cvar) = &*stop;
            loop {
                let mut stopped = lock.lock();
                while !*stopped {
                    if cvar.wait_for(&mut stopped, delay).timed_out() {
                        break;
                    }
                }
                let should_stop = *stopped;
                drop(stopped);

                if should_stop {
                    return;
                }
                if let Err(e) = inner.flush_pending() {
                    if e != StoreError::Closed {
                        error!("rocksdb periodic flush failed: {}", e);
                    }
                }
            }
        })
    }

    fn signal_flusher_stop(&self) {
        let (lock, cvar) = &*self.stop;
        let mut stopped = lock.lock();
        *stopped = true;
        cvar.notify_all();
    }
}

impl Persister for RocksDbPersister {
    fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        // Pending writes shadow the database
        {
            let pending = self.inner.pending.lock();
            if let Some(value) = pending.get(key) {
                return Ok(value.clone());
            }
        }

        let guard = self.inner.db.read();
        let db = guard.as_ref().ok_or(StoreError::Closed)?;
        db.get(key).map_err(|e| StoreError::Io(e.to_string()))
    }

    fn put(&self, key: &[u8], value: &[u8]) -> StoreResult<()> {
        if self.inner.db.read().is_none() {
            return Err(StoreError::Closed);
        }

        let batch_full = {
            let mut pending = self.inner.pending.lock();
            pending.insert(key.to_vec(), Some(value.to_vec()));
            pending.len() >= self.inner.max_batch_size
        };
        if batch_full {
            self.inner.flush_pending()?;
        }
        Ok(())
    }

    fn remove(&self, key: &[u8]) -> StoreResult<()> {
        if self.inner.db.read().is_none() {
            return Err(StoreError::Closed);
        }

        let batch_full = {
            let mut pending = self.inner.pending.lock();
            pending.insert(key.to_vec(), None);
            pending.len() >= self.inner.max_batch_size
        };
        if batch_full {
            self.inner.flush_pending()?;
        }
        Ok(())
    }

    fn close(&self) -> StoreResult<()> {
        // Stop the flusher first so it cannot race the final flush
        self.signal_flusher_stop();
        match self.flusher.lock().take() {
            Some(handle) => {
                let _ = handle.join();
            }
            // Already closed
            None => return Ok(()),
        }

        let flush_result = self.inner.flush_pending();

        let db = self.inner.db.write().take();
        if let Some(db) = db {
            if let Err(e) = db.flush() {
                error!("rocksdb flush on close failed: {}", e);
            }
            debug!("rocksdb closed at: {}", self.path.display());
        }

        match flush_result {
            Err(StoreError::Closed) | Ok(()) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl Drop for RocksDbPersister {
    fn drop(&mut self) {
        // A persister dropped without close must not strand its flusher
        self.signal_flusher_stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_store(dir: &TempDir) -> RocksDbPersister {
        RocksDbPersister::open(dir.path(), 1, 4, 10).unwrap()
    }

    #[test]
    fn test_pending_writes_are_readable() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        store.put(b"key1", b"value1").unwrap();
        assert_eq!(store.get(b"key1").unwrap(), Some(b"value1".to_vec()));

        store.remove(b"key1").unwrap();
        assert_eq!(store.get(b"key1").unwrap(), None);

        store.close().unwrap();
    }

    #[test]
    fn test_batch_threshold_flushes() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        for i in 0..4u8 {
            store.put(&[i], &[i]).unwrap();
        }
        // Threshold reached, pending map handed to rocksdb
        assert!(store.inner.pending.lock().is_empty());
        assert_eq!(store.get(&[2u8]).unwrap(), Some(vec![2u8]));

        store.close().unwrap();
    }

    #[test]
    fn test_data_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = open_store(&dir);
            store.put(b"key1", b"value1").unwrap();
            store.close().unwrap();
        }
        {
            let store = open_store(&dir);
            assert_eq!(store.get(b"key1").unwrap(), Some(b"value1".to_vec()));
            store.close().unwrap();
        }
    }

    #[test]
    fn test_close_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        store.put(b"key1", b"value1").unwrap();
        store.close().unwrap();
        store.close().unwrap();

        assert_eq!(store.get(b"key1"), Err(StoreError::Closed));
        assert_eq!(store.put(b"key2", b"value2"), Err(StoreError::Closed));
    }
}
