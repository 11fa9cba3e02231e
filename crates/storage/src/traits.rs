//! Persister trait definitions
//!
//! A `Persister` is the smallest storage capability the trie layer consumes:
//! point reads, point writes, removal and a one-shot close. Implementations:
//!
//! - `RocksDbPersister`: persistent, write-batched (production)
//! - `MemoryPersister`: plain in-memory map (tests, ephemeral snapshot dbs)

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Persister error
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The persister has already been closed
    #[error("store is closed")]
    Closed,
    /// Underlying I/O failure
    #[error("io error: {0}")]
    Io(String),
    /// Invalid argument
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Internal error from the storage engine
    #[error("internal error: {0}")]
    Internal(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

// ============================================================================
// Persister Trait
// ============================================================================

/// Key-value persister capability.
///
/// All methods take `&self`; implementations use interior mutability so a
/// single instance can be shared across threads behind an `Arc`.
pub trait Persister: Send + Sync {
    /// Get the value stored under `key`. `Ok(None)` means not found.
    fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>>;

    /// Store `value` under `key`.
    fn put(&self, key: &[u8], value: &[u8]) -> StoreResult<()>;

    /// Remove `key`. Removing an absent key is not an error.
    fn remove(&self, key: &[u8]) -> StoreResult<()>;

    /// Flush and release the underlying resources. Idempotent: the second
    /// and subsequent calls are no-ops.
    fn close(&self) -> StoreResult<()>;

    /// Probe for the epoch-aware write capability. Storers that route writes
    /// per epoch return `Some(self)`.
    fn as_epoch_aware(&self) -> Option<&dyn EpochAware> {
        None
    }
}

/// Optional capability of persisters that segregate writes by epoch.
pub trait EpochAware {
    /// Route subsequent `put` operations to the storage of the given epoch.
    fn set_epoch_for_put_operation(&self, epoch: u32);
}

// ============================================================================
// Factory
// ============================================================================

/// Supported persister backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DbType {
    RocksDb,
    Memory,
}

/// Arguments for opening a persister through [`new_db`]
#[derive(Debug, Clone)]
pub struct DbArgs {
    pub db_type: DbType,
    pub path: std::path::PathBuf,
    /// Seconds between periodic write-batch flushes
    pub batch_delay_seconds: u64,
    /// Pending writes that force an immediate flush
    pub max_batch_size: usize,
    /// Max open files hint for the storage engine
    pub max_open_files: i32,
}

/// Open a persister of the configured type rooted at `args.path`.
pub fn new_db(args: DbArgs) -> StoreResult<Arc<dyn Persister>> {
    match args.db_type {
        DbType::RocksDb => {
            let db = crate::rocksdb::RocksDbPersister::open(
                &args.path,
                args.batch_delay_seconds,
                args.max_batch_size,
                args.max_open_files,
            )?;
            Ok(Arc::new(db))
        }
        DbType::Memory => Ok(Arc::new(crate::memory::MemoryPersister::new())),
    }
}
