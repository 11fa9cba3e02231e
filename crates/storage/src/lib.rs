pub mod memory;
pub mod rocksdb;
pub mod traits;

// Re-export commonly used types
pub use traits::{new_db, DbArgs, DbType, EpochAware, Persister, StoreError, StoreResult};
