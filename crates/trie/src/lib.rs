//! Trie storage layer
//!
//! Backs a Merkle-Patricia trie with multi-tier persistent storage:
//! a live main storer, a legacy storer kept for backward reads, a long-lived
//! checkpoints storer and a rotating set of append-only snapshot databases.
//! A single background worker realizes queued snapshot and checkpoint
//! requests while foreground reads and writes keep being served.

pub mod checkpoint_hashes;
pub mod closer;
pub mod config;
pub mod errors;
pub mod snapshot_registry;
pub mod snapshot_storage;
pub mod storage_manager;
pub mod traits;

// Re-export commonly used types
pub use checkpoint_hashes::HashesHolder;
pub use closer::SafeCloser;
pub use config::{Config, SnapshotDbConfig, TrieStorageConfig};
pub use errors::TrieError;
pub use snapshot_storage::SnapshotStorageManager;
pub use storage_manager::{TrieStorageManager, TrieStorageManagerArgs};
pub use traits::{
    CheckpointHashesHolder, ModifiedHashes, NodeDecoder, SnapshotNode, TrieLeaf, TrieStorage,
};

/// Hash of the empty trie. Snapshot and checkpoint requests targeting it are
/// no-ops; it never resolves to an actual node.
pub const EMPTY_TRIE_HASH: [u8; 32] = [0u8; 32];
