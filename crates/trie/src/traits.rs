//! Capability traits consumed by the trie storage manager
//!
//! The manager does not know the node wire format or the hash function; it
//! consumes them behind small capability sets:
//!
//! - `TrieStorage`: what a node traversal reads from and writes to
//! - `SnapshotNode` + `NodeDecoder`: the opaque recursive commit walk
//! - `CheckpointHashesHolder`: bookkeeping of dirty hashes per root

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::closer::SafeCloser;
use crate::errors::TrieError;
use storage::Persister;

/// Set of node hashes modified under one root
pub type ModifiedHashes = HashSet<Vec<u8>>;

/// A leaf key/value pair emitted during a snapshot or checkpoint traversal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrieLeaf {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

/// Storage operations a node traversal runs against.
///
/// Implemented by the storage manager itself (reads spanning the whole
/// lookup chain) and by the snapshot view (same reads, writes redirected to
/// a snapshot database).
pub trait TrieStorage: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Vec<u8>, TrieError>;
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), TrieError>;
}

/// The recursive commit walk over a decoded trie node.
///
/// Implementations observe `ctx` while traversing and return
/// [`TrieError::ContextClosing`] when it fires; the worker treats that as a
/// clean shutdown, not a fault. `leaves` is a back-pressured stream of leaf
/// pairs for downstream consumers; the caller owns closing it.
#[async_trait]
pub trait SnapshotNode: Send + Sync {
    /// Copy every node reachable from this one into `db`.
    async fn commit_snapshot(
        &self,
        db: &dyn TrieStorage,
        leaves: Option<&mpsc::Sender<TrieLeaf>>,
        ctx: &SafeCloser,
    ) -> Result<(), TrieError>;

    /// Copy the nodes recorded as dirty since the last checkpoint into
    /// `checkpoints`, updating `hashes_holder` as a side effect of the walk.
    async fn commit_checkpoint(
        &self,
        db: &dyn TrieStorage,
        checkpoints: &dyn Persister,
        hashes_holder: &dyn CheckpointHashesHolder,
        leaves: Option<&mpsc::Sender<TrieLeaf>>,
        ctx: &SafeCloser,
    ) -> Result<(), TrieError>;
}

/// Decodes the stored representation of a trie node into a walkable one.
pub trait NodeDecoder: Send + Sync {
    fn decode(&self, encoded: &[u8]) -> Result<Arc<dyn SnapshotNode>, TrieError>;
}

/// Records which node hashes belong to the latest checkpoint window.
///
/// Implementations are thread-safe by contract; the manager calls into the
/// holder without taking its own lock.
pub trait CheckpointHashesHolder: Send + Sync {
    /// Record the hashes modified under `root_hash`. Returns true when the
    /// holder now exceeds its capacity and a new checkpoint should be
    /// scheduled by the caller.
    fn put(&self, root_hash: &[u8], hashes: ModifiedHashes) -> bool;

    /// Forget a single node hash wherever it is recorded.
    fn remove(&self, hash: &[u8]);

    /// Drop everything recorded up to and including `root_hash`; called when
    /// a snapshot of that root supersedes the checkpoint bookkeeping.
    fn remove_committed(&self, root_hash: &[u8]);
}
