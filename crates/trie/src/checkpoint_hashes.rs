//! Size-bounded checkpoint hashes holder
//!
//! Keeps, in submission order, the sets of node hashes that were modified
//! under each committed root since the last checkpoint. The holder signals
//! its caller when the recorded data outgrows the configured capacity, which
//! is the cue to schedule a new checkpoint.

use parking_lot::RwLock;
use tracing::trace;

use crate::traits::{CheckpointHashesHolder, ModifiedHashes};

struct HolderState {
    /// (root hash, hashes dirtied under it), oldest first
    entries: Vec<(Vec<u8>, ModifiedHashes)>,
    /// Accounted bytes: per entry, root length plus `hash_size` per hash
    current_size: u64,
}

/// In-memory implementation of [`CheckpointHashesHolder`]
pub struct HashesHolder {
    max_size: u64,
    hash_size: u64,
    state: RwLock<HolderState>,
}

impl HashesHolder {
    /// `max_size` is the capacity in accounted bytes, `hash_size` the length
    /// of a single node hash (32 for the usual tries).
    pub fn new(max_size: u64, hash_size: u64) -> Self {
        Self {
            max_size,
            hash_size,
            state: RwLock::new(HolderState {
                entries: Vec::new(),
                current_size: 0,
            }),
        }
    }

    fn entry_size(&self, root_hash: &[u8], hashes: &ModifiedHashes) -> u64 {
        root_hash.len() as u64 + hashes.len() as u64 * self.hash_size
    }
}

impl CheckpointHashesHolder for HashesHolder {
    fn put(&self, root_hash: &[u8], hashes: ModifiedHashes) -> bool {
        let mut state = self.state.write();

        // The same root committed twice in a row carries nothing new
        if let Some((last_root, _)) = state.entries.last() {
            if last_root.as_slice() == root_hash {
                return false;
            }
        }

        state.current_size += self.entry_size(root_hash, &hashes);
        state.entries.push((root_hash.to_vec(), hashes));

        trace!(
            "checkpoint hashes holder size: {} / {}",
            state.current_size,
            self.max_size
        );
        state.current_size > self.max_size
    }

    fn remove(&self, hash: &[u8]) {
        let mut state = self.state.write();
        let mut removed = 0u64;
        for (_, hashes) in state.entries.iter_mut() {
            if hashes.remove(hash) {
                removed += self.hash_size;
            }
        }
        state.current_size = state.current_size.saturating_sub(removed);
    }

    fn remove_committed(&self, root_hash: &[u8]) {
        let mut state = self.state.write();
        let position = state
            .entries
            .iter()
            .position(|(root, _)| root.as_slice() == root_hash);

        if let Some(position) = position {
            let mut freed = 0u64;
            for (root, hashes) in state.entries.drain(..=position) {
                freed += root.len() as u64 + hashes.len() as u64 * self.hash_size;
            }
            state.current_size = state.current_size.saturating_sub(freed);
        }
    }
}
