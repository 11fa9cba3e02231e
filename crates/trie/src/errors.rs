//! Error types for the trie storage layer

use storage::StoreError;
use thiserror::Error;

/// Unified error type for trie storage operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrieError {
    /// The key was not found in any storer of the lookup chain
    #[error("key not found")]
    KeyNotFound,

    /// The storage manager is shutting down; node traversals report this to
    /// signal a clean cancellation rather than a fault
    #[error("context closing")]
    ContextClosing,

    /// Invalid construction-time configuration
    #[error("invalid trie storage config: {0}")]
    InvalidConfig(String),

    /// A node could not be decoded from its stored representation
    #[error("invalid node: {0}")]
    InvalidNode(String),

    /// Underlying persister failure, surfaced verbatim on write paths
    #[error(transparent)]
    Storage(#[from] StoreError),

    /// One or more resources failed to close during shutdown
    #[error("trie storage manager close failed: {0}")]
    CloseFailed(String),
}
