//! Shared fixtures for the storage manager tests: a scriptable node walker,
//! a decoder backed by a registration map, and an epoch-aware persister.
#![allow(dead_code)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::sync::mpsc;

use storage::memory::MemoryPersister;
use storage::{DbType, EpochAware, Persister, StoreError, StoreResult};
use trie::closer::SafeCloser;
use trie::config::{SnapshotDbConfig, TrieStorageConfig};
use trie::traits::{CheckpointHashesHolder, NodeDecoder, SnapshotNode, TrieLeaf, TrieStorage};
use trie::{HashesHolder, TrieError, TrieStorageManager, TrieStorageManagerArgs};

// ==================== Mock Node Walker ====================

/// What a mock node does when its commit walk is invoked
pub enum NodeBehavior {
    /// Write these nodes to the target storer and emit these leaves
    Commit {
        nodes: Vec<(Vec<u8>, Vec<u8>)>,
        leaves: Vec<TrieLeaf>,
    },
    /// Park until the close signal fires, then report clean cancellation
    WaitForClose,
    /// Report clean cancellation immediately
    ContextClosing,
    /// Fail the traversal
    Fail(String),
}

pub struct MockNode {
    behavior: NodeBehavior,
    /// Set as soon as a commit walk begins
    pub started: Arc<AtomicBool>,
}

impl MockNode {
    pub fn commit(nodes: Vec<(Vec<u8>, Vec<u8>)>, leaves: Vec<TrieLeaf>) -> Arc<Self> {
        Self::with_behavior(NodeBehavior::Commit { nodes, leaves })
    }

    pub fn wait_for_close() -> Arc<Self> {
        Self::with_behavior(NodeBehavior::WaitForClose)
    }

    pub fn context_closing() -> Arc<Self> {
        Self::with_behavior(NodeBehavior::ContextClosing)
    }

    pub fn failing(message: &str) -> Arc<Self> {
        Self::with_behavior(NodeBehavior::Fail(message.to_string()))
    }

    fn with_behavior(behavior: NodeBehavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            started: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn has_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    async fn emit_leaves(
        &self,
        to_emit: &[TrieLeaf],
        leaves: Option<&mpsc::Sender<TrieLeaf>>,
        ctx: &SafeCloser,
    ) -> Result<(), TrieError> {
        let Some(tx) = leaves else {
            return Ok(());
        };
        for leaf in to_emit {
            tokio::select! {
                result = tx.send(leaf.clone()) => {
                    if result.is_err() {
                        break;
                    }
                }
                _ = ctx.closed() => return Err(TrieError::ContextClosing),
            }
        }
        Ok(())
    }
}

#[async_trait]
impl SnapshotNode for MockNode {
    async fn commit_snapshot(
        &self,
        db: &dyn TrieStorage,
        leaves: Option<&mpsc::Sender<TrieLeaf>>,
        ctx: &SafeCloser,
    ) -> Result<(), TrieError> {
        self.started.store(true, Ordering::SeqCst);
        match &self.behavior {
            NodeBehavior::Commit {
                nodes,
                leaves: to_emit,
            } => {
                for (key, value) in nodes {
                    db.put(key, value)?;
                }
                self.emit_leaves(to_emit, leaves, ctx).await
            }
            NodeBehavior::WaitForClose => {
                ctx.closed().await;
                Err(TrieError::ContextClosing)
            }
            NodeBehavior::ContextClosing => Err(TrieError::ContextClosing),
            NodeBehavior::Fail(message) => {
                Err(TrieError::Storage(StoreError::Internal(message.clone())))
            }
        }
    }

    async fn commit_checkpoint(
        &self,
        _db: &dyn TrieStorage,
        checkpoints: &dyn Persister,
        _hashes_holder: &dyn CheckpointHashesHolder,
        leaves: Option<&mpsc::Sender<TrieLeaf>>,
        ctx: &SafeCloser,
    ) -> Result<(), TrieError> {
        self.started.store(true, Ordering::SeqCst);
        match &self.behavior {
            NodeBehavior::Commit {
                nodes,
                leaves: to_emit,
            } => {
                for (key, value) in nodes {
                    checkpoints.put(key, value)?;
                }
                self.emit_leaves(to_emit, leaves, ctx).await
            }
            NodeBehavior::WaitForClose => {
                ctx.closed().await;
                Err(TrieError::ContextClosing)
            }
            NodeBehavior::ContextClosing => Err(TrieError::ContextClosing),
            NodeBehavior::Fail(message) => {
                Err(TrieError::Storage(StoreError::Internal(message.clone())))
            }
        }
    }
}

/// Decoder resolving stored node bytes through a registration map
#[derive(Default)]
pub struct MockDecoder {
    nodes: Mutex<HashMap<Vec<u8>, Arc<MockNode>>>,
}

impl MockDecoder {
    pub fn register(&self, encoded: &[u8], node: Arc<MockNode>) {
        self.nodes.lock().insert(encoded.to_vec(), node);
    }
}

impl NodeDecoder for MockDecoder {
    fn decode(&self, encoded: &[u8]) -> Result<Arc<dyn SnapshotNode>, TrieError> {
        self.nodes
            .lock()
            .get(encoded)
            .cloned()
            .map(|node| node as Arc<dyn SnapshotNode>)
            .ok_or_else(|| TrieError::InvalidNode(format!("unknown node: {:x?}", encoded)))
    }
}

// ==================== Epoch-Aware Persister ====================

/// Memory persister that additionally records the epoch it was switched to
pub struct EpochMemoryPersister {
    inner: MemoryPersister,
    pub epoch: AtomicU32,
}

impl EpochMemoryPersister {
    pub fn new() -> Self {
        Self {
            inner: MemoryPersister::new(),
            epoch: AtomicU32::new(0),
        }
    }
}

impl Persister for EpochMemoryPersister {
    fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        self.inner.get(key)
    }

    fn put(&self, key: &[u8], value: &[u8]) -> StoreResult<()> {
        self.inner.put(key, value)
    }

    fn remove(&self, key: &[u8]) -> StoreResult<()> {
        self.inner.remove(key)
    }

    fn close(&self) -> StoreResult<()> {
        self.inner.close()
    }

    fn as_epoch_aware(&self) -> Option<&dyn EpochAware> {
        Some(self)
    }
}

impl EpochAware for EpochMemoryPersister {
    fn set_epoch_for_put_operation(&self, epoch: u32) {
        self.epoch.store(epoch, Ordering::SeqCst);
    }
}

// ==================== Test Setup ====================

pub struct TestSetup {
    pub manager: Arc<TrieStorageManager>,
    pub main: Arc<MemoryPersister>,
    pub legacy: Arc<MemoryPersister>,
    pub checkpoints: Arc<MemoryPersister>,
    pub decoder: Arc<MockDecoder>,
    pub holder: Arc<HashesHolder>,
    pub snapshot_dir: PathBuf,
    _tmp: TempDir,
}

pub fn new_setup() -> TestSetup {
    new_setup_with(TrieStorageConfig::default())
}

pub fn new_setup_with(general_config: TrieStorageConfig) -> TestSetup {
    let tmp = TempDir::new().unwrap();
    let snapshot_dir = tmp.path().join("snapshots");

    let main = Arc::new(MemoryPersister::new());
    let legacy = Arc::new(MemoryPersister::new());
    let checkpoints = Arc::new(MemoryPersister::new());
    let decoder = Arc::new(MockDecoder::default());
    let holder = Arc::new(HashesHolder::new(10 * 1024, 32));

    let manager = TrieStorageManager::new(TrieStorageManagerArgs {
        db: legacy.clone(),
        main_storer: main.clone(),
        checkpoints_storer: checkpoints.clone(),
        node_decoder: decoder.clone(),
        checkpoint_hashes_holder: holder.clone(),
        snapshot_db_config: SnapshotDbConfig {
            db_type: DbType::Memory,
            file_path: snapshot_dir.clone(),
            ..Default::default()
        },
        general_config,
    })
    .unwrap();

    TestSetup {
        manager,
        main,
        legacy,
        checkpoints,
        decoder,
        holder,
        snapshot_dir,
        _tmp: tmp,
    }
}

/// Seed the main storer with `root -> root` and register a node for it, so
/// the worker's decode step resolves to `node`.
pub fn register_root(setup: &TestSetup, root: &[u8], node: Arc<MockNode>) {
    setup.main.put(root, root).unwrap();
    setup.decoder.register(root, node);
}

/// Poll `cond` until it holds or `timeout` elapses; returns the final state.
pub async fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}
