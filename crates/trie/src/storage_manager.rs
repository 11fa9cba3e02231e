//! Trie storage manager
//!
//! Coordinates all storage operations of the trie: multi-storer lookup,
//! snapshotting, checkpointing and pruning coordination.
//!
//! ## Responsibilities
//! - Serve foreground reads across main, legacy, checkpoints and snapshot
//!   storers, and writes to the main storer
//! - Queue snapshot/checkpoint requests and realize them on a single
//!   background worker task
//! - Track operations that block pruning while a request is queued or running
//! - Tear down without dropping an accepted request silently
//!
//! ## Lock strategy
//! Every storer access goes through one exclusive lock, because snapshot
//! rotation mutates the snapshot list under the reader's feet otherwise.
//! Submission never holds the lock while waiting for queue capacity.

use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, error, trace};

use crate::closer::SafeCloser;
use crate::config::{SnapshotDbConfig, TrieStorageConfig};
use crate::errors::TrieError;
use crate::snapshot_registry::SnapshotRegistry;
use crate::snapshot_storage::SnapshotStorageManager;
use crate::traits::{
    CheckpointHashesHolder, ModifiedHashes, NodeDecoder, SnapshotNode, TrieLeaf, TrieStorage,
};
use crate::EMPTY_TRIE_HASH;
use storage::Persister;

/// A queued snapshot or checkpoint request.
///
/// Dropping the entry closes its leaves channel, which is how the consumer
/// on the other end learns the operation is finished or abandoned.
struct SnapshotQueueEntry {
    root_hash: Vec<u8>,
    new_db: bool,
    leaves_chan: Option<mpsc::Sender<TrieLeaf>>,
}

/// Arguments for creating a new [`TrieStorageManager`]
pub struct TrieStorageManagerArgs {
    /// Legacy secondary storer retained for backward reads
    pub db: Arc<dyn Persister>,
    /// Live, writable trie node store
    pub main_storer: Arc<dyn Persister>,
    /// Long-lived store accumulating checkpoint-reachable nodes
    pub checkpoints_storer: Arc<dyn Persister>,
    /// Decodes stored node representations for the commit walks
    pub node_decoder: Arc<dyn NodeDecoder>,
    pub checkpoint_hashes_holder: Arc<dyn CheckpointHashesHolder>,
    pub snapshot_db_config: SnapshotDbConfig,
    pub general_config: TrieStorageConfig,
}

/// Storer state guarded by the storage-operation lock
struct StorageState {
    main_storer: Arc<dyn Persister>,
    /// Legacy secondary storer
    db: Arc<dyn Persister>,
    checkpoints_storer: Arc<dyn Persister>,
    registry: SnapshotRegistry,
    pruning_blocking_ops: u32,
    closed: bool,
}

/// Manages all the storage operations of the trie
pub struct TrieStorageManager {
    state: RwLock<StorageState>,
    snapshot_req: mpsc::Sender<SnapshotQueueEntry>,
    checkpoint_req: mpsc::Sender<SnapshotQueueEntry>,
    checkpoint_hashes: Arc<dyn CheckpointHashesHolder>,
    node_decoder: Arc<dyn NodeDecoder>,
    snapshot_db_cfg: SnapshotDbConfig,
    max_snapshots: u32,
    keep_snapshots: bool,
    /// Stops the worker's select loop
    cancel: SafeCloser,
    /// Fired last during close; releases blocked producers and bounds the
    /// worker's cleanup drain
    closer: SafeCloser,
}

impl TrieStorageManager {
    /// Create a new manager and spawn its background worker.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(args: TrieStorageManagerArgs) -> Result<Arc<Self>, TrieError> {
        if args.general_config.snapshots_buffer_len == 0 {
            return Err(TrieError::InvalidConfig(
                "snapshots buffer length must be at least 1".to_string(),
            ));
        }

        // Discovery keeps every snapshot found before a failing entry, so a
        // stray directory cannot reset the id sequence over live data
        let (registry, discovery_error) = SnapshotRegistry::discover(&args.snapshot_db_config);
        if let Some(e) = discovery_error {
            debug!("snapshot discovery failed: {}", e);
        }

        let buffer_len = args.general_config.snapshots_buffer_len;
        let (snapshot_tx, snapshot_rx) = mpsc::channel(buffer_len);
        let (checkpoint_tx, checkpoint_rx) = mpsc::channel(buffer_len);

        let manager = Arc::new(Self {
            state: RwLock::new(StorageState {
                main_storer: args.main_storer,
                db: args.db,
                checkpoints_storer: args.checkpoints_storer,
                registry,
                pruning_blocking_ops: 0,
                closed: false,
            }),
            snapshot_req: snapshot_tx,
            checkpoint_req: checkpoint_tx,
            checkpoint_hashes: args.checkpoint_hashes_holder,
            node_decoder: args.node_decoder,
            snapshot_db_cfg: args.snapshot_db_config,
            max_snapshots: args.general_config.max_snapshots,
            keep_snapshots: args.general_config.keep_snapshots,
            cancel: SafeCloser::new(),
            closer: SafeCloser::new(),
        });

        let worker = StorageWorker {
            manager: Arc::downgrade(&manager),
            snapshot_req: snapshot_rx,
            checkpoint_req: checkpoint_rx,
            cancel: manager.cancel.clone(),
            closer: manager.closer.clone(),
        };
        tokio::spawn(worker.run());

        Ok(manager)
    }

    // ==================== Foreground Operations ====================

    /// Check all the storers for the given key and return the first hit.
    ///
    /// Lookup order: main storer, legacy storer, checkpoints storer, then the
    /// snapshot databases newest first.
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>, TrieError> {
        let state = self.state.write();

        if let Some(value) = read_storer(&state.main_storer, key) {
            return Ok(value);
        }
        if let Some(value) = read_storer(&state.db, key) {
            return Ok(value);
        }
        if let Some(value) = read_storer(&state.checkpoints_storer, key) {
            return Ok(value);
        }
        for snapshot_db in state.registry.iter_newest_first() {
            if let Some(value) = read_storer(snapshot_db, key) {
                return Ok(value);
            }
        }

        Err(TrieError::KeyNotFound)
    }

    /// Add the given value to the main storer.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<(), TrieError> {
        let state = self.state.write();
        trace!("put hash in trie storage manager, hash: {:x?}", key);

        Ok(state.main_storer.put(key, value)?)
    }

    /// Remove the given hash from the main storer and from the checkpoint
    /// hashes holder.
    pub fn remove(&self, hash: &[u8]) -> Result<(), TrieError> {
        let state = self.state.write();

        self.checkpoint_hashes.remove(hash);
        Ok(state.main_storer.remove(hash)?)
    }

    /// Increase the counter of operations that block the pruning process.
    pub fn enter_pruning_buffering_mode(&self) {
        let mut state = self.state.write();
        state.pruning_blocking_ops += 1;

        trace!(
            "enter pruning buffering state, operations that block pruning: {}",
            state.pruning_blocking_ops
        );
    }

    /// Decrease the counter of operations that block the pruning process.
    /// The counter saturates at zero; going below is reported, not fatal.
    pub fn exit_pruning_buffering_mode(&self) {
        let mut state = self.state.write();
        if state.pruning_blocking_ops < 1 {
            error!("exit_pruning_buffering_mode called too many times");
            return;
        }
        state.pruning_blocking_ops -= 1;

        trace!(
            "exit pruning buffering state, operations that block pruning: {}",
            state.pruning_blocking_ops
        );
    }

    /// Whether any pruning-blocking operation is queued or in progress.
    pub fn is_pruning_blocked(&self) -> bool {
        self.state.read().pruning_blocking_ops != 0
    }

    /// Trie pruning is always enabled for this manager.
    pub fn is_pruning_enabled(&self) -> bool {
        true
    }

    /// Record the hashes dirtied under `root_hash`. Returns true when the
    /// holder wants a new checkpoint scheduled; the policy lives in the
    /// caller.
    pub fn add_dirty_checkpoint_hashes(&self, root_hash: &[u8], hashes: ModifiedHashes) -> bool {
        self.checkpoint_hashes.put(root_hash, hashes)
    }

    /// The configured batch write delay of the snapshot databases, in seconds.
    pub fn snapshot_db_batch_delay(&self) -> u64 {
        self.snapshot_db_cfg.batch_delay_seconds
    }

    /// Number of open snapshot databases (testing/debugging).
    pub fn snapshots_count(&self) -> usize {
        self.state.read().registry.len()
    }

    /// Route subsequent main-storer writes to the given epoch, if the main
    /// storer supports it.
    pub fn set_epoch_for_put_operation(&self, epoch: u32) {
        let state = self.state.read();
        match state.main_storer.as_epoch_aware() {
            Some(storer) => storer.set_epoch_for_put_operation(epoch),
            None => error!(
                "invalid storer for set_epoch_for_put_operation, epoch: {}",
                epoch
            ),
        }
    }

    // ==================== Background Submission ====================

    /// Queue a snapshot of `root_hash`. With `new_db` set, the snapshot goes
    /// into a freshly created snapshot database, otherwise into the newest
    /// existing one.
    ///
    /// The optional `leaves_chan` receives the leaf pairs visited by the
    /// traversal; it is closed (dropped) exactly once in every outcome:
    /// completion, shutdown, empty-trie no-op or submission while closed.
    pub async fn take_snapshot(
        &self,
        root_hash: &[u8],
        new_db: bool,
        leaves_chan: Option<mpsc::Sender<TrieLeaf>>,
    ) {
        if self.is_closed() {
            drop(leaves_chan);
            return;
        }

        if root_hash == EMPTY_TRIE_HASH.as_slice() {
            trace!("should not snapshot an empty trie");
            drop(leaves_chan);
            return;
        }

        self.enter_pruning_buffering_mode();
        // The snapshot supersedes the checkpoint bookkeeping for this root
        self.checkpoint_hashes.remove_committed(root_hash);

        let entry = SnapshotQueueEntry {
            root_hash: root_hash.to_vec(),
            new_db,
            leaves_chan,
        };
        self.enqueue(entry, &self.snapshot_req).await;
    }

    /// Queue a checkpoint of `root_hash`. Same submission contract as
    /// [`Self::take_snapshot`], targeting the checkpoints storer.
    pub async fn set_checkpoint(&self, root_hash: &[u8], leaves_chan: Option<mpsc::Sender<TrieLeaf>>) {
        if self.is_closed() {
            drop(leaves_chan);
            return;
        }

        if root_hash == EMPTY_TRIE_HASH.as_slice() {
            trace!("should not set checkpoint for an empty trie");
            drop(leaves_chan);
            return;
        }

        self.enter_pruning_buffering_mode();

        let entry = SnapshotQueueEntry {
            root_hash: root_hash.to_vec(),
            new_db: false,
            leaves_chan,
        };
        self.enqueue(entry, &self.checkpoint_req).await;
    }

    async fn enqueue(&self, entry: SnapshotQueueEntry, queue: &mpsc::Sender<SnapshotQueueEntry>) {
        tokio::select! {
            // The closer is polled first so that once it has fired, a blocked
            // submission can no longer land in the queue behind the worker's
            // cleanup drain.
            biased;

            _ = self.closer.closed() => {
                self.exit_pruning_buffering_mode();
            }
            result = queue.send(entry) => {
                if result.is_err() {
                    // Worker gone; the failed send dropped the entry and with
                    // it the leaves channel
                    self.exit_pruning_buffering_mode();
                }
            }
        }
    }

    // ==================== Shutdown ====================

    /// Close all underlying storers. Idempotent: the second call is a no-op.
    ///
    /// Errors are collected while every remaining resource is still closed;
    /// the safe closer fires last so blocked producers and the worker's
    /// cleanup drain have a defined termination signal.
    pub fn close(&self) -> Result<(), TrieError> {
        let mut state = self.state.write();
        if state.closed {
            return Ok(());
        }

        self.cancel.close();
        state.closed = true;

        let mut errors: Vec<String> = Vec::new();

        if let Err(e) = state.db.close() {
            error!("closing legacy storer failed: {}", e);
            errors.push(e.to_string());
        }
        for e in state.registry.close_all() {
            errors.push(e.to_string());
        }
        if let Err(e) = state.main_storer.close() {
            error!("closing main storer failed: {}", e);
            errors.push(e.to_string());
        }
        if let Err(e) = state.checkpoints_storer.close() {
            error!("closing checkpoints storer failed: {}", e);
            errors.push(e.to_string());
        }

        self.closer.close();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(TrieError::CloseFailed(errors.join("; ")))
        }
    }

    fn is_closed(&self) -> bool {
        self.state.read().closed
    }

    // ==================== Worker Support ====================

    /// Complete a request: unblock pruning and close the leaves channel by
    /// dropping the entry.
    fn finish_operation(&self, entry: SnapshotQueueEntry, message: &str) {
        self.exit_pruning_buffering_mode();
        trace!("{}, rootHash: {:x?}", message, entry.root_hash);
    }

    /// Reconstruct the root node stored under `root_hash`, consulting the
    /// full lookup chain.
    fn root_node(&self, root_hash: &[u8]) -> Result<Arc<dyn SnapshotNode>, TrieError> {
        let encoded = self.get(root_hash)?;
        self.node_decoder.decode(&encoded)
    }

    /// The snapshot database a snapshot request writes into. Opens a new one
    /// when requested or when none exists yet, applying retention under the
    /// storage lock.
    fn snapshot_db_for_write(&self, new_db: bool) -> Result<Arc<dyn Persister>, TrieError> {
        let mut state = self.state.write();

        // A database opened after close would never be closed again
        if state.closed {
            return Err(TrieError::ContextClosing);
        }

        if !new_db {
            if let Some(db) = state.registry.newest() {
                return Ok(db);
            }
        }

        let db = state.registry.open_new()?;
        while state.registry.len() > self.max_snapshots as usize {
            state.registry.evict_oldest(self.keep_snapshots);
        }
        Ok(db)
    }

    fn checkpoints_storer(&self) -> Arc<dyn Persister> {
        self.state.read().checkpoints_storer.clone()
    }
}

impl TrieStorage for TrieStorageManager {
    fn get(&self, key: &[u8]) -> Result<Vec<u8>, TrieError> {
        TrieStorageManager::get(self, key)
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), TrieError> {
        TrieStorageManager::put(self, key, value)
    }
}

/// Read errors are swallowed so the lookup continues down the chain; an
/// empty value counts as a miss.
fn read_storer(storer: &Arc<dyn Persister>, key: &[u8]) -> Option<Vec<u8>> {
    match storer.get(key) {
        Ok(Some(value)) if !value.is_empty() => Some(value),
        _ => None,
    }
}

// ==================== Background Worker ====================

/// Lifecycle tag of the background worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkerState {
    Running,
    Draining,
    Stopped,
}

/// Single long-lived task draining the snapshot and checkpoint queues.
///
/// Holds only a weak back-reference to the manager: the manager owns every
/// resource, the worker looks things up through it while serving a request.
struct StorageWorker {
    manager: Weak<TrieStorageManager>,
    snapshot_req: mpsc::Receiver<SnapshotQueueEntry>,
    checkpoint_req: mpsc::Receiver<SnapshotQueueEntry>,
    cancel: SafeCloser,
    closer: SafeCloser,
}

impl StorageWorker {
    async fn run(self) {
        let StorageWorker {
            manager,
            mut snapshot_req,
            mut checkpoint_req,
            cancel,
            closer,
        } = self;

        let mut state = WorkerState::Running;
        loop {
            match state {
                WorkerState::Running => {
                    // tokio randomizes branch selection among ready sources,
                    // so sustained load on one queue cannot starve the other.
                    // A queue yielding None means the manager was dropped
                    // without close; the worker drains and exits.
                    tokio::select! {
                        entry = snapshot_req.recv() => match entry {
                            Some(entry) => {
                                Self::process_snapshot(&manager, &cancel, entry).await;
                            }
                            None => state = WorkerState::Draining,
                        },
                        entry = checkpoint_req.recv() => match entry {
                            Some(entry) => {
                                Self::process_checkpoint(&manager, &cancel, entry).await;
                            }
                            None => state = WorkerState::Draining,
                        },
                        _ = cancel.closed() => {
                            debug!("trie storage worker loop is closing...");
                            state = WorkerState::Draining;
                        }
                    }
                }
                WorkerState::Draining => {
                    // The closer fires only after the manager finished its
                    // close work, so no further entry can be queued once the
                    // drain below has run
                    if manager.strong_count() > 0 {
                        closer.closed().await;
                    }
                    Self::cleanup_queues(&manager, &mut snapshot_req, &mut checkpoint_req);
                    state = WorkerState::Stopped;
                }
                WorkerState::Stopped => {
                    debug!("trie storage worker stopped");
                    return;
                }
            }
        }
    }

    async fn process_snapshot(
        manager: &Weak<TrieStorageManager>,
        ctx: &SafeCloser,
        entry: SnapshotQueueEntry,
    ) {
        let Some(manager) = manager.upgrade() else {
            return;
        };

        trace!("trie snapshot started, rootHash: {:x?}", entry.root_hash);
        match Self::commit_snapshot(&manager, &entry, ctx).await {
            Ok(()) => {}
            Err(TrieError::ContextClosing) => {
                debug!("context closing while in commit snapshot operation");
            }
            Err(e) => error!("trie storage manager: commit snapshot: {}", e),
        }
        manager.finish_operation(entry, "trie snapshot finished");
    }

    async fn commit_snapshot(
        manager: &Arc<TrieStorageManager>,
        entry: &SnapshotQueueEntry,
        ctx: &SafeCloser,
    ) -> Result<(), TrieError> {
        let node = manager.root_node(&entry.root_hash)?;
        let snapshot_db = manager.snapshot_db_for_write(entry.new_db)?;
        let view = SnapshotStorageManager::new(manager.clone(), snapshot_db);

        node.commit_snapshot(&view, entry.leaves_chan.as_ref(), ctx)
            .await
    }

    async fn process_checkpoint(
        manager: &Weak<TrieStorageManager>,
        ctx: &SafeCloser,
        entry: SnapshotQueueEntry,
    ) {
        let Some(manager) = manager.upgrade() else {
            return;
        };

        trace!("trie checkpoint started, rootHash: {:x?}", entry.root_hash);
        match Self::commit_checkpoint(&manager, &entry, ctx).await {
            Ok(()) => {}
            Err(TrieError::ContextClosing) => {
                debug!("context closing while in commit checkpoint operation");
            }
            Err(e) => error!("trie storage manager: commit checkpoint: {}", e),
        }
        manager.finish_operation(entry, "trie checkpoint finished");
    }

    async fn commit_checkpoint(
        manager: &Arc<TrieStorageManager>,
        entry: &SnapshotQueueEntry,
        ctx: &SafeCloser,
    ) -> Result<(), TrieError> {
        let node = manager.root_node(&entry.root_hash)?;
        let checkpoints_storer = manager.checkpoints_storer();

        node.commit_checkpoint(
            &**manager,
            &*checkpoints_storer,
            &*manager.checkpoint_hashes,
            entry.leaves_chan.as_ref(),
            ctx,
        )
        .await
    }

    /// Drain both queues without blocking, completing every pending entry.
    /// Repeats until a full pass finds both queues empty.
    fn cleanup_queues(
        manager: &Weak<TrieStorageManager>,
        snapshot_req: &mut mpsc::Receiver<SnapshotQueueEntry>,
        checkpoint_req: &mut mpsc::Receiver<SnapshotQueueEntry>,
    ) {
        loop {
            let mut drained = false;
            while let Ok(entry) = snapshot_req.try_recv() {
                Self::finish_on_cleanup(manager, entry, "trie snapshot finished on cleanup");
                drained = true;
            }
            while let Ok(entry) = checkpoint_req.try_recv() {
                Self::finish_on_cleanup(manager, entry, "trie checkpoint finished on cleanup");
                drained = true;
            }
            if !drained {
                break;
            }
        }
        debug!("finished cleanup of the trie storage queues");
    }

    fn finish_on_cleanup(
        manager: &Weak<TrieStorageManager>,
        entry: SnapshotQueueEntry,
        message: &str,
    ) {
        if let Some(manager) = manager.upgrade() {
            manager.finish_operation(entry, message);
        }
        // Without a manager there is no counter left to decrement; dropping
        // the entry still closes its leaves channel
    }
}
