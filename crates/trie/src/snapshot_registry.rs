//! Snapshot database registry
//!
//! Snapshot databases live under one configured directory, each in a child
//! directory named by its decimal id: `<file_path>/0`, `<file_path>/1`, ...
//! The registry discovers them on startup, assigns monotonically increasing
//! ids to new ones, and evicts the oldest once the retention limit is hit.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, error};

use crate::config::SnapshotDbConfig;
use crate::errors::TrieError;
use storage::{new_db, DbArgs, Persister, StoreError};

/// One open snapshot database
struct SnapshotDbHandle {
    id: u32,
    path: PathBuf,
    db: Arc<dyn Persister>,
}

/// Ordered collection of snapshot databases, oldest first
pub struct SnapshotRegistry {
    cfg: SnapshotDbConfig,
    snapshots: Vec<SnapshotDbHandle>,
    next_id: u32,
}

impl SnapshotRegistry {
    /// Discover existing snapshot databases under `cfg.file_path`.
    ///
    /// A missing directory yields an empty registry with `next_id = 0`.
    /// Plain-file children are skipped. A child directory whose name does not
    /// parse as a non-negative integer is reported as an error, but every
    /// valid entry is still discovered and kept: a stray entry must never
    /// reset the id sequence below ids that exist on disk. The id sequence
    /// continues above every parsed id, including ones whose database failed
    /// to open.
    pub fn discover(cfg: &SnapshotDbConfig) -> (Self, Option<TrieError>) {
        let mut registry = Self::empty(cfg);

        if !cfg.file_path.exists() {
            return (registry, None);
        }

        let entries = match fs::read_dir(&cfg.file_path) {
            Ok(entries) => entries,
            Err(e) => {
                return (registry, Some(TrieError::Storage(StoreError::Io(e.to_string()))));
            }
        };

        let mut discovered: Vec<(u32, PathBuf)> = Vec::new();
        let mut failure: Option<TrieError> = None;
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    failure = Some(TrieError::Storage(StoreError::Io(e.to_string())));
                    break;
                }
            };
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }

            let name = entry.file_name().to_string_lossy().into_owned();
            match name.parse::<u32>() {
                Ok(id) => discovered.push((id, path)),
                Err(_) => {
                    if failure.is_none() {
                        failure = Some(TrieError::InvalidConfig(format!(
                            "unexpected entry in snapshot directory: {}",
                            name
                        )));
                    }
                }
            }
        }

        discovered.sort_by_key(|(id, _)| *id);
        if let Some((max_id, _)) = discovered.last() {
            registry.next_id = max_id + 1;
        }

        for (id, path) in discovered {
            match open_snapshot_db(cfg, &path) {
                Ok(db) => {
                    debug!("restored snapshot db, id: {}", id);
                    registry.snapshots.push(SnapshotDbHandle { id, path, db });
                }
                Err(e) => {
                    error!("opening discovered snapshot db {} failed: {}", id, e);
                    if failure.is_none() {
                        failure = Some(e);
                    }
                }
            }
        }

        (registry, failure)
    }

    /// An empty registry starting from id 0.
    pub fn empty(cfg: &SnapshotDbConfig) -> Self {
        Self {
            cfg: cfg.clone(),
            snapshots: Vec::new(),
            next_id: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// The id the next opened snapshot database will get.
    pub fn next_id(&self) -> u32 {
        self.next_id
    }

    /// The most recently opened snapshot database.
    pub fn newest(&self) -> Option<Arc<dyn Persister>> {
        self.snapshots.last().map(|handle| handle.db.clone())
    }

    /// Snapshot databases in lookup order: newest first.
    pub fn iter_newest_first(&self) -> impl Iterator<Item = &Arc<dyn Persister>> {
        self.snapshots.iter().rev().map(|handle| &handle.db)
    }

    /// Create `<file_path>/<next_id>`, open a persister there and append it.
    pub fn open_new(&mut self) -> Result<Arc<dyn Persister>, TrieError> {
        let id = self.next_id;
        let path = self.cfg.file_path.join(id.to_string());
        fs::create_dir_all(&path)
            .map_err(|e| TrieError::Storage(StoreError::Io(e.to_string())))?;

        let db = open_snapshot_db(&self.cfg, &path)?;
        debug!("opened new snapshot db, id: {}", id);

        self.snapshots.push(SnapshotDbHandle {
            id,
            path,
            db: db.clone(),
        });
        self.next_id = id + 1;
        Ok(db)
    }

    /// Close the oldest snapshot database and drop it from the list. When
    /// `keep` is false its directory is destroyed as well.
    pub fn evict_oldest(&mut self, keep: bool) {
        if self.snapshots.is_empty() {
            return;
        }
        let handle = self.snapshots.remove(0);

        if let Err(e) = handle.db.close() {
            error!("closing evicted snapshot db {} failed: {}", handle.id, e);
        }
        if !keep {
            if let Err(e) = fs::remove_dir_all(&handle.path) {
                error!(
                    "removing evicted snapshot db dir {} failed: {}",
                    handle.path.display(),
                    e
                );
            }
        }
        debug!("evicted snapshot db, id: {}, keep: {}", handle.id, keep);
    }

    /// Close every snapshot database, collecting the failures.
    pub fn close_all(&mut self) -> Vec<StoreError> {
        let mut errors = Vec::new();
        for handle in self.snapshots.drain(..) {
            if let Err(e) = handle.db.close() {
                error!("closing snapshot db {} failed: {}", handle.id, e);
                errors.push(e);
            }
        }
        errors
    }
}

fn open_snapshot_db(
    cfg: &SnapshotDbConfig,
    path: &std::path::Path,
) -> Result<Arc<dyn Persister>, TrieError> {
    let db = new_db(DbArgs {
        db_type: cfg.db_type,
        path: path.to_path_buf(),
        batch_delay_seconds: cfg.batch_delay_seconds,
        max_batch_size: cfg.max_batch_size,
        max_open_files: cfg.max_open_files,
    })?;
    Ok(db)
}
