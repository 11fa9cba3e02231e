//! Configuration for the trie storage manager
//!
//! Supports YAML configuration files with section-based organization.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use storage::DbType;
use thiserror::Error;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Snapshot database configuration
    #[serde(default)]
    pub snapshot_db: SnapshotDbConfig,
    /// Storage manager configuration
    #[serde(default)]
    pub trie_storage: TrieStorageConfig,
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
        Self::from_yaml(&content)
    }

    /// Load configuration from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(yaml).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

/// Configuration of the snapshot databases opened by the registry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotDbConfig {
    /// Persister backend for snapshot databases
    #[serde(default = "default_db_type")]
    pub db_type: DbType,
    /// Directory holding one numbered subdirectory per snapshot
    pub file_path: PathBuf,
    /// Seconds between write-batch flushes
    #[serde(default = "default_batch_delay_seconds")]
    pub batch_delay_seconds: u64,
    /// Pending writes that force an immediate flush
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    /// Max open files hint for the storage engine
    #[serde(default = "default_max_open_files")]
    pub max_open_files: i32,
}

impl Default for SnapshotDbConfig {
    fn default() -> Self {
        Self {
            db_type: default_db_type(),
            file_path: PathBuf::from("./data/trie/snapshots"),
            batch_delay_seconds: default_batch_delay_seconds(),
            max_batch_size: default_max_batch_size(),
            max_open_files: default_max_open_files(),
        }
    }
}

impl SnapshotDbConfig {
    /// Get the batch delay as a Duration
    pub fn batch_delay(&self) -> Duration {
        Duration::from_secs(self.batch_delay_seconds)
    }
}

/// Configuration of the storage manager itself
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrieStorageConfig {
    /// Capacity of each of the snapshot and checkpoint request queues
    #[serde(default = "default_snapshots_buffer_len")]
    pub snapshots_buffer_len: usize,
    /// Snapshot databases retained before the oldest is evicted
    #[serde(default = "default_max_snapshots")]
    pub max_snapshots: u32,
    /// Keep evicted snapshot directories on disk instead of destroying them
    #[serde(default)]
    pub keep_snapshots: bool,
}

impl Default for TrieStorageConfig {
    fn default() -> Self {
        Self {
            snapshots_buffer_len: default_snapshots_buffer_len(),
            max_snapshots: default_max_snapshots(),
            keep_snapshots: false,
        }
    }
}

// Default value functions

fn default_db_type() -> DbType {
    DbType::RocksDb
}

fn default_batch_delay_seconds() -> u64 {
    2
}

fn default_max_batch_size() -> usize {
    45000
}

fn default_max_open_files() -> i32 {
    10
}

fn default_snapshots_buffer_len() -> usize {
    10
}

fn default_max_snapshots() -> u32 {
    2
}

/// Configuration error
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),
    #[error("Parse error: {0}")]
    ParseError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.snapshot_db.db_type, DbType::RocksDb);
        assert_eq!(config.snapshot_db.batch_delay_seconds, 2);
        assert_eq!(config.snapshot_db.max_batch_size, 45000);
        assert_eq!(config.trie_storage.max_snapshots, 2);
        assert!(!config.trie_storage.keep_snapshots);
    }

    #[test]
    fn test_from_yaml() {
        let yaml = r#"
snapshot_db:
  db_type: memory
  file_path: /tmp/trie/snapshots
  batch_delay_seconds: 1
trie_storage:
  snapshots_buffer_len: 5
  max_snapshots: 3
  keep_snapshots: true
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.snapshot_db.db_type, DbType::Memory);
        assert_eq!(config.snapshot_db.batch_delay_seconds, 1);
        // Unset fields fall back to defaults
        assert_eq!(config.snapshot_db.max_batch_size, 45000);
        assert_eq!(config.trie_storage.snapshots_buffer_len, 5);
        assert_eq!(config.trie_storage.max_snapshots, 3);
        assert!(config.trie_storage.keep_snapshots);
    }
}
