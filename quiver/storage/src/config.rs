//! Engine configuration.

use std::path::{Path, PathBuf};

use quiver_transaction::IsolationLevel;

/// How the engine stores and versions data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageMode {
    /// MVCC with WAL and snapshots.
    #[default]
    InMemoryTransactional,
    /// No version chains, no conflict checks, no WAL. Intended for bulk
    /// analytical loads where the caller serializes writers.
    InMemoryAnalytical,
    /// Reserved for the disk-backed engine.
    OnDiskTransactional,
}

/// Top-level configuration for a storage instance.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Root directory; snapshots live in `{data_dir}/snapshots`, WAL
    /// segments in `{data_dir}/wal`.
    pub data_dir: PathBuf,
    pub storage_mode: StorageMode,
    /// Default isolation level for transactions opened without an
    /// explicit one.
    pub isolation_level: IsolationLevel,
    /// When false, edges carry no property map and edge property writes
    /// are rejected.
    pub properties_on_edges: bool,
    /// Automatic snapshot period, checked on the commit path. 0
    /// disables automatic snapshots.
    pub snapshot_interval_sec: u64,
    /// How many snapshots to keep; at least 1.
    pub snapshot_retention_count: u64,
    pub wal_enabled: bool,
    /// Garbage collection period, checked when transactions finish. 0
    /// means threshold-only triggering.
    pub gc_interval_sec: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("quiver-data"),
            storage_mode: StorageMode::default(),
            isolation_level: IsolationLevel::default(),
            properties_on_edges: true,
            snapshot_interval_sec: 300,
            snapshot_retention_count: 3,
            wal_enabled: true,
            gc_interval_sec: 60,
        }
    }
}

impl StorageConfig {
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    pub fn snapshots_dir(&self) -> PathBuf {
        self.data_dir.join("snapshots")
    }

    pub fn wal_dir(&self) -> PathBuf {
        self.data_dir.join("wal")
    }

    /// WAL is only meaningful for the transactional in-memory mode.
    pub fn wal_active(&self) -> bool {
        self.wal_enabled && self.storage_mode == StorageMode::InMemoryTransactional
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}
