//! Point-in-time snapshots and crash recovery.
//!
//! A snapshot is a single self-contained file: 8-byte magic, format
//! version, then a crc32-framed postcard body holding the metadata,
//! every live edge, every live vertex (with its adjacency inline), the
//! three name tables, and the index/constraint definitions. Recovery
//! loads the newest readable snapshot with partitioned worker threads
//! in three strictly sequenced phases, then replays the WAL tail.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, Weak};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crc32fast::Hasher;
use quiver_common::{LabelId, PropertyId};
use quiver_transaction::Timestamp;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::StorageConfig;
use crate::error::{
    RecoveryFailure, SnapshotError, StorageError, StorageResult, TransactionError,
};
use crate::graph::{AdjacencyContainer, GraphStore, VersionedEdge, VersionedVertex};
use crate::model::{Edge, Neighbor, Vertex};
use crate::transaction::GraphTransaction;
use crate::wal::{NameKind, WalEntry, WalOp};

const SNAPSHOT_MAGIC: &[u8; 8] = b"QVRSNAP\0";
const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// How long an explicit snapshot waits for active transactions to
/// drain before giving up.
const QUIESCENCE_TIMEOUT_SECS: u64 = 30;
const QUIESCENCE_POLL_MS: u64 = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    /// Identity of this snapshot file.
    pub uuid: Uuid,
    /// Wall-clock creation time; also the file name.
    pub created_unix: u64,
    /// Latest commit timestamp contained in the snapshot. WAL records
    /// at or below this are already reflected.
    pub start_ts: u64,
    /// First LSN not contained in the snapshot; replay starts here.
    pub next_lsn: u64,
    pub vertex_count: u64,
    pub edge_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerializedVertex {
    pub data: Vertex,
    pub commit_ts: Timestamp,
    /// Inline adjacency makes the file self-contained: connectivity is
    /// rebuilt from the vertices alone.
    pub out_edges: Vec<Neighbor>,
    pub in_edges: Vec<Neighbor>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerializedEdge {
    pub data: Edge,
    pub commit_ts: Timestamp,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub metadata: SnapshotMetadata,
    pub edges: Vec<SerializedEdge>,
    pub vertices: Vec<SerializedVertex>,
    pub labels: Vec<String>,
    pub property_keys: Vec<String>,
    pub edge_types: Vec<String>,
    pub label_indexes: Vec<LabelId>,
    pub property_indexes: Vec<(LabelId, PropertyId)>,
    pub existence_constraints: Vec<(LabelId, PropertyId)>,
    pub unique_constraints: Vec<(LabelId, Vec<PropertyId>)>,
}

impl GraphSnapshot {
    /// Captures the committed state of a quiesced store.
    pub(crate) fn capture(graph: &GraphStore) -> Self {
        let mut edges = Vec::with_capacity(graph.edges.len());
        let mut live_edges = std::collections::BTreeSet::new();
        for entry in graph.edges.iter() {
            let current = entry.value().chain.current.read().unwrap();
            if current.data.is_tombstone() {
                continue;
            }
            live_edges.insert(current.data.eid());
            edges.push(SerializedEdge {
                data: current.data.clone(),
                commit_ts: current.commit_ts,
            });
        }

        let mut vertices = Vec::with_capacity(graph.vertices.len());
        for entry in graph.vertices.iter() {
            let current = entry.value().chain.current.read().unwrap();
            if current.data.is_tombstone() {
                continue;
            }
            let (mut out_edges, mut in_edges) = (Vec::new(), Vec::new());
            if let Some(adjacency) = graph.adjacency.get(entry.key()) {
                for neighbor in adjacency.outgoing().iter() {
                    if live_edges.contains(&neighbor.value().eid()) {
                        out_edges.push(*neighbor.value());
                    }
                }
                for neighbor in adjacency.incoming().iter() {
                    if live_edges.contains(&neighbor.value().eid()) {
                        in_edges.push(*neighbor.value());
                    }
                }
            }
            vertices.push(SerializedVertex {
                data: current.data.clone(),
                commit_ts: current.commit_ts,
                out_edges,
                in_edges,
            });
        }

        let metadata = SnapshotMetadata {
            uuid: Uuid::new_v4(),
            created_unix: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            start_ts: graph.txn_manager.latest_commit_ts.load(Ordering::SeqCst),
            next_lsn: graph.wal_manager.peek_next_lsn(),
            vertex_count: vertices.len() as u64,
            edge_count: edges.len() as u64,
        };

        let unique_constraints = graph
            .constraints
            .unique_constraints()
            .iter()
            .map(|c| (c.label, c.properties.clone()))
            .collect();

        Self {
            metadata,
            edges,
            vertices,
            labels: graph.labels.to_table(),
            property_keys: graph.property_keys.to_table(),
            edge_types: graph.edge_types.to_table(),
            label_indexes: graph.indexes.label_indexes(),
            property_indexes: graph.indexes.property_indexes(),
            existence_constraints: graph
                .constraints
                .existence_constraints()
                .iter()
                .map(|c| (c.label, c.property))
                .collect(),
            unique_constraints,
        }
    }

    pub fn write_to<P: AsRef<Path>>(&self, path: P) -> StorageResult<()> {
        let file =
            File::create(path).map_err(|e| StorageError::Snapshot(SnapshotError::Io(e)))?;
        let mut writer = BufWriter::new(file);

        let body = postcard::to_allocvec(self).map_err(|e| {
            StorageError::Snapshot(SnapshotError::SerializationFailed(e.to_string()))
        })?;
        let mut hasher = Hasher::new();
        hasher.update(&body);
        let checksum = hasher.finalize();

        let io = |e| StorageError::Snapshot(SnapshotError::Io(e));
        writer.write_all(SNAPSHOT_MAGIC).map_err(io)?;
        writer
            .write_all(&SNAPSHOT_FORMAT_VERSION.to_le_bytes())
            .map_err(io)?;
        writer
            .write_all(&(body.len() as u32).to_le_bytes())
            .map_err(io)?;
        writer.write_all(&checksum.to_le_bytes()).map_err(io)?;
        writer.write_all(&body).map_err(io)?;
        writer.flush().map_err(io)?;
        writer
            .get_ref()
            .sync_data()
            .map_err(|e| StorageError::Snapshot(SnapshotError::Io(e)))?;
        Ok(())
    }

    pub fn read_from<P: AsRef<Path>>(path: P) -> StorageResult<Self> {
        let file = File::open(path).map_err(|e| StorageError::Snapshot(SnapshotError::Io(e)))?;
        let mut reader = BufReader::new(file);
        let io = |e| StorageError::Snapshot(SnapshotError::Io(e));

        let mut magic = [0u8; 8];
        reader.read_exact(&mut magic).map_err(io)?;
        let mut version = [0u8; 4];
        reader.read_exact(&mut version).map_err(io)?;
        if &magic != SNAPSHOT_MAGIC || u32::from_le_bytes(version) != SNAPSHOT_FORMAT_VERSION {
            return Err(StorageError::Snapshot(SnapshotError::InvalidFormat));
        }

        let mut len = [0u8; 4];
        reader.read_exact(&mut len).map_err(io)?;
        let mut checksum = [0u8; 4];
        reader.read_exact(&mut checksum).map_err(io)?;

        let mut body = vec![0u8; u32::from_le_bytes(len) as usize];
        reader.read_exact(&mut body).map_err(io)?;

        let mut hasher = Hasher::new();
        hasher.update(&body);
        if hasher.finalize() != u32::from_le_bytes(checksum) {
            return Err(StorageError::Snapshot(SnapshotError::ChecksumMismatch));
        }

        postcard::from_bytes(&body).map_err(|e| {
            StorageError::Snapshot(SnapshotError::DeserializationFailed(e.to_string()))
        })
    }

    /// Rebuilds a store from this snapshot with partitioned worker
    /// threads: (1) edges, (2) vertices with labels and properties,
    /// (3) connectivity from the inline adjacency. Phases are strictly
    /// sequenced; within a phase the ranges are disjoint and the target
    /// containers concurrent, so workers never contend.
    pub fn restore(&self, config: StorageConfig) -> StorageResult<Arc<GraphStore>> {
        let graph = GraphStore::fresh(config)?;

        graph.wal_manager.set_next_lsn(self.metadata.next_lsn);
        graph
            .txn_manager
            .latest_commit_ts
            .store(self.metadata.start_ts, Ordering::SeqCst);
        graph
            .txn_manager
            .timestamps
            .update_if_greater(Timestamp::with_ts(self.metadata.start_ts))
            .map_err(TransactionError::Timestamp)?;

        graph.labels.load_table(self.labels.clone());
        graph.property_keys.load_table(self.property_keys.clone());
        graph.edge_types.load_table(self.edge_types.clone());

        for label in &self.label_indexes {
            graph.indexes.register_label(*label)?;
        }
        for (label, property) in &self.property_indexes {
            graph.indexes.register_property(*label, *property)?;
        }
        for (label, property) in &self.existence_constraints {
            graph.constraints.register_existence(*label, *property)?;
        }
        let unique_handles: Vec<_> = self
            .unique_constraints
            .iter()
            .map(|(label, properties)| graph.constraints.register_unique(*label, properties.clone()))
            .collect::<StorageResult<_>>()?;

        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let chunk_of = |len: usize| ((len + workers - 1) / workers).max(1);

        // Phase 1: partial edge load (payload and stamp only).
        run_phase(self.edges.chunks(chunk_of(self.edges.len().max(1))), |chunk| {
            for edge in chunk {
                graph.note_gid(edge.data.eid());
                graph.edges.insert(
                    edge.data.eid(),
                    VersionedEdge::restored(edge.data.clone(), edge.commit_ts),
                );
            }
            Ok(())
        })?;

        // Phase 2: partial vertex load (labels and properties, no
        // connectivity), plus index entries and unique-registry seeds.
        let constraints = &graph.constraints;
        run_phase(
            self.vertices.chunks(chunk_of(self.vertices.len().max(1))),
            |chunk| {
                for vertex in chunk {
                    graph.note_gid(vertex.data.vid());
                    graph.vertices.insert(
                        vertex.data.vid(),
                        VersionedVertex::restored(vertex.data.clone(), vertex.commit_ts),
                    );
                    graph.indexes.note_vertex(&vertex.data);
                    for constraint in &unique_handles {
                        if !constraints.seed_unique(constraint, &vertex.data) {
                            return Err(StorageError::Recovery(RecoveryFailure::new(format!(
                                "snapshot violates unique constraint on label {}",
                                constraint.label
                            ))));
                        }
                    }
                }
                Ok(())
            },
        )?;

        // Phase 3: connectivity. Each worker re-reads its vertices and
        // links their inline adjacency into the shared containers.
        run_phase(
            self.vertices.chunks(chunk_of(self.vertices.len().max(1))),
            |chunk| {
                for vertex in chunk {
                    let container = graph
                        .adjacency
                        .entry(vertex.data.vid())
                        .or_insert_with(AdjacencyContainer::new);
                    for neighbor in &vertex.out_edges {
                        container.outgoing().insert(*neighbor);
                    }
                    for neighbor in &vertex.in_edges {
                        container.incoming().insert(*neighbor);
                    }
                }
                Ok(())
            },
        )?;

        Ok(graph)
    }
}

/// Runs one load phase across scoped worker threads, propagating the
/// first failure.
fn run_phase<'a, T: Sync + 'a>(
    chunks: std::slice::Chunks<'a, T>,
    work: impl Fn(&'a [T]) -> StorageResult<()> + Sync,
) -> StorageResult<()> {
    std::thread::scope(|scope| {
        let work = &work;
        let mut handles = Vec::new();
        for chunk in chunks {
            handles.push(scope.spawn(move || work(chunk)));
        }
        for handle in handles {
            handle
                .join()
                .map_err(|_| StorageError::Recovery(RecoveryFailure::new("loader thread panicked")))??;
        }
        Ok(())
    })
}

/// One snapshot file known to the manager.
#[derive(Debug, Clone)]
pub struct SnapshotEntry {
    pub path: PathBuf,
    pub created_unix: u64,
    /// Lazily read from the file for snapshots inherited from earlier
    /// runs.
    start_ts: Option<u64>,
}

/// Creates snapshots, applies the retention policy, and coordinates
/// with transaction creation through the snapshot lock.
pub struct SnapshotManager {
    graph: Weak<GraphStore>,
    snapshots_dir: PathBuf,
    retention: u64,
    interval_sec: u64,
    entries: Mutex<Vec<SnapshotEntry>>,
    last_auto: Mutex<Instant>,
    /// Write-held while a snapshot is captured; transaction creation
    /// takes it shared.
    snapshot_lock: RwLock<()>,
}

impl SnapshotManager {
    pub(crate) fn with_entries(
        graph: Weak<GraphStore>,
        config: &StorageConfig,
        entries: Vec<SnapshotEntry>,
    ) -> Self {
        Self {
            graph,
            snapshots_dir: config.snapshots_dir(),
            retention: config.snapshot_retention_count,
            interval_sec: config.snapshot_interval_sec,
            entries: Mutex::new(entries),
            last_auto: Mutex::new(Instant::now()),
            snapshot_lock: RwLock::new(()),
        }
    }

    /// Lists the snapshot files already in `dir`, oldest first.
    pub(crate) fn scan_existing(dir: &Path) -> StorageResult<Vec<SnapshotEntry>> {
        let mut entries = Vec::new();
        if !dir.exists() {
            return Ok(entries);
        }
        let listing =
            fs::read_dir(dir).map_err(|e| StorageError::Snapshot(SnapshotError::Io(e)))?;
        for item in listing {
            let item = item.map_err(|e| StorageError::Snapshot(SnapshotError::Io(e)))?;
            let path = item.path();
            if path.extension().and_then(|e| e.to_str()) != Some("snap") {
                continue;
            }
            let Some(created_unix) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse().ok())
            else {
                continue;
            };
            entries.push(SnapshotEntry {
                path,
                created_unix,
                start_ts: None,
            });
        }
        entries.sort_by_key(|e| e.created_unix);
        Ok(entries)
    }

    pub(crate) fn read_guard(&self) -> RwLockReadGuard<'_, ()> {
        self.snapshot_lock.read().unwrap()
    }

    /// The files currently under retention, oldest first.
    pub fn snapshots(&self) -> Vec<PathBuf> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.path.clone())
            .collect()
    }

    /// Takes a snapshot now: quiesce, capture, seal the WAL segment,
    /// write the file, apply retention to snapshots and WAL segments.
    pub fn create_snapshot(&self) -> StorageResult<PathBuf> {
        let graph = self.graph.upgrade().ok_or_else(|| {
            StorageError::Transaction(TransactionError::InvalidState(
                "storage instance is gone".to_string(),
            ))
        })?;
        let _lock = self.snapshot_lock.write().unwrap();
        self.wait_for_quiescence(&graph, Duration::from_secs(QUIESCENCE_TIMEOUT_SECS))?;

        let mut snapshot = GraphSnapshot::capture(&graph);
        graph.wal_manager.seal_and_rotate()?;

        let mut path = self
            .snapshots_dir
            .join(format!("{}.snap", snapshot.metadata.created_unix));
        while path.exists() {
            snapshot.metadata.created_unix += 1;
            path = self
                .snapshots_dir
                .join(format!("{}.snap", snapshot.metadata.created_unix));
        }
        snapshot.write_to(&path)?;
        tracing::info!(
            path = %path.display(),
            vertices = snapshot.metadata.vertex_count,
            edges = snapshot.metadata.edge_count,
            "snapshot written"
        );

        let mut entries = self.entries.lock().unwrap();
        entries.push(SnapshotEntry {
            path: path.clone(),
            created_unix: snapshot.metadata.created_unix,
            start_ts: Some(snapshot.metadata.start_ts),
        });
        entries.sort_by_key(|e| e.created_unix);
        while entries.len() > self.retention as usize {
            let victim = entries.remove(0);
            if let Err(e) = fs::remove_file(&victim.path) {
                tracing::warn!(path = %victim.path.display(), error = %e, "failed to prune snapshot");
            } else {
                tracing::info!(path = %victim.path.display(), "pruned snapshot");
            }
        }
        // WAL segments entirely below the oldest retained snapshot are
        // no longer needed for recovery.
        if let Some(oldest) = entries.first_mut() {
            let boundary = match oldest.start_ts {
                Some(ts) => ts,
                None => {
                    let ts = GraphSnapshot::read_from(&oldest.path)?.metadata.start_ts;
                    oldest.start_ts = Some(ts);
                    ts
                }
            };
            graph.wal_manager.prune_older_than(boundary)?;
        }
        drop(entries);

        *self.last_auto.lock().unwrap() = Instant::now();
        Ok(path)
    }

    /// Automatic snapshotting on the commit path. Skipped while other
    /// transactions are active; the next commit will try again.
    pub(crate) fn check_auto(&self) -> StorageResult<Option<PathBuf>> {
        if self.interval_sec == 0 {
            return Ok(None);
        }
        if self.last_auto.lock().unwrap().elapsed().as_secs() < self.interval_sec {
            return Ok(None);
        }
        let Some(graph) = self.graph.upgrade() else {
            return Ok(None);
        };
        if graph.txn_manager.has_active() {
            return Ok(None);
        }
        self.create_snapshot().map(Some)
    }

    fn wait_for_quiescence(&self, graph: &GraphStore, timeout: Duration) -> StorageResult<()> {
        let started = Instant::now();
        while graph.txn_manager.has_active() {
            if started.elapsed() > timeout {
                return Err(StorageError::Snapshot(SnapshotError::Timeout));
            }
            std::thread::sleep(Duration::from_millis(QUIESCENCE_POLL_MS));
        }
        Ok(())
    }
}

impl GraphStore {
    /// Opens a store with full recovery: load the newest readable
    /// snapshot, then replay the WAL tail on top of it.
    pub fn open(config: StorageConfig) -> StorageResult<Arc<Self>> {
        let snapshots_dir = config.snapshots_dir();
        fs::create_dir_all(&snapshots_dir)
            .map_err(|e| StorageError::Snapshot(SnapshotError::Io(e)))?;

        let known = SnapshotManager::scan_existing(&snapshots_dir)?;
        let mut graph = None;
        for entry in known.iter().rev() {
            match GraphSnapshot::read_from(&entry.path) {
                Ok(snapshot) => {
                    tracing::info!(
                        path = %entry.path.display(),
                        vertices = snapshot.metadata.vertex_count,
                        edges = snapshot.metadata.edge_count,
                        "restoring from snapshot"
                    );
                    graph = Some(snapshot.restore(config.clone())?);
                    break;
                }
                Err(e) => {
                    tracing::warn!(path = %entry.path.display(), error = %e, "skipping unreadable snapshot");
                }
            }
        }
        let graph = match graph {
            Some(graph) => graph,
            None => GraphStore::fresh(config)?,
        };

        let min_lsn = graph.wal_manager.peek_next_lsn();
        let tail: Vec<WalEntry> = graph
            .wal_manager
            .read_all()?
            .into_iter()
            .filter(|entry| entry.lsn >= min_lsn)
            .collect();
        if !tail.is_empty() {
            let replayed = tail.len();
            graph.apply_wal_entries(tail)?;
            tracing::info!(records = replayed, "wal tail replayed");
        }
        Ok(graph)
    }

    /// Replays WAL records in LSN order through the normal transaction
    /// machinery. Transactions with no commit or abort record died with
    /// the crash and are rolled back at the end.
    pub fn apply_wal_entries(self: &Arc<Self>, entries: Vec<WalEntry>) -> StorageResult<()> {
        use std::collections::HashMap;
        let mut open_txns: HashMap<u64, Arc<GraphTransaction>> = HashMap::new();

        let fail = |entry: &WalEntry, e: StorageError| {
            StorageError::Recovery(RecoveryFailure::new(format!(
                "replay of lsn {} failed: {}",
                entry.lsn, e
            )))
        };

        for entry in entries {
            self.wal_manager.set_next_lsn(entry.lsn + 1);
            let txn = open_txns.get(&entry.txn_id.raw()).cloned();
            match entry.op.clone() {
                WalOp::TxnBegin {
                    start_ts,
                    isolation,
                } => {
                    let txn = self
                        .txn_manager
                        .begin_transaction_at(Some(entry.txn_id), Some(start_ts), isolation, true)
                        .map_err(|e| fail(&entry, e))?;
                    open_txns.insert(entry.txn_id.raw(), txn);
                }
                WalOp::TxnCommit { commit_ts } => {
                    if let Some(txn) = open_txns.remove(&entry.txn_id.raw()) {
                        txn.commit_at(Some(commit_ts), true)
                            .map_err(|e| fail(&entry, e))?;
                    }
                }
                WalOp::TxnAbort => {
                    if let Some(txn) = open_txns.remove(&entry.txn_id.raw()) {
                        txn.abort_at(true).map_err(|e| fail(&entry, e))?;
                    }
                }
                WalOp::CreateVertex(vertex) => {
                    if let Some(txn) = &txn {
                        self.create_vertex(txn, vertex).map_err(|e| fail(&entry, e))?;
                    }
                }
                WalOp::DeleteVertex(vid) => {
                    if let Some(txn) = &txn {
                        // Adjacent edges were logged as their own
                        // deletes ahead of this record.
                        self.delete_vertex(txn, vid, false)
                            .map_err(|e| fail(&entry, e))?;
                    }
                }
                WalOp::CreateEdge(edge) => {
                    if let Some(txn) = &txn {
                        self.create_edge(txn, edge).map_err(|e| fail(&entry, e))?;
                    }
                }
                WalOp::DeleteEdge(eid) => {
                    if let Some(txn) = &txn {
                        self.delete_edge(txn, eid).map_err(|e| fail(&entry, e))?;
                    }
                }
                WalOp::SetVertexProperty(vid, key, value) => {
                    if let Some(txn) = &txn {
                        self.set_vertex_property(txn, vid, key, value)
                            .map_err(|e| fail(&entry, e))?;
                    }
                }
                WalOp::SetEdgeProperty(eid, key, value) => {
                    if let Some(txn) = &txn {
                        self.set_edge_property(txn, eid, key, value)
                            .map_err(|e| fail(&entry, e))?;
                    }
                }
                WalOp::AddLabel(vid, label) => {
                    if let Some(txn) = &txn {
                        self.add_label(txn, vid, label).map_err(|e| fail(&entry, e))?;
                    }
                }
                WalOp::RemoveLabel(vid, label) => {
                    if let Some(txn) = &txn {
                        self.remove_label(txn, vid, label)
                            .map_err(|e| fail(&entry, e))?;
                    }
                }
                WalOp::InternName { kind, id, name } => match kind {
                    NameKind::Label => self.labels.restore(id, name),
                    NameKind::Property => self.property_keys.restore(id, name),
                    NameKind::EdgeType => self.edge_types.restore(id, name),
                },
                WalOp::CreateLabelIndex(label) => {
                    self.create_label_index_at(label, false)
                        .map_err(|e| fail(&entry, e))?;
                }
                WalOp::DropLabelIndex(label) => {
                    self.indexes
                        .unregister_label(label)
                        .map_err(|e| fail(&entry, e))?;
                }
                WalOp::CreateLabelPropertyIndex(label, property) => {
                    self.create_label_property_index_at(label, property, false)
                        .map_err(|e| fail(&entry, e))?;
                }
                WalOp::DropLabelPropertyIndex(label, property) => {
                    self.indexes
                        .unregister_property(label, property)
                        .map_err(|e| fail(&entry, e))?;
                }
                WalOp::CreateExistenceConstraint(label, property) => {
                    self.create_existence_constraint_at(label, property, false)
                        .map_err(|e| fail(&entry, e))?;
                }
                WalOp::DropExistenceConstraint(label, property) => {
                    self.constraints
                        .unregister_existence(label, property)
                        .map_err(|e| fail(&entry, e))?;
                }
                WalOp::CreateUniqueConstraint(label, properties) => {
                    self.create_unique_constraint_at(label, properties, false)
                        .map_err(|e| fail(&entry, e))?;
                }
                WalOp::DropUniqueConstraint(label, properties) => {
                    self.constraints
                        .unregister_unique(label, &properties)
                        .map_err(|e| fail(&entry, e))?;
                }
            }
        }

        for (_, txn) in open_txns {
            txn.abort_at(true)?;
        }
        Ok(())
    }

    /// Takes an explicit snapshot now.
    pub fn create_snapshot(&self) -> StorageResult<PathBuf> {
        self.snapshot_manager.create_snapshot()
    }

    /// Snapshot files currently under retention, oldest first.
    pub fn snapshots(&self) -> Vec<PathBuf> {
        self.snapshot_manager.snapshots()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Seek;

    use quiver_common::PropertyValue;
    use quiver_transaction::IsolationLevel;

    use super::*;
    use crate::graph::tests::{mock_config, mock_store};
    use crate::model::PropertyRecord;

    fn label(id: u32) -> LabelId {
        LabelId::new(id).unwrap()
    }

    const NAME: PropertyId = 1;

    fn seeded_store(tag: &str) -> (Arc<GraphStore>, temp_dir::TempDir) {
        let (store, scratch) = mock_store(tag);
        let txn = store.begin_transaction(IsolationLevel::Snapshot).unwrap();
        for (vid, name) in [(1, "alice"), (2, "bob")] {
            let mut props = PropertyRecord::new();
            props.set(NAME, PropertyValue::String(name.into()));
            store
                .create_vertex(&txn, Vertex::new(vid, vec![label(1)], props))
                .unwrap();
        }
        store
            .create_edge(
                &txn,
                Edge::new(3, 1, 2, label(7), PropertyRecord::new()),
            )
            .unwrap();
        txn.commit().unwrap();
        (store, scratch)
    }

    #[test]
    fn capture_skips_tombstones_and_keeps_adjacency() {
        let (store, _scratch) = seeded_store("capture");
        let txn = store.begin_transaction(IsolationLevel::Snapshot).unwrap();
        let mut props = PropertyRecord::new();
        props.set(NAME, PropertyValue::String("carol".into()));
        store
            .create_vertex(&txn, Vertex::new(4, vec![label(1)], props))
            .unwrap();
        store.delete_vertex(&txn, 4, true).unwrap();
        txn.commit().unwrap();

        let snapshot = GraphSnapshot::capture(&store);
        assert_eq!(snapshot.metadata.vertex_count, 2);
        assert_eq!(snapshot.metadata.edge_count, 1);

        let alice = snapshot.vertices.iter().find(|v| v.data.vid() == 1).unwrap();
        assert_eq!(alice.out_edges.len(), 1);
        assert_eq!(alice.out_edges[0].eid(), 3);
        let bob = snapshot.vertices.iter().find(|v| v.data.vid() == 2).unwrap();
        assert_eq!(bob.in_edges.len(), 1);
    }

    #[test]
    fn snapshot_round_trips_through_a_file() {
        let (store, _scratch) = seeded_store("roundtrip");
        let path = store.create_snapshot().unwrap();

        let loaded = GraphSnapshot::read_from(&path).unwrap();
        assert_eq!(loaded.metadata.vertex_count, 2);
        assert_eq!(loaded.metadata.edge_count, 1);

        let (restore_config, _restore_scratch) = mock_config("roundtrip_restore");
        let restored = loaded.restore(restore_config).unwrap();

        let txn = restored
            .begin_transaction(IsolationLevel::Snapshot)
            .unwrap();
        let alice = restored.get_vertex(&txn, 1).unwrap();
        assert_eq!(
            alice.property(NAME),
            Some(&PropertyValue::String("alice".into()))
        );
        let edge = restored.get_edge(&txn, 3).unwrap();
        assert_eq!(edge.src_id(), 1);
        assert_eq!(edge.dst_id(), 2);
        txn.abort().unwrap();
    }

    #[test]
    fn corrupt_snapshot_is_rejected() {
        let (store, _scratch) = seeded_store("corrupt");
        let path = store.create_snapshot().unwrap();

        {
            let mut file = fs::OpenOptions::new().write(true).open(&path).unwrap();
            // Past magic, version, length, and checksum.
            file.seek(std::io::SeekFrom::Start(20)).unwrap();
            file.write_all(&[0xAA, 0xBB, 0xCC, 0xDD]).unwrap();
        }

        match GraphSnapshot::read_from(&path) {
            Err(StorageError::Snapshot(SnapshotError::ChecksumMismatch)) => {}
            other => panic!("expected checksum mismatch, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn retention_keeps_the_newest_snapshots() {
        let (store, _scratch) = seeded_store("retention");
        for _ in 0..5 {
            store.create_snapshot().unwrap();
        }
        let kept = store.snapshot_manager.snapshots();
        assert_eq!(kept.len(), 3);
        for path in kept {
            assert!(path.exists());
        }
    }
}
