//! The versioned object store.
//!
//! Vertices and edges live in lock-free concurrent skip-lists; each
//! object carries a version chain: the current materialized version
//! plus a weak pointer to the newest undo entry. Writers take the
//! object's version lock for the O(1) critical section that installs a
//! delta and stamps the version; readers snapshot the current version
//! and walk the undo chain to their snapshot boundary without blocking
//! anyone.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};

use crossbeam_skiplist::{SkipMap, SkipSet};
use dashmap::DashMap;
use quiver_common::{
    EdgeId, EdgeTypeId, Gid, LabelId, NameIdMapper, PropertyId, PropertyValue, VertexId,
};
use quiver_transaction::{IsolationLevel, Timestamp, UndoEntry as GenericUndoEntry};

use crate::config::{StorageConfig, StorageMode};
use crate::constraint::ConstraintSet;
use crate::delta::{apply_edge_delta, apply_vertex_delta, DeltaOp};
use crate::error::{
    ConstraintViolation, EdgeNotFoundError, StorageError, StorageResult, TransactionError,
    VertexNotFoundError,
};
use crate::index::IndexSet;
use crate::model::{Edge, Neighbor, PropertyRecord, Vertex};
use crate::snapshot::SnapshotManager;
use crate::transaction::{GraphTransaction, UndoPtr};
use crate::txn_manager::TxnManager;
use crate::wal::{NameKind, WalManager, WalOp};

/// Which state of the transaction a read observes.
///
/// `New` includes the transaction's own uncommitted writes; `Old`
/// reconstructs committed state as of the start timestamp, with own
/// writes rolled back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum View {
    Old,
    #[default]
    New,
}

/// The current materialized version of an object plus its stamp: a
/// commit timestamp, or the id of the transaction that has it in
/// progress.
#[derive(Debug)]
pub(crate) struct CurrentVersion<D> {
    pub(crate) data: D,
    pub(crate) commit_ts: Timestamp,
}

/// Version history of one object: the latest version under its lock,
/// and the head of the undo chain.
#[derive(Debug)]
pub(crate) struct VersionChain<D> {
    pub(crate) current: RwLock<CurrentVersion<D>>,
    /// Weak head of the undo chain; always reconstructs the latest
    /// committed version when the current one is in progress.
    pub(crate) undo_ptr: RwLock<UndoPtr>,
}

impl<D> VersionChain<D> {
    fn new(data: D, commit_ts: Timestamp) -> Self {
        Self {
            current: RwLock::new(CurrentVersion { data, commit_ts }),
            undo_ptr: RwLock::new(Weak::new()),
        }
    }
}

/// Walks an undo chain applying every delta newer than `boundary`,
/// stopping once a committed state at or below the boundary has been
/// reconstructed. Restore stamps in the in-progress domain never
/// settle, so a transaction's intermediate states are walked through.
pub(crate) fn walk_deltas<F: FnMut(&GenericUndoEntry<DeltaOp>)>(
    undo_ptr: UndoPtr,
    boundary: Timestamp,
    mut callback: F,
) {
    for entry in GenericUndoEntry::chain_from(&undo_ptr) {
        callback(&entry);
        if entry.settles_below(boundary) {
            break;
        }
    }
}

#[derive(Debug)]
pub(crate) struct VersionedVertex {
    pub(crate) chain: VersionChain<Vertex>,
}

impl VersionedVertex {
    /// An object slot holding only a tombstone, ready for a create to
    /// un-delete it.
    fn placeholder(vid: VertexId, write_ts: Timestamp) -> Self {
        let data = Vertex {
            vid,
            labels: Vec::new(),
            properties: PropertyRecord::new(),
            is_tombstone: true,
        };
        Self {
            chain: VersionChain::new(data, write_ts),
        }
    }

    /// A fully materialized version restored from a snapshot.
    pub(crate) fn restored(data: Vertex, commit_ts: Timestamp) -> Self {
        Self {
            chain: VersionChain::new(data, commit_ts),
        }
    }

    /// The version of this vertex the transaction is entitled to see,
    /// or a not-visible error if that version is a tombstone.
    pub(crate) fn get_visible(&self, txn: &GraphTransaction, view: View) -> StorageResult<Vertex> {
        let current = self.chain.current.read().unwrap();
        let commit_ts = current.commit_ts;
        let mut vertex = current.data.clone();

        if txn.isolation_level().reads_uncommitted() {
            drop(current);
            return finish_vertex_read(vertex);
        }

        let boundary = txn.read_boundary();
        let own = commit_ts.is_txn_id() && commit_ts == txn.txn_id();
        let settled = commit_ts.is_commit_ts() && commit_ts <= boundary;
        if (own && view == View::New) || settled {
            drop(current);
            return finish_vertex_read(vertex);
        }

        let undo_ptr = self.chain.undo_ptr.read().unwrap().clone();
        drop(current);
        walk_deltas(undo_ptr, boundary, |entry| {
            apply_vertex_delta(&mut vertex, entry.delta())
        });
        finish_vertex_read(vertex)
    }

    pub(crate) fn is_visible(&self, txn: &GraphTransaction, view: View) -> bool {
        self.get_visible(txn, view).is_ok()
    }
}

fn finish_vertex_read(vertex: Vertex) -> StorageResult<Vertex> {
    if vertex.is_tombstone() {
        return Err(StorageError::VertexNotFound(VertexNotFoundError::NotVisible(
            vertex.vid(),
        )));
    }
    Ok(vertex)
}

#[derive(Debug)]
pub(crate) struct VersionedEdge {
    pub(crate) chain: VersionChain<Edge>,
}

impl VersionedEdge {
    fn placeholder(edge: Edge, write_ts: Timestamp) -> Self {
        Self {
            chain: VersionChain::new(Edge::tombstone(edge), write_ts),
        }
    }

    pub(crate) fn restored(data: Edge, commit_ts: Timestamp) -> Self {
        Self {
            chain: VersionChain::new(data, commit_ts),
        }
    }

    pub(crate) fn get_visible(&self, txn: &GraphTransaction, view: View) -> StorageResult<Edge> {
        let current = self.chain.current.read().unwrap();
        let commit_ts = current.commit_ts;
        let mut edge = current.data.clone();

        if txn.isolation_level().reads_uncommitted() {
            drop(current);
            return finish_edge_read(edge);
        }

        let boundary = txn.read_boundary();
        let own = commit_ts.is_txn_id() && commit_ts == txn.txn_id();
        let settled = commit_ts.is_commit_ts() && commit_ts <= boundary;
        if (own && view == View::New) || settled {
            drop(current);
            return finish_edge_read(edge);
        }

        let undo_ptr = self.chain.undo_ptr.read().unwrap().clone();
        drop(current);
        walk_deltas(undo_ptr, boundary, |entry| {
            apply_edge_delta(&mut edge, entry.delta())
        });
        finish_edge_read(edge)
    }

    /// Edge visibility also requires both endpoints to be visible: a
    /// detach-deleted vertex takes its edges with it in the same
    /// transaction, and this check keeps adjacency scans consistent in
    /// the window where only one side has been processed.
    pub(crate) fn is_visible(
        &self,
        graph: &GraphStore,
        txn: &GraphTransaction,
        view: View,
    ) -> bool {
        let (src, dst) = {
            let current = self.chain.current.read().unwrap();
            (current.data.src_id(), current.data.dst_id())
        };
        let endpoint_visible = |vid: VertexId| {
            graph
                .vertices
                .get(&vid)
                .map(|entry| entry.value().is_visible(txn, view))
                .unwrap_or(false)
        };
        endpoint_visible(src) && endpoint_visible(dst) && self.get_visible(txn, view).is_ok()
    }
}

fn finish_edge_read(edge: Edge) -> StorageResult<Edge> {
    if edge.is_tombstone() {
        return Err(StorageError::EdgeNotFound(EdgeNotFoundError::NotVisible(
            edge.eid(),
        )));
    }
    Ok(edge)
}

/// The last committed version of a vertex, with any in-progress
/// transaction's writes rolled back. `None` when the committed state is
/// a tombstone or the vertex never committed.
pub(crate) fn committed_vertex(versioned: &VersionedVertex) -> Option<Vertex> {
    let current = versioned.chain.current.read().unwrap();
    let mut vertex = current.data.clone();
    if current.commit_ts.is_commit_ts() {
        drop(current);
        return (!vertex.is_tombstone()).then_some(vertex);
    }
    let undo_ptr = versioned.chain.undo_ptr.read().unwrap().clone();
    drop(current);
    for entry in GenericUndoEntry::chain_from(&undo_ptr) {
        apply_vertex_delta(&mut vertex, entry.delta());
        if entry.restores_ts().is_commit_ts() {
            break;
        }
    }
    (!vertex.is_tombstone()).then_some(vertex)
}

/// Per-vertex adjacency: ordered sets of incoming and outgoing
/// neighbors.
#[derive(Debug)]
pub(crate) struct AdjacencyContainer {
    incoming: Arc<SkipSet<Neighbor>>,
    outgoing: Arc<SkipSet<Neighbor>>,
}

impl AdjacencyContainer {
    pub(crate) fn new() -> Self {
        Self {
            incoming: Arc::new(SkipSet::new()),
            outgoing: Arc::new(SkipSet::new()),
        }
    }

    pub(crate) fn incoming(&self) -> &Arc<SkipSet<Neighbor>> {
        &self.incoming
    }

    pub(crate) fn outgoing(&self) -> &Arc<SkipSet<Neighbor>> {
        &self.outgoing
    }
}

/// The transactional in-memory property-graph store.
pub struct GraphStore {
    pub(crate) config: StorageConfig,

    // ---- versioned object storage ----
    pub(crate) vertices: SkipMap<VertexId, VersionedVertex>,
    pub(crate) edges: SkipMap<EdgeId, VersionedEdge>,
    pub(crate) adjacency: DashMap<VertexId, AdjacencyContainer>,

    // ---- identifier interning ----
    pub(crate) labels: NameIdMapper,
    pub(crate) property_keys: NameIdMapper,
    pub(crate) edge_types: NameIdMapper,

    // ---- secondary indices and constraints ----
    pub(crate) indexes: IndexSet,
    pub(crate) constraints: ConstraintSet,

    // ---- transaction management ----
    pub(crate) txn_manager: TxnManager,

    // ---- durability ----
    pub(crate) wal_manager: WalManager,
    pub(crate) snapshot_manager: SnapshotManager,

    next_gid: AtomicU64,
}

impl GraphStore {
    /// Creates an empty store without running recovery. Use
    /// [`GraphStore::open`] to recover persisted state.
    pub fn fresh(mut config: StorageConfig) -> StorageResult<Arc<Self>> {
        if config.storage_mode == StorageMode::OnDiskTransactional {
            return Err(StorageError::NotYetImplemented(
                "on-disk transactional storage",
            ));
        }
        if config.snapshot_retention_count == 0 {
            tracing::warn!("snapshot_retention_count of 0 raised to the minimum of 1");
            config.snapshot_retention_count = 1;
        }
        std::fs::create_dir_all(config.snapshots_dir())
            .map_err(|e| StorageError::Snapshot(crate::error::SnapshotError::Io(e)))?;
        let wal_manager = WalManager::open(config.wal_dir(), config.wal_active())?;
        let snapshot_entries = SnapshotManager::scan_existing(&config.snapshots_dir())?;

        let store = Arc::new_cyclic(|weak: &Weak<GraphStore>| GraphStore {
            txn_manager: TxnManager::new(weak.clone()),
            snapshot_manager: SnapshotManager::with_entries(
                weak.clone(),
                &config,
                snapshot_entries,
            ),
            wal_manager,
            vertices: SkipMap::new(),
            edges: SkipMap::new(),
            adjacency: DashMap::new(),
            labels: NameIdMapper::new(),
            property_keys: NameIdMapper::new(),
            edge_types: NameIdMapper::new(),
            indexes: IndexSet::new(),
            constraints: ConstraintSet::new(),
            next_gid: AtomicU64::new(1),
            config,
        });
        Ok(store)
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub(crate) fn analytical(&self) -> bool {
        self.config.storage_mode == StorageMode::InMemoryAnalytical
    }

    /// The stamp written into versions this transaction touches. In
    /// analytical mode writes are immediately visible to everyone.
    fn write_stamp(&self, txn: &GraphTransaction) -> Timestamp {
        if self.analytical() {
            Timestamp::with_ts(0)
        } else {
            txn.txn_id()
        }
    }

    pub fn begin_transaction(
        &self,
        isolation_level: IsolationLevel,
    ) -> StorageResult<Arc<GraphTransaction>> {
        use quiver_transaction::GraphTxnManager;
        self.txn_manager.begin_transaction(isolation_level)
    }

    pub fn txn_manager(&self) -> &TxnManager {
        &self.txn_manager
    }

    // ===== identifier allocation and interning =====

    pub(crate) fn allocate_gid(&self) -> Gid {
        self.next_gid.fetch_add(1, Ordering::SeqCst)
    }

    /// Keeps the allocator ahead of externally supplied ids (snapshot
    /// load, WAL replay).
    pub(crate) fn note_gid(&self, gid: Gid) {
        self.next_gid.fetch_max(gid + 1, Ordering::SeqCst);
    }

    pub fn label_id(&self, name: &str) -> StorageResult<LabelId> {
        let (raw, fresh) = self.labels.intern(name);
        if fresh {
            self.wal_manager.append_ddl(WalOp::InternName {
                kind: NameKind::Label,
                id: raw,
                name: name.to_string(),
            })?;
        }
        LabelId::new(raw).ok_or_else(|| StorageError::Allocation("label id overflow".into()))
    }

    pub fn property_id(&self, name: &str) -> StorageResult<PropertyId> {
        let (raw, fresh) = self.property_keys.intern(name);
        if fresh {
            self.wal_manager.append_ddl(WalOp::InternName {
                kind: NameKind::Property,
                id: raw,
                name: name.to_string(),
            })?;
        }
        Ok(raw)
    }

    pub fn edge_type_id(&self, name: &str) -> StorageResult<EdgeTypeId> {
        let (raw, fresh) = self.edge_types.intern(name);
        if fresh {
            self.wal_manager.append_ddl(WalOp::InternName {
                kind: NameKind::EdgeType,
                id: raw,
                name: name.to_string(),
            })?;
        }
        EdgeTypeId::new(raw).ok_or_else(|| StorageError::Allocation("edge type id overflow".into()))
    }

    pub fn label_name(&self, label: LabelId) -> Option<String> {
        self.labels.name_of(label.get())
    }

    pub fn property_name(&self, property: PropertyId) -> Option<String> {
        self.property_keys.name_of(property)
    }

    pub fn edge_type_name(&self, etype: EdgeTypeId) -> Option<String> {
        self.edge_types.name_of(etype.get())
    }

    // ===== reads =====

    pub fn get_vertex(&self, txn: &Arc<GraphTransaction>, vid: VertexId) -> StorageResult<Vertex> {
        self.get_vertex_with_view(txn, vid, View::New)
    }

    pub fn get_vertex_with_view(
        &self,
        txn: &Arc<GraphTransaction>,
        vid: VertexId,
        view: View,
    ) -> StorageResult<Vertex> {
        let entry = self
            .vertices
            .get(&vid)
            .ok_or(StorageError::VertexNotFound(VertexNotFoundError::NotFound(
                vid,
            )))?;
        if txn.isolation_level().validates_reads() {
            txn.vertex_reads.insert(vid);
        }
        entry.value().get_visible(txn, view)
    }

    pub fn get_edge(&self, txn: &Arc<GraphTransaction>, eid: EdgeId) -> StorageResult<Edge> {
        self.get_edge_with_view(txn, eid, View::New)
    }

    pub fn get_edge_with_view(
        &self,
        txn: &Arc<GraphTransaction>,
        eid: EdgeId,
        view: View,
    ) -> StorageResult<Edge> {
        let entry = self
            .edges
            .get(&eid)
            .ok_or(StorageError::EdgeNotFound(EdgeNotFoundError::NotFound(eid)))?;
        if txn.isolation_level().validates_reads() {
            txn.edge_reads.insert(eid);
        }
        entry.value().get_visible(txn, view)
    }

    /// Total number of object slots, live or tombstoned. Approximate by
    /// design.
    pub fn approximate_vertex_count(&self) -> u64 {
        self.vertices.len() as u64
    }

    pub fn approximate_edge_count(&self) -> u64 {
        self.edges.len() as u64
    }

    pub fn approximate_label_count(&self, label: LabelId) -> u64 {
        self.indexes.approximate_label_count(label)
    }

    pub fn approximate_label_property_count(&self, label: LabelId, property: PropertyId) -> u64 {
        self.indexes.approximate_property_count(label, property)
    }

    // ===== mutations =====

    /// Records an undo delta against the transaction and links it at
    /// the head of the object's chain. `restore_ts` is the commit
    /// timestamp of the state the delta reconstructs.
    fn record_delta<D>(
        &self,
        txn: &GraphTransaction,
        chain: &VersionChain<D>,
        delta: DeltaOp,
        restore_ts: Timestamp,
    ) {
        if self.analytical() {
            return;
        }
        let older = chain.undo_ptr.read().unwrap().clone();
        let entry = GenericUndoEntry::link(delta, restore_ts, older);
        txn.undo_buffer.write().unwrap().push(entry.clone());
        *chain.undo_ptr.write().unwrap() = Arc::downgrade(&entry);
    }

    /// Queues a logical redo operation for the WAL; written at commit.
    fn record_redo(&self, txn: &GraphTransaction, op: WalOp) {
        if self.analytical() || !self.wal_manager.enabled() {
            return;
        }
        txn.push_redo(op);
    }

    /// First-writer-wins conflict detection: an object stamped by
    /// another live transaction, or committed past this transaction's
    /// snapshot, cannot be written.
    fn check_write_conflict(
        &self,
        commit_ts: Timestamp,
        txn: &GraphTransaction,
    ) -> StorageResult<()> {
        if self.analytical() {
            return Ok(());
        }
        if commit_ts.is_txn_id() && commit_ts != txn.txn_id() {
            return Err(StorageError::Transaction(TransactionError::Serialization(
                format!("object is being written by transaction {:?}", commit_ts),
            )));
        }
        if commit_ts.is_commit_ts() && commit_ts > txn.start_ts() {
            return Err(StorageError::Transaction(TransactionError::Serialization(
                format!(
                    "object was committed at {:?}, after this transaction started",
                    commit_ts
                ),
            )));
        }
        Ok(())
    }

    /// Inserts a new vertex. The object slot starts as a tombstone with
    /// a delete-undo delta, then the payload un-deletes it, so abort
    /// restores the slot to nonexistence.
    pub fn create_vertex(
        &self,
        txn: &Arc<GraphTransaction>,
        vertex: Vertex,
    ) -> StorageResult<VertexId> {
        let vid = vertex.vid();
        self.note_gid(vid);
        let write_ts = self.write_stamp(txn);
        let entry = self
            .vertices
            .get_or_insert_with(vid, || VersionedVertex::placeholder(vid, write_ts));

        let chain = &entry.value().chain;
        let mut current = chain.current.write().unwrap();
        self.check_write_conflict(current.commit_ts, txn)?;
        if !current.data.is_tombstone() {
            return Err(StorageError::Transaction(TransactionError::InvalidState(
                format!("vertex {vid} already exists"),
            )));
        }

        let restore_ts = if current.commit_ts == txn.txn_id() {
            // A fresh placeholder has an empty chain. A slot this
            // transaction tombstoned earlier keeps the in-progress
            // stamp, so the older undo entries still apply on abort.
            if chain.undo_ptr.read().unwrap().upgrade().is_some() {
                txn.txn_id()
            } else {
                Timestamp::with_ts(0)
            }
        } else {
            current.commit_ts
        };
        self.record_delta(txn, chain, DeltaOp::DeleteVertex(vid), restore_ts);

        current.data = vertex.clone();
        current.commit_ts = write_ts;
        self.indexes.note_vertex(&current.data);
        drop(current);

        self.record_redo(txn, WalOp::CreateVertex(vertex));
        Ok(vid)
    }

    /// Inserts a new edge between two visible vertices.
    pub fn create_edge(&self, txn: &Arc<GraphTransaction>, edge: Edge) -> StorageResult<EdgeId> {
        let eid = edge.eid();
        let src_id = edge.src_id();
        let dst_id = edge.dst_id();
        let etype = edge.etype();
        if !self.config.properties_on_edges && !edge.properties().is_empty() {
            return Err(StorageError::PropertiesOnEdgesDisabled);
        }

        self.get_vertex(txn, src_id)?;
        self.get_vertex(txn, dst_id)?;

        self.note_gid(eid);
        let write_ts = self.write_stamp(txn);
        let entry = self
            .edges
            .get_or_insert_with(eid, || VersionedEdge::placeholder(edge.clone(), write_ts));

        let chain = &entry.value().chain;
        let mut current = chain.current.write().unwrap();
        self.check_write_conflict(current.commit_ts, txn)?;
        if !current.data.is_tombstone() {
            return Err(StorageError::Transaction(TransactionError::InvalidState(
                format!("edge {eid} already exists"),
            )));
        }

        let restore_ts = if current.commit_ts == txn.txn_id() {
            if chain.undo_ptr.read().unwrap().upgrade().is_some() {
                txn.txn_id()
            } else {
                Timestamp::with_ts(0)
            }
        } else {
            current.commit_ts
        };
        self.record_delta(txn, chain, DeltaOp::DeleteEdge(eid), restore_ts);

        current.data = edge.clone();
        current.commit_ts = write_ts;
        drop(current);

        self.adjacency
            .entry(src_id)
            .or_insert_with(AdjacencyContainer::new)
            .outgoing()
            .insert(Neighbor::new(etype, dst_id, eid));
        self.adjacency
            .entry(dst_id)
            .or_insert_with(AdjacencyContainer::new)
            .incoming()
            .insert(Neighbor::new(etype, src_id, eid));

        self.record_redo(txn, WalOp::CreateEdge(edge));
        Ok(eid)
    }

    /// Logically deletes a vertex. With `detach` set, all adjacent
    /// visible edges are deleted first; without it, any adjacent edge
    /// is an error. Returns the deleted vertex and the edges removed
    /// with it.
    pub fn delete_vertex(
        &self,
        txn: &Arc<GraphTransaction>,
        vid: VertexId,
        detach: bool,
    ) -> StorageResult<(Vertex, Vec<Edge>)> {
        let entry = self
            .vertices
            .get(&vid)
            .ok_or(StorageError::VertexNotFound(VertexNotFoundError::NotFound(
                vid,
            )))?;
        // Resolve visibility and conflicts before touching edges.
        entry.value().get_visible(txn, View::New)?;
        {
            let current = entry.value().chain.current.read().unwrap();
            self.check_write_conflict(current.commit_ts, txn)?;
        }

        let mut adjacent = std::collections::BTreeSet::new();
        if let Some(container) = self.adjacency.get(&vid) {
            for neighbor in container.incoming().iter() {
                adjacent.insert(neighbor.value().eid());
            }
            for neighbor in container.outgoing().iter() {
                adjacent.insert(neighbor.value().eid());
            }
        }
        adjacent.retain(|eid| {
            self.edges
                .get(eid)
                .map(|e| e.value().get_visible(txn, View::New).is_ok())
                .unwrap_or(false)
        });

        if !detach && !adjacent.is_empty() {
            return Err(StorageError::VertexHasEdges(vid));
        }

        let mut removed_edges = Vec::with_capacity(adjacent.len());
        for eid in adjacent {
            removed_edges.push(self.delete_edge(txn, eid)?);
        }

        let chain = &entry.value().chain;
        let mut current = chain.current.write().unwrap();
        self.check_write_conflict(current.commit_ts, txn)?;
        let removed = current.data.clone();
        self.record_delta(
            txn,
            chain,
            DeltaOp::RecreateVertex(removed.clone()),
            current.commit_ts,
        );
        current.data = Vertex::tombstone(removed.clone());
        current.commit_ts = self.write_stamp(txn);
        drop(current);

        self.record_redo(txn, WalOp::DeleteVertex(vid));
        Ok((removed, removed_edges))
    }

    /// Logically deletes an edge, returning its last visible payload.
    pub fn delete_edge(&self, txn: &Arc<GraphTransaction>, eid: EdgeId) -> StorageResult<Edge> {
        let entry = self
            .edges
            .get(&eid)
            .ok_or(StorageError::EdgeNotFound(EdgeNotFoundError::NotFound(eid)))?;

        let chain = &entry.value().chain;
        let mut current = chain.current.write().unwrap();
        self.check_write_conflict(current.commit_ts, txn)?;
        if current.data.is_tombstone() {
            return Err(StorageError::EdgeNotFound(EdgeNotFoundError::NotVisible(
                eid,
            )));
        }

        let removed = current.data.clone();
        self.record_delta(
            txn,
            chain,
            DeltaOp::RecreateEdge(removed.clone()),
            current.commit_ts,
        );
        current.data = Edge::tombstone(removed.clone());
        current.commit_ts = self.write_stamp(txn);
        drop(current);

        self.record_redo(txn, WalOp::DeleteEdge(eid));
        Ok(removed)
    }

    /// Writes one vertex property, returning the previous value (`Null`
    /// when the key was absent). Writing `Null` removes the key.
    pub fn set_vertex_property(
        &self,
        txn: &Arc<GraphTransaction>,
        vid: VertexId,
        key: PropertyId,
        value: PropertyValue,
    ) -> StorageResult<PropertyValue> {
        let entry = self
            .vertices
            .get(&vid)
            .ok_or(StorageError::VertexNotFound(VertexNotFoundError::NotFound(
                vid,
            )))?;

        let chain = &entry.value().chain;
        let mut current = chain.current.write().unwrap();
        self.check_write_conflict(current.commit_ts, txn)?;
        if current.data.is_tombstone() {
            return Err(StorageError::VertexNotFound(
                VertexNotFoundError::NotVisible(vid),
            ));
        }

        let previous = current.data.set_property(key, value.clone());
        self.record_delta(
            txn,
            chain,
            DeltaOp::SetVertexProperty(vid, key, previous.clone()),
            current.commit_ts,
        );
        self.indexes.note_property_set(&current.data, key, &value);
        current.commit_ts = self.write_stamp(txn);
        drop(current);

        self.record_redo(txn, WalOp::SetVertexProperty(vid, key, value));
        Ok(previous)
    }

    /// Writes one edge property. Rejected when edge properties are
    /// disabled by configuration.
    pub fn set_edge_property(
        &self,
        txn: &Arc<GraphTransaction>,
        eid: EdgeId,
        key: PropertyId,
        value: PropertyValue,
    ) -> StorageResult<PropertyValue> {
        if !self.config.properties_on_edges {
            return Err(StorageError::PropertiesOnEdgesDisabled);
        }
        let entry = self
            .edges
            .get(&eid)
            .ok_or(StorageError::EdgeNotFound(EdgeNotFoundError::NotFound(eid)))?;

        let chain = &entry.value().chain;
        let mut current = chain.current.write().unwrap();
        self.check_write_conflict(current.commit_ts, txn)?;
        if current.data.is_tombstone() {
            return Err(StorageError::EdgeNotFound(EdgeNotFoundError::NotVisible(
                eid,
            )));
        }

        let previous = current.data.set_property(key, value.clone());
        self.record_delta(
            txn,
            chain,
            DeltaOp::SetEdgeProperty(eid, key, previous.clone()),
            current.commit_ts,
        );
        current.commit_ts = self.write_stamp(txn);
        drop(current);

        self.record_redo(txn, WalOp::SetEdgeProperty(eid, key, value));
        Ok(previous)
    }

    /// Adds a label; returns false when the vertex already carries it.
    pub fn add_label(
        &self,
        txn: &Arc<GraphTransaction>,
        vid: VertexId,
        label: LabelId,
    ) -> StorageResult<bool> {
        let entry = self
            .vertices
            .get(&vid)
            .ok_or(StorageError::VertexNotFound(VertexNotFoundError::NotFound(
                vid,
            )))?;

        let chain = &entry.value().chain;
        let mut current = chain.current.write().unwrap();
        self.check_write_conflict(current.commit_ts, txn)?;
        if current.data.is_tombstone() {
            return Err(StorageError::VertexNotFound(
                VertexNotFoundError::NotVisible(vid),
            ));
        }
        if !current.data.add_label(label) {
            return Ok(false);
        }

        self.record_delta(txn, chain, DeltaOp::RemoveLabel(vid, label), current.commit_ts);
        self.indexes.note_label_added(&current.data, label);
        current.commit_ts = self.write_stamp(txn);
        drop(current);

        self.record_redo(txn, WalOp::AddLabel(vid, label));
        Ok(true)
    }

    /// Removes a label; returns false when the vertex does not carry
    /// it. Index entries for the label stay behind as stale prospective
    /// entries until GC vacuums them.
    pub fn remove_label(
        &self,
        txn: &Arc<GraphTransaction>,
        vid: VertexId,
        label: LabelId,
    ) -> StorageResult<bool> {
        let entry = self
            .vertices
            .get(&vid)
            .ok_or(StorageError::VertexNotFound(VertexNotFoundError::NotFound(
                vid,
            )))?;

        let chain = &entry.value().chain;
        let mut current = chain.current.write().unwrap();
        self.check_write_conflict(current.commit_ts, txn)?;
        if current.data.is_tombstone() {
            return Err(StorageError::VertexNotFound(
                VertexNotFoundError::NotVisible(vid),
            ));
        }
        if !current.data.remove_label(label) {
            return Ok(false);
        }

        self.record_delta(txn, chain, DeltaOp::AddLabel(vid, label), current.commit_ts);
        current.commit_ts = self.write_stamp(txn);
        drop(current);

        self.record_redo(txn, WalOp::RemoveLabel(vid, label));
        Ok(true)
    }

    // ===== index and constraint DDL =====

    pub fn create_label_index(&self, label: LabelId) -> StorageResult<()> {
        self.create_label_index_at(label, true)
    }

    pub(crate) fn create_label_index_at(&self, label: LabelId, log: bool) -> StorageResult<()> {
        self.indexes.register_label(label)?;
        for entry in self.vertices.iter() {
            let current = entry.value().chain.current.write().unwrap();
            if !current.data.is_tombstone() && current.data.has_label(label) {
                self.indexes.note_label_added(&current.data, label);
            }
        }
        if log {
            self.wal_manager.append_ddl(WalOp::CreateLabelIndex(label))?;
        }
        Ok(())
    }

    pub fn drop_label_index(&self, label: LabelId) -> StorageResult<()> {
        self.indexes.unregister_label(label)?;
        self.wal_manager.append_ddl(WalOp::DropLabelIndex(label))
    }

    pub fn create_label_property_index(
        &self,
        label: LabelId,
        property: PropertyId,
    ) -> StorageResult<()> {
        self.create_label_property_index_at(label, property, true)
    }

    pub(crate) fn create_label_property_index_at(
        &self,
        label: LabelId,
        property: PropertyId,
        log: bool,
    ) -> StorageResult<()> {
        self.indexes.register_property(label, property)?;
        for entry in self.vertices.iter() {
            let current = entry.value().chain.current.write().unwrap();
            if current.data.is_tombstone() || !current.data.has_label(label) {
                continue;
            }
            if let Some(value) = current.data.property(property) {
                let value = value.clone();
                self.indexes.note_property_set(&current.data, property, &value);
            }
        }
        if log {
            self.wal_manager
                .append_ddl(WalOp::CreateLabelPropertyIndex(label, property))?;
        }
        Ok(())
    }

    pub fn drop_label_property_index(
        &self,
        label: LabelId,
        property: PropertyId,
    ) -> StorageResult<()> {
        self.indexes.unregister_property(label, property)?;
        self.wal_manager
            .append_ddl(WalOp::DropLabelPropertyIndex(label, property))
    }

    pub fn create_existence_constraint(
        &self,
        label: LabelId,
        property: PropertyId,
    ) -> StorageResult<()> {
        self.create_existence_constraint_at(label, property, true)
    }

    pub(crate) fn create_existence_constraint_at(
        &self,
        label: LabelId,
        property: PropertyId,
        log: bool,
    ) -> StorageResult<()> {
        // Freeze commits so validation sees a stable committed state.
        let _commit_guard = self.txn_manager.commit_lock.lock().unwrap();
        for entry in self.vertices.iter() {
            if let Some(vertex) = committed_vertex(entry.value()) {
                if vertex.has_label(label) && vertex.property(property).is_none() {
                    return Err(StorageError::Constraint(ConstraintViolation::Existence {
                        label,
                        property,
                        gid: vertex.vid(),
                    }));
                }
            }
        }
        self.constraints.register_existence(label, property)?;
        if log {
            self.wal_manager
                .append_ddl(WalOp::CreateExistenceConstraint(label, property))?;
        }
        Ok(())
    }

    pub fn drop_existence_constraint(
        &self,
        label: LabelId,
        property: PropertyId,
    ) -> StorageResult<()> {
        self.constraints.unregister_existence(label, property)?;
        self.wal_manager
            .append_ddl(WalOp::DropExistenceConstraint(label, property))
    }

    pub fn create_unique_constraint(
        &self,
        label: LabelId,
        properties: Vec<PropertyId>,
    ) -> StorageResult<()> {
        self.create_unique_constraint_at(label, properties, true)
    }

    pub(crate) fn create_unique_constraint_at(
        &self,
        label: LabelId,
        properties: Vec<PropertyId>,
        log: bool,
    ) -> StorageResult<()> {
        let _commit_guard = self.txn_manager.commit_lock.lock().unwrap();
        let constraint = self.constraints.register_unique(label, properties.clone())?;
        for entry in self.vertices.iter() {
            if let Some(vertex) = committed_vertex(entry.value()) {
                if !self.constraints.seed_unique(&constraint, &vertex) {
                    let gid = vertex.vid();
                    self.constraints.unregister_unique(label, &properties)?;
                    return Err(StorageError::Constraint(ConstraintViolation::Unique {
                        label,
                        properties,
                        gid,
                    }));
                }
            }
        }
        if log {
            self.wal_manager
                .append_ddl(WalOp::CreateUniqueConstraint(label, properties))?;
        }
        Ok(())
    }

    pub fn drop_unique_constraint(
        &self,
        label: LabelId,
        properties: &[PropertyId],
    ) -> StorageResult<()> {
        self.constraints.unregister_unique(label, properties)?;
        self.wal_manager
            .append_ddl(WalOp::DropUniqueConstraint(label, properties.to_vec()))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use temp_dir::TempDir;

    use super::*;

    /// A config rooted in a self-cleaning scratch directory. The
    /// returned [`TempDir`] removes everything when it drops.
    pub(crate) fn mock_config(tag: &str) -> (StorageConfig, TempDir) {
        let scratch = TempDir::with_prefix(format!("quiver_{tag}_")).unwrap();
        let config = StorageConfig {
            data_dir: scratch.path().to_path_buf(),
            snapshot_interval_sec: 0,
            gc_interval_sec: 0,
            ..Default::default()
        };
        (config, scratch)
    }

    pub(crate) fn mock_store(tag: &str) -> (Arc<GraphStore>, TempDir) {
        let (config, scratch) = mock_config(tag);
        let store = GraphStore::fresh(config).unwrap();
        (store, scratch)
    }

    fn label(id: u32) -> LabelId {
        LabelId::new(id).unwrap()
    }

    fn etype(id: u32) -> EdgeTypeId {
        EdgeTypeId::new(id).unwrap()
    }

    const NAME: PropertyId = 1;

    fn person(vid: VertexId, name: &str) -> Vertex {
        let mut props = PropertyRecord::new();
        props.set(NAME, PropertyValue::String(name.into()));
        Vertex::new(vid, vec![label(1)], props)
    }

    #[test]
    fn create_is_private_until_commit() {
        let (store, _scratch) = mock_store("create_private");
        let writer = store.begin_transaction(IsolationLevel::Snapshot).unwrap();
        store.create_vertex(&writer, person(1, "alice")).unwrap();

        // The creator sees its own write.
        assert!(store.get_vertex(&writer, 1).is_ok());

        // A concurrent snapshot reader does not.
        let reader = store.begin_transaction(IsolationLevel::Snapshot).unwrap();
        assert!(store.get_vertex(&reader, 1).is_err());
        reader.abort().unwrap();

        writer.commit().unwrap();

        let late = store.begin_transaction(IsolationLevel::Snapshot).unwrap();
        let alice = store.get_vertex(&late, 1).unwrap();
        assert_eq!(
            alice.property(NAME),
            Some(&PropertyValue::String("alice".into()))
        );
        late.abort().unwrap();
    }

    #[test]
    fn old_view_hides_own_writes() {
        let (store, _scratch) = mock_store("old_view");
        let setup = store.begin_transaction(IsolationLevel::Snapshot).unwrap();
        store.create_vertex(&setup, person(1, "alice")).unwrap();
        setup.commit().unwrap();

        let txn = store.begin_transaction(IsolationLevel::Snapshot).unwrap();
        store
            .set_vertex_property(&txn, 1, NAME, PropertyValue::String("bob".into()))
            .unwrap();

        let new_view = store.get_vertex_with_view(&txn, 1, View::New).unwrap();
        assert_eq!(
            new_view.property(NAME),
            Some(&PropertyValue::String("bob".into()))
        );

        let old_view = store.get_vertex_with_view(&txn, 1, View::Old).unwrap();
        assert_eq!(
            old_view.property(NAME),
            Some(&PropertyValue::String("alice".into()))
        );
        txn.abort().unwrap();
    }

    #[test]
    fn delete_without_detach_requires_no_edges() {
        let (store, _scratch) = mock_store("detach");
        let txn = store.begin_transaction(IsolationLevel::Snapshot).unwrap();
        store.create_vertex(&txn, person(1, "alice")).unwrap();
        store.create_vertex(&txn, person(2, "bob")).unwrap();
        store
            .create_edge(&txn, Edge::new(3, 1, 2, etype(1), PropertyRecord::new()))
            .unwrap();
        txn.commit().unwrap();

        let txn = store.begin_transaction(IsolationLevel::Snapshot).unwrap();
        let err = store.delete_vertex(&txn, 1, false).unwrap_err();
        assert!(matches!(err, StorageError::VertexHasEdges(1)));

        let (removed, removed_edges) = store.delete_vertex(&txn, 1, true).unwrap();
        assert_eq!(removed.vid(), 1);
        assert_eq!(removed_edges.len(), 1);
        assert_eq!(removed_edges[0].eid(), 3);
        txn.commit().unwrap();

        let txn = store.begin_transaction(IsolationLevel::Snapshot).unwrap();
        assert!(store.get_vertex(&txn, 1).is_err());
        assert!(store.get_edge(&txn, 3).is_err());
        assert!(store.get_vertex(&txn, 2).is_ok());
        txn.abort().unwrap();
    }

    #[test]
    fn write_conflict_is_detected_immediately() {
        let (store, _scratch) = mock_store("conflict");
        let setup = store.begin_transaction(IsolationLevel::Snapshot).unwrap();
        store.create_vertex(&setup, person(1, "alice")).unwrap();
        setup.commit().unwrap();

        let t1 = store.begin_transaction(IsolationLevel::Snapshot).unwrap();
        let t2 = store.begin_transaction(IsolationLevel::Snapshot).unwrap();

        store
            .set_vertex_property(&t1, 1, NAME, PropertyValue::String("x".into()))
            .unwrap();
        let err = store
            .set_vertex_property(&t2, 1, NAME, PropertyValue::String("y".into()))
            .unwrap_err();
        assert!(matches!(
            err,
            StorageError::Transaction(TransactionError::Serialization(_))
        ));

        t1.commit().unwrap();
        t2.abort().unwrap();
    }

    #[test]
    fn analytical_mode_skips_versioning() {
        let (mut config, _scratch) = mock_config("analytical");
        config.storage_mode = StorageMode::InMemoryAnalytical;
        let store = GraphStore::fresh(config).unwrap();

        let txn = store.begin_transaction(IsolationLevel::Snapshot).unwrap();
        store.create_vertex(&txn, person(1, "alice")).unwrap();

        // Immediately visible to a reader that started earlier.
        let reader = store.begin_transaction(IsolationLevel::Snapshot).unwrap();
        assert!(store.get_vertex(&reader, 1).is_ok());
        assert!(txn.undo_buffer.read().unwrap().is_empty());

        reader.commit().unwrap();
        txn.commit().unwrap();
    }
}
