//! Per-transaction state: undo buffer, redo buffer, read sets, and the
//! commit/abort machinery.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, RwLock, Weak};

use dashmap::DashSet;
use quiver_common::{EdgeId, VertexId};
use quiver_transaction::{
    IsolationLevel, Timestamp, Transaction, TxnStatus, UndoEntry as GenericUndoEntry,
    UndoPtr as GenericUndoPtr,
};

use crate::delta::DeltaOp;
use crate::error::{StorageError, StorageResult, TransactionError};
use crate::graph::{committed_vertex, GraphStore};
use crate::model::{Edge, Vertex};
use crate::wal::{WalEntry, WalOp};

/// Undo entry specialized to the storage delta type.
pub type UndoEntry = GenericUndoEntry<DeltaOp>;

/// Weak undo pointer specialized to the storage delta type.
pub type UndoPtr = GenericUndoPtr<DeltaOp>;

pub struct GraphTransaction {
    /// Weak so finished-but-retained transactions never keep the store
    /// alive.
    graph: Weak<GraphStore>,

    isolation_level: IsolationLevel,

    // ---- timestamps ----
    start_ts: Timestamp,
    commit_ts: OnceLock<Timestamp>,
    txn_id: Timestamp,

    // ---- read sets (Serializable only) ----
    pub(crate) vertex_reads: DashSet<VertexId>,
    pub(crate) edge_reads: DashSet<EdgeId>,

    // ---- undo log: how to erase this transaction ----
    pub(crate) undo_buffer: RwLock<Vec<Arc<UndoEntry>>>,

    // ---- redo log: what the WAL records at commit ----
    pub(crate) redo_buffer: RwLock<Vec<WalEntry>>,

    // ---- lifecycle flags ----
    is_handled: AtomicBool,
    is_aborted: AtomicBool,
}

impl GraphTransaction {
    pub(crate) fn new(
        graph: Weak<GraphStore>,
        txn_id: Timestamp,
        start_ts: Timestamp,
        isolation_level: IsolationLevel,
    ) -> Self {
        Self {
            graph,
            isolation_level,
            start_ts,
            commit_ts: OnceLock::new(),
            txn_id,
            vertex_reads: DashSet::new(),
            edge_reads: DashSet::new(),
            undo_buffer: RwLock::new(Vec::new()),
            redo_buffer: RwLock::new(Vec::new()),
            is_handled: AtomicBool::new(false),
            is_aborted: AtomicBool::new(false),
        }
    }

    pub fn txn_id(&self) -> Timestamp {
        self.txn_id
    }

    pub fn start_ts(&self) -> Timestamp {
        self.start_ts
    }

    pub fn commit_ts(&self) -> Option<Timestamp> {
        self.commit_ts.get().copied()
    }

    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation_level
    }

    /// The snapshot boundary reads compare commit timestamps against.
    pub(crate) fn read_boundary(&self) -> Timestamp {
        self.isolation_level.read_boundary(self.start_ts)
    }

    pub(crate) fn graph(&self) -> StorageResult<Arc<GraphStore>> {
        self.graph.upgrade().ok_or_else(|| {
            StorageError::Transaction(TransactionError::InvalidState(
                "storage instance is gone".to_string(),
            ))
        })
    }

    pub(crate) fn push_redo(&self, op: WalOp) {
        self.redo_buffer.write().unwrap().push(WalEntry {
            lsn: 0, // assigned at commit
            txn_id: self.txn_id,
            op,
        });
    }

    pub fn is_handled(&self) -> bool {
        self.is_handled.load(Ordering::Acquire)
    }

    pub(crate) fn is_aborted(&self) -> bool {
        self.is_aborted.load(Ordering::Acquire)
    }

    /// Marks the transaction as handled so the drop hook will not roll
    /// it back.
    pub fn mark_handled(&self) {
        self.is_handled.store(true, Ordering::Release);
    }

    /// Ids of every object this transaction wrote, derived from its
    /// undo buffer.
    fn touched_objects(&self) -> (BTreeSet<VertexId>, BTreeSet<EdgeId>) {
        let undo = self.undo_buffer.read().unwrap();
        let mut vids = BTreeSet::new();
        let mut eids = BTreeSet::new();
        for entry in undo.iter() {
            if let Some(vid) = entry.delta().vertex_id() {
                vids.insert(vid);
            }
            if let Some(eid) = entry.delta().edge_id() {
                eids.insert(eid);
            }
        }
        (vids, eids)
    }

    /// Rewrites the version stamp of every touched object from `from`
    /// to `to`. Used to publish a commit timestamp, and to take it back
    /// when the WAL write fails.
    fn restamp(
        &self,
        graph: &GraphStore,
        vids: &BTreeSet<VertexId>,
        eids: &BTreeSet<EdgeId>,
        from: Timestamp,
        to: Timestamp,
    ) {
        for vid in vids {
            if let Some(entry) = graph.vertices.get(vid) {
                let mut current = entry.value().chain.current.write().unwrap();
                if current.commit_ts == from {
                    current.commit_ts = to;
                }
            }
        }
        for eid in eids {
            if let Some(entry) = graph.edges.get(eid) {
                let mut current = entry.value().chain.current.write().unwrap();
                if current.commit_ts == from {
                    current.commit_ts = to;
                }
            }
        }
    }

    /// Serializable validation: every object in the read set must still
    /// be unchanged since this transaction's snapshot.
    fn validate_read_sets(&self, graph: &GraphStore) -> StorageResult<()> {
        for vid in self.vertex_reads.iter() {
            let vid = *vid;
            let changed = match graph.vertices.get(&vid) {
                Some(entry) => {
                    let current = entry.value().chain.current.read().unwrap();
                    current.commit_ts != self.txn_id && current.commit_ts > self.start_ts
                }
                None => true,
            };
            if changed {
                return Err(StorageError::Transaction(
                    TransactionError::ReadWriteConflict(format!(
                        "vertex {vid} changed after this transaction started"
                    )),
                ));
            }
        }
        for eid in self.edge_reads.iter() {
            let eid = *eid;
            let changed = match graph.edges.get(&eid) {
                Some(entry) => {
                    let current = entry.value().chain.current.read().unwrap();
                    current.commit_ts != self.txn_id && current.commit_ts > self.start_ts
                }
                None => true,
            };
            if changed {
                return Err(StorageError::Transaction(
                    TransactionError::ReadWriteConflict(format!(
                        "edge {eid} changed after this transaction started"
                    )),
                ));
            }
        }
        Ok(())
    }

    /// Validates existence and unique constraints for every touched
    /// vertex against the state this commit would publish, staging the
    /// unique-registry updates for after the WAL write.
    fn validate_constraints(
        &self,
        graph: &GraphStore,
    ) -> StorageResult<Vec<crate::constraint::StagedUnique>> {
        let mut staged = Vec::new();
        if graph.constraints.is_empty() {
            return Ok(staged);
        }
        let (vids, _) = self.touched_objects();
        for vid in vids {
            let Some(entry) = graph.vertices.get(&vid) else {
                continue;
            };
            let new_state = {
                let current = entry.value().chain.current.read().unwrap();
                if current.commit_ts != self.txn_id {
                    continue;
                }
                (!current.data.is_tombstone()).then(|| current.data.clone())
            };
            let old_state = committed_vertex(entry.value());
            if let Some(vertex) = &new_state {
                graph.constraints.check_existence(vertex)?;
            }
            graph
                .constraints
                .check_unique(vid, old_state.as_ref(), new_state.as_ref(), &mut staged)?;
        }
        Ok(staged)
    }

    pub fn commit(&self) -> StorageResult<Timestamp> {
        self.commit_at(None, false)
    }

    /// Commits at an explicitly requested commit timestamp. Used by WAL
    /// replay and by callers coordinating timestamps externally (e.g. a
    /// replication frontend).
    pub fn commit_at(
        &self,
        desired_commit_ts: Option<Timestamp>,
        skip_wal: bool,
    ) -> StorageResult<Timestamp> {
        let graph = self.graph()?;

        if graph.analytical() {
            // Analytical writes are already published; unregister before
            // the commit timestamp is set so the transaction is not
            // filed for GC tracking.
            self.mark_handled();
            graph.txn_manager.unregister(self)?;
            let commit_ts = Timestamp::with_ts(
                graph.txn_manager.latest_commit_ts.load(Ordering::Acquire),
            );
            let _ = self.commit_ts.set(commit_ts);
            return Ok(commit_ts);
        }

        // Commits are serialized: constraint validation, timestamp
        // assignment, and publication happen in one critical section.
        let guard = graph.txn_manager.commit_lock.lock().unwrap();

        if self.isolation_level.validates_reads() {
            if let Err(e) = self.validate_read_sets(&graph) {
                drop(guard);
                self.abort_at(skip_wal)?;
                return Err(e);
            }
        }

        let staged = match self.validate_constraints(&graph) {
            Ok(staged) => staged,
            Err(e) => {
                drop(guard);
                self.abort_at(skip_wal)?;
                return Err(e);
            }
        };

        let commit_ts = match desired_commit_ts {
            Some(ts) => {
                graph
                    .txn_manager
                    .timestamps
                    .update_if_greater(ts)
                    .map_err(TransactionError::Timestamp)?;
                ts
            }
            None => graph
                .txn_manager
                .timestamps
                .next()
                .map_err(TransactionError::Timestamp)?,
        };
        if self.commit_ts.set(commit_ts).is_err() {
            drop(guard);
            self.abort_at(skip_wal)?;
            return Err(StorageError::Transaction(
                TransactionError::TransactionAlreadyCommitted(format!("{:?}", self.txn_id)),
            ));
        }

        // Publish: replace the in-progress marker on every touched
        // object with the commit timestamp.
        let (vids, eids) = self.touched_objects();
        self.restamp(&graph, &vids, &eids, self.txn_id, commit_ts);

        // Make it durable. On failure the stamps are taken back and the
        // transaction aborts.
        if !skip_wal && graph.wal_manager.enabled() {
            let wal_result = (|| -> StorageResult<()> {
                let entries: Vec<WalEntry> = self
                    .redo_buffer
                    .write()
                    .unwrap()
                    .drain(..)
                    .map(|mut entry| {
                        entry.lsn = graph.wal_manager.next_lsn();
                        entry
                    })
                    .collect();
                for entry in &entries {
                    graph.wal_manager.append(entry)?;
                }
                graph.wal_manager.append(&WalEntry {
                    lsn: graph.wal_manager.next_lsn(),
                    txn_id: self.txn_id,
                    op: WalOp::TxnCommit { commit_ts },
                })?;
                graph.wal_manager.flush()
            })();
            if let Err(e) = wal_result {
                self.restamp(&graph, &vids, &eids, commit_ts, self.txn_id);
                drop(guard);
                self.abort_at(true)?;
                return Err(e);
            }
        }

        graph.constraints.apply_staged(staged);
        graph
            .txn_manager
            .latest_commit_ts
            .store(commit_ts.raw(), Ordering::SeqCst);
        self.mark_handled();
        graph.txn_manager.unregister(self)?;
        drop(guard);

        // Automatic snapshots ride the commit path; failure to take one
        // must not fail the commit.
        if !skip_wal {
            if let Err(e) = graph.snapshot_manager.check_auto() {
                tracing::warn!(error = %e, "automatic snapshot failed");
            }
        }

        Ok(commit_ts)
    }

    pub fn abort(&self) -> StorageResult<()> {
        self.abort_at(false)
    }

    /// Rolls the transaction back: every undo delta is applied to its
    /// object newest-first, restoring the pre-transaction state and
    /// unlinking this transaction's chain prefix.
    pub fn abort_at(&self, skip_wal: bool) -> StorageResult<()> {
        let Some(graph) = self.graph.upgrade() else {
            self.is_aborted.store(true, Ordering::Release);
            self.mark_handled();
            return Ok(());
        };

        let undo_entries: Vec<_> = self.undo_buffer.write().unwrap().drain(..).collect();
        for entry in undo_entries.iter().rev() {
            let restore_ts = entry.restores_ts();
            let next = entry.older();
            match entry.delta() {
                // Undo of a create: the slot goes back to nonexistence.
                DeltaOp::DeleteVertex(vid) => {
                    if let Some(slot) = graph.vertices.get(vid) {
                        let mut current = slot.value().chain.current.write().unwrap();
                        if current.commit_ts != self.txn_id {
                            continue;
                        }
                        if restore_ts.raw() == 0 {
                            // Fresh slot: no committed state below, so
                            // the prospective index entries go too.
                            graph.indexes.purge_vertex(&current.data);
                        }
                        current.data = Vertex::tombstone(current.data.clone());
                        current.commit_ts = restore_ts;
                        *slot.value().chain.undo_ptr.write().unwrap() = next;
                    }
                }
                // Undo of a delete: restore the deleted payload.
                DeltaOp::RecreateVertex(vertex) => {
                    if let Some(slot) = graph.vertices.get(&vertex.vid()) {
                        let mut current = slot.value().chain.current.write().unwrap();
                        if current.commit_ts != self.txn_id {
                            continue;
                        }
                        current.data = vertex.clone();
                        current.commit_ts = restore_ts;
                        *slot.value().chain.undo_ptr.write().unwrap() = next;
                    }
                }
                DeltaOp::DeleteEdge(eid) => {
                    if let Some(slot) = graph.edges.get(eid) {
                        let mut current = slot.value().chain.current.write().unwrap();
                        if current.commit_ts != self.txn_id {
                            continue;
                        }
                        current.data = Edge::tombstone(current.data.clone());
                        current.commit_ts = restore_ts;
                        *slot.value().chain.undo_ptr.write().unwrap() = next;
                    }
                }
                DeltaOp::RecreateEdge(edge) => {
                    if let Some(slot) = graph.edges.get(&edge.eid()) {
                        let mut current = slot.value().chain.current.write().unwrap();
                        if current.commit_ts != self.txn_id {
                            continue;
                        }
                        current.data = edge.clone();
                        current.commit_ts = restore_ts;
                        *slot.value().chain.undo_ptr.write().unwrap() = next;
                    }
                }
                DeltaOp::SetVertexProperty(vid, key, previous) => {
                    if let Some(slot) = graph.vertices.get(vid) {
                        let mut current = slot.value().chain.current.write().unwrap();
                        if current.commit_ts != self.txn_id {
                            continue;
                        }
                        current.data.set_property(*key, previous.clone());
                        current.commit_ts = restore_ts;
                        *slot.value().chain.undo_ptr.write().unwrap() = next;
                    }
                }
                DeltaOp::SetEdgeProperty(eid, key, previous) => {
                    if let Some(slot) = graph.edges.get(eid) {
                        let mut current = slot.value().chain.current.write().unwrap();
                        if current.commit_ts != self.txn_id {
                            continue;
                        }
                        current.data.set_property(*key, previous.clone());
                        current.commit_ts = restore_ts;
                        *slot.value().chain.undo_ptr.write().unwrap() = next;
                    }
                }
                DeltaOp::AddLabel(vid, label) => {
                    if let Some(slot) = graph.vertices.get(vid) {
                        let mut current = slot.value().chain.current.write().unwrap();
                        if current.commit_ts != self.txn_id {
                            continue;
                        }
                        current.data.add_label(*label);
                        current.commit_ts = restore_ts;
                        *slot.value().chain.undo_ptr.write().unwrap() = next;
                    }
                }
                DeltaOp::RemoveLabel(vid, label) => {
                    if let Some(slot) = graph.vertices.get(vid) {
                        let mut current = slot.value().chain.current.write().unwrap();
                        if current.commit_ts != self.txn_id {
                            continue;
                        }
                        current.data.remove_label(*label);
                        current.commit_ts = restore_ts;
                        *slot.value().chain.undo_ptr.write().unwrap() = next;
                    }
                }
            }
        }

        if !skip_wal && graph.wal_manager.enabled() {
            self.redo_buffer.write().unwrap().clear();
            graph.wal_manager.append(&WalEntry {
                lsn: graph.wal_manager.next_lsn(),
                txn_id: self.txn_id,
                op: WalOp::TxnAbort,
            })?;
            graph.wal_manager.flush()?;
        }

        self.is_aborted.store(true, Ordering::Release);
        self.mark_handled();
        graph.txn_manager.unregister(self)?;
        Ok(())
    }
}

impl Transaction for GraphTransaction {
    type Error = StorageError;

    fn txn_id(&self) -> Timestamp {
        self.txn_id
    }

    fn start_ts(&self) -> Timestamp {
        self.start_ts
    }

    fn isolation_level(&self) -> IsolationLevel {
        self.isolation_level
    }

    fn status(&self) -> TxnStatus {
        if self.is_aborted() {
            TxnStatus::Aborted
        } else {
            match self.commit_ts() {
                Some(commit_ts) => TxnStatus::Committed(commit_ts),
                None => TxnStatus::Active,
            }
        }
    }

    fn commit(&self) -> Result<Timestamp, Self::Error> {
        GraphTransaction::commit(self)
    }

    fn abort(&self) -> Result<(), Self::Error> {
        GraphTransaction::abort(self)
    }
}

impl Drop for GraphTransaction {
    fn drop(&mut self) {
        // Uncommitted transactions roll back when the last handle goes
        // away; errors are swallowed since there is nobody to report
        // them to.
        if !self.is_handled() {
            let _ = self.abort();
        }
    }
}
