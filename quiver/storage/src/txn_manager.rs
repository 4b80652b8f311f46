//! Transaction lifecycle management and garbage collection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{SystemTime, UNIX_EPOCH};

use crossbeam_skiplist::SkipMap;
use quiver_common::{EdgeId, VertexId};
use quiver_transaction::{
    GraphTxnManager, IsolationLevel, Timestamp, TimestampGenerator, TransactionIdGenerator,
};

use crate::delta::DeltaOp;
use crate::error::{StorageError, StorageResult, TransactionError};
use crate::graph::GraphStore;
use crate::model::Neighbor;
use crate::transaction::GraphTransaction;
use crate::wal::{WalEntry, WalOp};

/// Committed-transaction backlog that triggers a collection cycle.
const GC_COMMITTED_THRESHOLD: usize = 50;

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Owns the logical clock, the active/committed transaction sets, and
/// the watermark that drives garbage collection.
pub struct TxnManager {
    pub(crate) graph: Weak<GraphStore>,

    pub(crate) timestamps: TimestampGenerator,
    pub(crate) txn_ids: TransactionIdGenerator,

    /// Active transactions keyed by start timestamp.
    active_txns: SkipMap<Timestamp, Arc<GraphTransaction>>,
    /// Finished, committed transactions keyed by commit timestamp;
    /// retained until GC because their undo buffers own the version
    /// chains.
    committed_txns: SkipMap<Timestamp, Arc<GraphTransaction>>,

    /// Serializes commits: constraint validation, commit-timestamp
    /// assignment, and publication form one critical section.
    pub(crate) commit_lock: Mutex<()>,
    pub(crate) latest_commit_ts: AtomicU64,

    /// Minimum start timestamp any active transaction observes; the
    /// latest commit timestamp when idle. Never regresses.
    watermark: AtomicU64,
    last_gc_unix: AtomicU64,
}

impl TxnManager {
    pub(crate) fn new(graph: Weak<GraphStore>) -> Self {
        Self {
            graph,
            timestamps: TimestampGenerator::new(),
            txn_ids: TransactionIdGenerator::new(),
            active_txns: SkipMap::new(),
            committed_txns: SkipMap::new(),
            commit_lock: Mutex::new(()),
            latest_commit_ts: AtomicU64::new(0),
            watermark: AtomicU64::new(0),
            last_gc_unix: AtomicU64::new(unix_now()),
        }
    }

    pub fn low_watermark(&self) -> Timestamp {
        Timestamp::with_ts(self.watermark.load(Ordering::Acquire))
    }

    pub fn latest_commit_ts(&self) -> Timestamp {
        Timestamp::with_ts(self.latest_commit_ts.load(Ordering::Acquire))
    }

    pub(crate) fn has_active(&self) -> bool {
        !self.active_txns.is_empty()
    }

    pub(crate) fn committed_backlog(&self) -> usize {
        self.committed_txns.len()
    }

    /// Begins a transaction, optionally at recovered identifiers. The
    /// generators are advanced past any supplied values so fresh
    /// transactions never collide with replayed ones.
    pub(crate) fn begin_transaction_at(
        &self,
        txn_id: Option<Timestamp>,
        start_ts: Option<Timestamp>,
        isolation_level: IsolationLevel,
        skip_wal: bool,
    ) -> StorageResult<Arc<GraphTransaction>> {
        let graph = self.graph.upgrade().ok_or_else(|| {
            StorageError::Transaction(TransactionError::InvalidState(
                "storage instance is gone".to_string(),
            ))
        })?;

        let txn_id = match txn_id {
            Some(id) => {
                self.txn_ids
                    .update_if_greater(id)
                    .map_err(TransactionError::Timestamp)?;
                id
            }
            None => self.txn_ids.next().map_err(TransactionError::Timestamp)?,
        };
        let start_ts = match start_ts {
            Some(ts) => {
                self.timestamps
                    .update_if_greater(ts)
                    .map_err(TransactionError::Timestamp)?;
                ts
            }
            None => self.timestamps.next().map_err(TransactionError::Timestamp)?,
        };

        // Snapshot creation quiesces the store; transaction creation
        // waits it out.
        let _snapshot_guard = graph.snapshot_manager.read_guard();

        let txn = Arc::new(GraphTransaction::new(
            Arc::downgrade(&graph),
            txn_id,
            start_ts,
            isolation_level,
        ));
        self.active_txns.insert(start_ts, txn.clone());
        self.update_watermark();

        if !skip_wal && graph.wal_manager.enabled() {
            graph.wal_manager.append(&WalEntry {
                lsn: graph.wal_manager.next_lsn(),
                txn_id,
                op: WalOp::TxnBegin {
                    start_ts,
                    isolation: isolation_level,
                },
            })?;
        }

        Ok(txn)
    }

    /// Removes a finished transaction from the active set, files it
    /// under its commit timestamp if it committed, and opportunistically
    /// collects garbage.
    pub(crate) fn unregister(&self, txn: &GraphTransaction) -> StorageResult<()> {
        let removed = self.active_txns.remove(&txn.start_ts());
        let Some(entry) = removed else {
            return Err(StorageError::Transaction(
                TransactionError::TransactionNotFound(format!("{:?}", txn.txn_id())),
            ));
        };
        if let Some(commit_ts) = txn.commit_ts() {
            if !txn.is_aborted() {
                self.committed_txns.insert(commit_ts, entry.value().clone());
            }
        }
        self.update_watermark();

        if let Some(graph) = self.graph.upgrade() {
            let interval = graph.config().gc_interval_sec;
            let due_by_backlog = self.committed_txns.len() >= GC_COMMITTED_THRESHOLD;
            let due_by_clock = interval > 0
                && unix_now().saturating_sub(self.last_gc_unix.load(Ordering::Acquire)) >= interval;
            if due_by_backlog || due_by_clock {
                if let Err(e) = self.collect(&graph) {
                    tracing::warn!(error = %e, "garbage collection failed");
                }
            }
        }
        Ok(())
    }

    fn update_watermark(&self) {
        let min_ts = self
            .active_txns
            .front()
            .map(|entry| entry.key().raw())
            .unwrap_or_else(|| self.latest_commit_ts.load(Ordering::Acquire))
            .max(self.watermark.load(Ordering::Acquire));
        self.watermark.store(min_ts, Ordering::SeqCst);
    }

    /// One collection cycle: release committed transactions below the
    /// watermark (their undo buffers own the version-chain tails),
    /// physically remove objects they tombstoned, and vacuum stale
    /// index entries.
    pub fn collect(&self, graph: &GraphStore) -> StorageResult<()> {
        let watermark = self.low_watermark();

        let mut expired = Vec::new();
        for entry in self.committed_txns.iter() {
            if entry.key().raw() > watermark.raw() {
                break;
            }
            expired.push(entry.value().clone());
        }

        for txn in &expired {
            let undo_entries = txn.undo_buffer.read().unwrap().clone();
            for undo in undo_entries {
                match undo.delta() {
                    // An undo that would recreate the object marks a
                    // deletion this transaction committed.
                    DeltaOp::RecreateVertex(v) => self.try_remove_vertex(graph, v.vid()),
                    DeltaOp::RecreateEdge(e) => self.try_remove_edge(graph, e.eid()),
                    _ => {}
                }
            }
        }

        for txn in expired {
            if let Some(commit_ts) = txn.commit_ts() {
                self.committed_txns.remove(&commit_ts);
            }
        }

        self.vacuum_indexes(graph);
        self.last_gc_unix.store(unix_now(), Ordering::SeqCst);
        Ok(())
    }

    /// Physically removes a vertex whose tombstone has sunk below the
    /// watermark. Index entries go first, then adjacency, then the
    /// object slot.
    fn try_remove_vertex(&self, graph: &GraphStore, vid: VertexId) {
        let Some(slot) = graph.vertices.get(&vid) else {
            return;
        };
        {
            let current = slot.value().chain.current.write().unwrap();
            if !current.data.is_tombstone() || !self.reclaimable(current.commit_ts) {
                return;
            }
            graph.indexes.purge_vertex(&current.data);
        }
        self.detach_adjacency(graph, vid);
        graph.vertices.remove(&vid);
    }

    fn try_remove_edge(&self, graph: &GraphStore, eid: EdgeId) {
        let Some(slot) = graph.edges.get(&eid) else {
            return;
        };
        let payload = {
            let current = slot.value().chain.current.read().unwrap();
            if !current.data.is_tombstone() || !self.reclaimable(current.commit_ts) {
                return;
            }
            current.data.clone()
        };
        graph.edges.remove(&eid);

        let src_neighbor = Neighbor::new(payload.etype(), payload.dst_id(), payload.eid());
        if let Some(adj) = graph.adjacency.get(&payload.src_id()) {
            adj.outgoing().remove(&src_neighbor);
        }
        let dst_neighbor = Neighbor::new(payload.etype(), payload.src_id(), payload.eid());
        if let Some(adj) = graph.adjacency.get(&payload.dst_id()) {
            adj.incoming().remove(&dst_neighbor);
        }
    }

    /// Unlinks a removed vertex from every neighbor's adjacency and
    /// drops its own container.
    fn detach_adjacency(&self, graph: &GraphStore, vid: VertexId) {
        let mut neighbor_updates = Vec::new();
        if let Some(container) = graph.adjacency.get(&vid) {
            for adj in container.incoming().iter() {
                let n = adj.value();
                neighbor_updates.push((
                    n.neighbor_id(),
                    Neighbor::new(n.etype(), vid, n.eid()),
                    true,
                ));
            }
            for adj in container.outgoing().iter() {
                let n = adj.value();
                neighbor_updates.push((
                    n.neighbor_id(),
                    Neighbor::new(n.etype(), vid, n.eid()),
                    false,
                ));
            }
        }
        for (neighbor_vid, entry, from_outgoing) in neighbor_updates {
            if let Some(adj) = graph.adjacency.get(&neighbor_vid) {
                if from_outgoing {
                    adj.outgoing().remove(&entry);
                } else {
                    adj.incoming().remove(&entry);
                }
            }
        }
        graph.adjacency.remove(&vid);
    }

    /// Drops index entries that no reader at or above the watermark can
    /// match anymore. Decisions are made under the object's version
    /// lock, which fences racing writers (writers insert their
    /// prospective entries under the same lock).
    fn vacuum_indexes(&self, graph: &GraphStore) {
        for entry in graph.indexes.label_entries_snapshot() {
            let Some(slot) = graph.vertices.get(&entry.vid) else {
                graph.indexes.remove_label_entry(entry.label, entry.vid);
                continue;
            };
            let current = slot.value().chain.current.write().unwrap();
            if !self.reclaimable(current.commit_ts) {
                continue;
            }
            let matches = !current.data.is_tombstone() && current.data.has_label(entry.label);
            if !matches {
                graph.indexes.remove_label_entry(entry.label, entry.vid);
            }
        }

        for entry in graph.indexes.property_entries_snapshot() {
            let Some(slot) = graph.vertices.get(&entry.vid) else {
                graph
                    .indexes
                    .remove_property_entry(entry.label, entry.property, &entry.value, entry.vid);
                continue;
            };
            let current = slot.value().chain.current.write().unwrap();
            if !self.reclaimable(current.commit_ts) {
                continue;
            }
            let matches = !current.data.is_tombstone()
                && current.data.has_label(entry.label)
                && current.data.property(entry.property) == Some(&entry.value);
            if !matches {
                graph
                    .indexes
                    .remove_property_entry(entry.label, entry.property, &entry.value, entry.vid);
            }
        }
    }
}

impl GraphTxnManager for TxnManager {
    type Transaction = GraphTransaction;
    type GraphContext = GraphStore;
    type Error = StorageError;

    fn begin_transaction(
        &self,
        isolation_level: IsolationLevel,
    ) -> Result<Arc<Self::Transaction>, Self::Error> {
        self.begin_transaction_at(None, None, isolation_level, false)
    }

    fn finish_transaction(&self, txn: &Self::Transaction) -> Result<(), Self::Error> {
        self.unregister(txn)
    }

    fn garbage_collect(&self, graph: &Self::GraphContext) -> Result<(), Self::Error> {
        self.collect(graph)
    }

    fn latest_commit_ts(&self) -> Timestamp {
        TxnManager::latest_commit_ts(self)
    }

    fn low_watermark(&self) -> Timestamp {
        TxnManager::low_watermark(self)
    }
}
