//! The per-transaction entry point.
//!
//! One [`Accessor`] wraps one transaction and is never shared across
//! threads. Reads take a [`View`]: `New` observes the transaction's own
//! uncommitted writes, `Old` reconstructs the committed state at the
//! start timestamp. Dropping an accessor whose transaction was neither
//! committed nor aborted rolls it back.

use std::ops::Bound;
use std::sync::Arc;

use quiver_common::{EdgeId, EdgeTypeId, LabelId, PropertyId, PropertyValue, VertexId};
use quiver_transaction::{IsolationLevel, Timestamp};

use crate::error::{StorageError, StorageResult};
use crate::graph::{GraphStore, View};
use crate::iterators::{AdjacencyIter, Direction, EdgeIter, LabelVertexIter, PropertyVertexIter, VertexIter};
use crate::model::{Edge, PropertyRecord, Vertex};
use crate::transaction::GraphTransaction;

pub struct Accessor {
    graph: Arc<GraphStore>,
    txn: Arc<GraphTransaction>,
}

impl GraphStore {
    /// Opens an accessor on a new transaction. Without an explicit
    /// isolation level the configured default applies.
    pub fn access(
        self: &Arc<Self>,
        isolation: Option<IsolationLevel>,
    ) -> StorageResult<Accessor> {
        let isolation = isolation.unwrap_or(self.config().isolation_level);
        let txn = self.begin_transaction(isolation)?;
        Ok(Accessor {
            graph: self.clone(),
            txn,
        })
    }
}

impl Accessor {
    pub fn start_ts(&self) -> Timestamp {
        self.txn.start_ts()
    }

    pub fn isolation_level(&self) -> IsolationLevel {
        self.txn.isolation_level()
    }

    pub fn txn(&self) -> &Arc<GraphTransaction> {
        &self.txn
    }

    // ===== vertex operations =====

    /// Creates a vertex with a freshly allocated gid, no labels, and no
    /// properties. Visible to this transaction immediately, to others
    /// only after commit.
    pub fn create_vertex(&self) -> StorageResult<Vertex> {
        self.create_vertex_with(Vec::new(), PropertyRecord::new())
    }

    /// Creates a vertex with an initial label set and property map.
    pub fn create_vertex_with(
        &self,
        labels: Vec<LabelId>,
        properties: PropertyRecord,
    ) -> StorageResult<Vertex> {
        let gid = self.graph.allocate_gid();
        let vertex = Vertex::new(gid, labels, properties);
        self.graph.create_vertex(&self.txn, vertex.clone())?;
        Ok(vertex)
    }

    /// Looks a vertex up by gid under the requested view. `None` when
    /// it does not exist or is not visible.
    pub fn find_vertex(&self, gid: VertexId, view: View) -> StorageResult<Option<Vertex>> {
        match self.graph.get_vertex_with_view(&self.txn, gid, view) {
            Ok(vertex) => Ok(Some(vertex)),
            Err(StorageError::VertexNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Deletes a vertex that has no visible edges.
    pub fn delete_vertex(&self, gid: VertexId) -> StorageResult<Vertex> {
        self.graph
            .delete_vertex(&self.txn, gid, false)
            .map(|(vertex, _)| vertex)
    }

    /// Deletes a vertex together with all its visible edges.
    pub fn detach_delete_vertex(&self, gid: VertexId) -> StorageResult<(Vertex, Vec<Edge>)> {
        self.graph.delete_vertex(&self.txn, gid, true)
    }

    pub fn set_vertex_property(
        &self,
        gid: VertexId,
        key: PropertyId,
        value: PropertyValue,
    ) -> StorageResult<PropertyValue> {
        self.graph.set_vertex_property(&self.txn, gid, key, value)
    }

    pub fn add_label(&self, gid: VertexId, label: LabelId) -> StorageResult<bool> {
        self.graph.add_label(&self.txn, gid, label)
    }

    pub fn remove_label(&self, gid: VertexId, label: LabelId) -> StorageResult<bool> {
        self.graph.remove_label(&self.txn, gid, label)
    }

    // ===== edge operations =====

    /// Creates an edge from `from` to `to` with a freshly allocated
    /// gid.
    pub fn create_edge(
        &self,
        from: VertexId,
        to: VertexId,
        etype: EdgeTypeId,
    ) -> StorageResult<Edge> {
        let gid = self.graph.allocate_gid();
        let edge = Edge::new(gid, from, to, etype, PropertyRecord::new());
        self.graph.create_edge(&self.txn, edge.clone())?;
        Ok(edge)
    }

    pub fn find_edge(&self, gid: EdgeId, view: View) -> StorageResult<Option<Edge>> {
        match self.graph.get_edge_with_view(&self.txn, gid, view) {
            Ok(edge) => Ok(Some(edge)),
            Err(StorageError::EdgeNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn delete_edge(&self, gid: EdgeId) -> StorageResult<Edge> {
        self.graph.delete_edge(&self.txn, gid)
    }

    pub fn set_edge_property(
        &self,
        gid: EdgeId,
        key: PropertyId,
        value: PropertyValue,
    ) -> StorageResult<PropertyValue> {
        self.graph.set_edge_property(&self.txn, gid, key, value)
    }

    // ===== iteration =====

    /// All visible vertices. Finite, single-pass, not restartable.
    pub fn vertices(&self, view: View) -> VertexIter<'_> {
        VertexIter::new(&self.graph, &self.txn, view)
    }

    /// Visible vertices carrying `label`, via the label index when one
    /// exists.
    pub fn vertices_by_label(
        &self,
        label: LabelId,
        view: View,
    ) -> Box<dyn Iterator<Item = StorageResult<Vertex>> + '_> {
        if self.graph.indexes.has_label_index(label) {
            Box::new(LabelVertexIter::new(&self.graph, &self.txn, label, view))
        } else {
            Box::new(
                VertexIter::new(&self.graph, &self.txn, view)
                    .filter_by(move |v| v.has_label(label)),
            )
        }
    }

    /// Visible vertices carrying `label` and any value for `property`.
    pub fn vertices_by_label_property(
        &self,
        label: LabelId,
        property: PropertyId,
        view: View,
    ) -> Box<dyn Iterator<Item = StorageResult<Vertex>> + '_> {
        self.vertices_by_label_property_range(label, property, Bound::Unbounded, Bound::Unbounded, view)
    }

    /// Equality lookup on a label+property index.
    pub fn vertices_by_label_property_value(
        &self,
        label: LabelId,
        property: PropertyId,
        value: &PropertyValue,
        view: View,
    ) -> Box<dyn Iterator<Item = StorageResult<Vertex>> + '_> {
        self.vertices_by_label_property_range(
            label,
            property,
            Bound::Included(value.clone()),
            Bound::Included(value.clone()),
            view,
        )
    }

    /// Range scan on a label+property index with inclusive or exclusive
    /// bounds. Falls back to a filtered full scan when the index does
    /// not exist.
    pub fn vertices_by_label_property_range(
        &self,
        label: LabelId,
        property: PropertyId,
        lower: Bound<PropertyValue>,
        upper: Bound<PropertyValue>,
        view: View,
    ) -> Box<dyn Iterator<Item = StorageResult<Vertex>> + '_> {
        if self.graph.indexes.has_property_index(label, property) {
            Box::new(PropertyVertexIter::new(
                &self.graph,
                &self.txn,
                label,
                property,
                lower,
                upper,
                view,
            ))
        } else {
            let within = move |value: &PropertyValue| {
                if !value.is_indexable() {
                    return false;
                }
                let lower_ok = match &lower {
                    Bound::Included(bound) => value >= bound,
                    Bound::Excluded(bound) => value > bound,
                    Bound::Unbounded => true,
                };
                let upper_ok = match &upper {
                    Bound::Included(bound) => value <= bound,
                    Bound::Excluded(bound) => value < bound,
                    Bound::Unbounded => true,
                };
                lower_ok && upper_ok
            };
            Box::new(
                VertexIter::new(&self.graph, &self.txn, view).filter_by(move |v| {
                    v.has_label(label) && v.property(property).map(&within).unwrap_or(false)
                }),
            )
        }
    }

    /// All visible edges.
    pub fn edges(&self, view: View) -> EdgeIter<'_> {
        EdgeIter::new(&self.graph, &self.txn, view)
    }

    /// Adjacency of one vertex in the given direction.
    pub fn adjacency(&self, gid: VertexId, direction: Direction, view: View) -> AdjacencyIter<'_> {
        AdjacencyIter::new(&self.graph, &self.txn, gid, direction, view)
    }

    pub fn out_edges(&self, gid: VertexId, view: View) -> AdjacencyIter<'_> {
        self.adjacency(gid, Direction::Outgoing, view)
    }

    pub fn in_edges(&self, gid: VertexId, view: View) -> AdjacencyIter<'_> {
        self.adjacency(gid, Direction::Incoming, view)
    }

    // ===== cardinalities =====

    /// Vertex-slot count from the object store; not MVCC-exact.
    pub fn approximate_vertex_count(&self) -> u64 {
        self.graph.approximate_vertex_count()
    }

    pub fn approximate_label_count(&self, label: LabelId) -> u64 {
        self.graph.approximate_label_count(label)
    }

    pub fn approximate_label_property_count(&self, label: LabelId, property: PropertyId) -> u64 {
        self.graph.approximate_label_property_count(label, property)
    }

    // ===== name interning passthrough =====

    pub fn label_id(&self, name: &str) -> StorageResult<LabelId> {
        self.graph.label_id(name)
    }

    pub fn property_id(&self, name: &str) -> StorageResult<PropertyId> {
        self.graph.property_id(name)
    }

    pub fn edge_type_id(&self, name: &str) -> StorageResult<EdgeTypeId> {
        self.graph.edge_type_id(name)
    }

    // ===== lifecycle =====

    /// Commits the transaction. A failed commit aborts it as a side
    /// effect, so the accessor is consumed either way.
    pub fn commit(self) -> StorageResult<Timestamp> {
        self.txn.commit()
    }

    /// Commits at a caller-supplied commit timestamp (replication or
    /// external coordination).
    pub fn commit_at(self, desired_commit_ts: Timestamp) -> StorageResult<Timestamp> {
        self.txn.commit_at(Some(desired_commit_ts), false)
    }

    /// Rolls the transaction back.
    pub fn abort(self) -> StorageResult<()> {
        self.txn.abort()
    }
}

impl Drop for Accessor {
    fn drop(&mut self) {
        // Guaranteed release: an accessor abandoned without commit or
        // abort rolls its transaction back.
        if !self.txn.is_handled() {
            let _ = self.txn.abort();
        }
    }
}
