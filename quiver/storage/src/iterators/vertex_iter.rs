//! Vertex iterators: full scan, label-index scan, and
//! label+property-index scan.
//!
//! All three are finite, single-pass, non-restartable lazy sequences.
//! Index-backed iterators re-check every prospective entry against the
//! reader's MVCC view, so stale or uncommitted entries are filtered
//! rather than trusted.

use quiver_common::{LabelId, PropertyId, PropertyValue, VertexId};

use crate::error::StorageResult;
use crate::graph::{GraphStore, VersionedVertex, View};
use crate::index::PropertyEntry;
use crate::model::Vertex;
use crate::transaction::GraphTransaction;

type VertexFilter<'a> = Box<dyn Fn(&Vertex) -> bool + 'a>;

/// Scan over every vertex slot, MVCC-filtered.
pub struct VertexIter<'a> {
    inner: crossbeam_skiplist::map::Iter<'a, VertexId, VersionedVertex>,
    txn: &'a GraphTransaction,
    view: View,
    filters: Vec<VertexFilter<'a>>,
}

impl<'a> VertexIter<'a> {
    pub(crate) fn new(graph: &'a GraphStore, txn: &'a GraphTransaction, view: View) -> Self {
        Self {
            inner: graph.vertices.iter(),
            txn,
            view,
            filters: Vec::new(),
        }
    }

    /// Adds a filtering predicate; chainable.
    pub fn filter_by<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Vertex) -> bool + 'a,
    {
        self.filters.push(Box::new(predicate));
        self
    }
}

impl Iterator for VertexIter<'_> {
    type Item = StorageResult<Vertex>;

    fn next(&mut self) -> Option<Self::Item> {
        for entry in self.inner.by_ref() {
            let Ok(vertex) = entry.value().get_visible(self.txn, self.view) else {
                continue;
            };
            if self.filters.iter().all(|f| f(&vertex)) {
                if self.txn.isolation_level().validates_reads() {
                    self.txn.vertex_reads.insert(vertex.vid());
                }
                return Some(Ok(vertex));
            }
        }
        None
    }
}

/// Label-index scan: candidates come from the index, visibility and
/// label membership from the reader's view.
pub struct LabelVertexIter<'a> {
    graph: &'a GraphStore,
    txn: &'a GraphTransaction,
    view: View,
    label: LabelId,
    candidates: Box<dyn Iterator<Item = VertexId> + 'a>,
}

impl<'a> LabelVertexIter<'a> {
    pub(crate) fn new(
        graph: &'a GraphStore,
        txn: &'a GraphTransaction,
        label: LabelId,
        view: View,
    ) -> Self {
        Self {
            graph,
            txn,
            view,
            label,
            candidates: Box::new(graph.indexes.scan_label(label)),
        }
    }
}

impl Iterator for LabelVertexIter<'_> {
    type Item = StorageResult<Vertex>;

    fn next(&mut self) -> Option<Self::Item> {
        for vid in self.candidates.by_ref() {
            let Some(slot) = self.graph.vertices.get(&vid) else {
                continue;
            };
            let Ok(vertex) = slot.value().get_visible(self.txn, self.view) else {
                continue;
            };
            if !vertex.has_label(self.label) {
                continue;
            }
            if self.txn.isolation_level().validates_reads() {
                self.txn.vertex_reads.insert(vid);
            }
            return Some(Ok(vertex));
        }
        None
    }
}

/// Label+property-index scan over a value range. An entry yields its
/// vertex only when the visible version still carries exactly the
/// indexed value, so each matching vertex comes out once.
pub struct PropertyVertexIter<'a> {
    graph: &'a GraphStore,
    txn: &'a GraphTransaction,
    view: View,
    candidates: Box<dyn Iterator<Item = PropertyEntry> + 'a>,
}

impl<'a> PropertyVertexIter<'a> {
    pub(crate) fn new(
        graph: &'a GraphStore,
        txn: &'a GraphTransaction,
        label: LabelId,
        property: PropertyId,
        lower: std::ops::Bound<PropertyValue>,
        upper: std::ops::Bound<PropertyValue>,
        view: View,
    ) -> Self {
        Self {
            graph,
            txn,
            view,
            candidates: graph.indexes.scan_property(label, property, lower, upper),
        }
    }
}

impl Iterator for PropertyVertexIter<'_> {
    type Item = StorageResult<Vertex>;

    fn next(&mut self) -> Option<Self::Item> {
        for entry in self.candidates.by_ref() {
            let Some(slot) = self.graph.vertices.get(&entry.vid) else {
                continue;
            };
            let Ok(vertex) = slot.value().get_visible(self.txn, self.view) else {
                continue;
            };
            if !vertex.has_label(entry.label) {
                continue;
            }
            if vertex.property(entry.property) != Some(&entry.value) {
                continue;
            }
            if self.txn.isolation_level().validates_reads() {
                self.txn.vertex_reads.insert(entry.vid);
            }
            return Some(Ok(vertex));
        }
        None
    }
}
