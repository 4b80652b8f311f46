use quiver_common::EdgeId;

use crate::error::StorageResult;
use crate::graph::{GraphStore, VersionedEdge, View};
use crate::model::Edge;
use crate::transaction::GraphTransaction;

type EdgeFilter<'a> = Box<dyn Fn(&Edge) -> bool + 'a>;

/// Scan over every edge slot, MVCC-filtered.
pub struct EdgeIter<'a> {
    inner: crossbeam_skiplist::map::Iter<'a, EdgeId, VersionedEdge>,
    txn: &'a GraphTransaction,
    view: View,
    filters: Vec<EdgeFilter<'a>>,
}

impl<'a> EdgeIter<'a> {
    pub(crate) fn new(graph: &'a GraphStore, txn: &'a GraphTransaction, view: View) -> Self {
        Self {
            inner: graph.edges.iter(),
            txn,
            view,
            filters: Vec::new(),
        }
    }

    /// Adds a filtering predicate; chainable.
    pub fn filter_by<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Edge) -> bool + 'a,
    {
        self.filters.push(Box::new(predicate));
        self
    }
}

impl Iterator for EdgeIter<'_> {
    type Item = StorageResult<Edge>;

    fn next(&mut self) -> Option<Self::Item> {
        for entry in self.inner.by_ref() {
            let Ok(edge) = entry.value().get_visible(self.txn, self.view) else {
                continue;
            };
            if self.filters.iter().all(|f| f(&edge)) {
                if self.txn.isolation_level().validates_reads() {
                    self.txn.edge_reads.insert(edge.eid());
                }
                return Some(Ok(edge));
            }
        }
        None
    }
}
