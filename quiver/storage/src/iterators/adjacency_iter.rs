use std::ops::Bound;
use std::sync::Arc;

use crossbeam_skiplist::SkipSet;
use quiver_common::VertexId;

use super::Direction;
use crate::error::StorageResult;
use crate::graph::{GraphStore, View};
use crate::model::Neighbor;
use crate::transaction::GraphTransaction;

/// Iterates one vertex's adjacency in a given direction, yielding only
/// entries whose edge (and both endpoints) are visible to the
/// transaction.
///
/// The cursor re-seeks past the last yielded entry instead of holding a
/// skip-list position, so concurrent inserts and removals never
/// invalidate it.
pub struct AdjacencyIter<'a> {
    graph: &'a GraphStore,
    txn: &'a GraphTransaction,
    view: View,
    set: Option<Arc<SkipSet<Neighbor>>>,
    last: Option<Neighbor>,
}

impl<'a> AdjacencyIter<'a> {
    pub(crate) fn new(
        graph: &'a GraphStore,
        txn: &'a GraphTransaction,
        vid: VertexId,
        direction: Direction,
        view: View,
    ) -> Self {
        let set = graph.adjacency.get(&vid).map(|container| match direction {
            Direction::Incoming => container.incoming().clone(),
            Direction::Outgoing => container.outgoing().clone(),
            Direction::Both => {
                let merged = SkipSet::new();
                for neighbor in container.incoming().iter() {
                    merged.insert(*neighbor.value());
                }
                for neighbor in container.outgoing().iter() {
                    merged.insert(*neighbor.value());
                }
                Arc::new(merged)
            }
        });
        Self {
            graph,
            txn,
            view,
            set,
            last: None,
        }
    }
}

impl Iterator for AdjacencyIter<'_> {
    type Item = StorageResult<Neighbor>;

    fn next(&mut self) -> Option<Self::Item> {
        let set = self.set.as_ref()?;
        loop {
            let entry = match &self.last {
                None => set.front()?,
                Some(last) => set.lower_bound(Bound::Excluded(last))?,
            };
            let neighbor = *entry.value();
            self.last = Some(neighbor);

            let visible = self
                .graph
                .edges
                .get(&neighbor.eid())
                .map(|edge| edge.value().is_visible(self.graph, self.txn, self.view))
                .unwrap_or(false);
            if visible {
                return Some(Ok(neighbor));
            }
        }
    }
}
