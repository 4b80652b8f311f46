use quiver_common::{EdgeId, EdgeTypeId, PropertyId, PropertyValue, VertexId};
use serde::{Deserialize, Serialize};

use super::properties::PropertyRecord;

/// One entry in a vertex's adjacency list: the edge type, the vertex on
/// the other side, and the edge it goes through.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct Neighbor {
    etype: EdgeTypeId,
    neighbor_id: VertexId,
    eid: EdgeId,
}

impl Neighbor {
    pub fn new(etype: EdgeTypeId, neighbor_id: VertexId, eid: EdgeId) -> Self {
        Neighbor {
            etype,
            neighbor_id,
            eid,
        }
    }

    pub fn etype(&self) -> EdgeTypeId {
        self.etype
    }

    pub fn neighbor_id(&self) -> VertexId {
        self.neighbor_id
    }

    pub fn eid(&self) -> EdgeId {
        self.eid
    }
}

impl Ord for Neighbor {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.etype
            .cmp(&other.etype)
            .then_with(|| self.neighbor_id.cmp(&other.neighbor_id))
            .then_with(|| self.eid.cmp(&other.eid))
    }
}

impl PartialOrd for Neighbor {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// A materialized edge version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub eid: EdgeId,
    pub src_id: VertexId,
    pub dst_id: VertexId,
    pub etype: EdgeTypeId,
    pub properties: PropertyRecord,
    pub is_tombstone: bool,
}

impl Edge {
    pub fn new(
        eid: EdgeId,
        src_id: VertexId,
        dst_id: VertexId,
        etype: EdgeTypeId,
        properties: PropertyRecord,
    ) -> Self {
        Edge {
            eid,
            src_id,
            dst_id,
            etype,
            properties,
            is_tombstone: false,
        }
    }

    pub fn tombstone(edge: Edge) -> Self {
        Edge {
            is_tombstone: true,
            ..edge
        }
    }

    pub fn eid(&self) -> EdgeId {
        self.eid
    }

    pub fn src_id(&self) -> VertexId {
        self.src_id
    }

    pub fn dst_id(&self) -> VertexId {
        self.dst_id
    }

    pub fn etype(&self) -> EdgeTypeId {
        self.etype
    }

    pub fn is_tombstone(&self) -> bool {
        self.is_tombstone
    }

    pub fn property(&self, key: PropertyId) -> Option<&PropertyValue> {
        self.properties.get(key)
    }

    pub fn set_property(&mut self, key: PropertyId, value: PropertyValue) -> PropertyValue {
        self.properties.set(key, value)
    }

    pub fn properties(&self) -> &PropertyRecord {
        &self.properties
    }
}
