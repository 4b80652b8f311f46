use quiver_common::{LabelId, PropertyId, PropertyValue, VertexId};
use serde::{Deserialize, Serialize};

use super::properties::PropertyRecord;

/// A materialized vertex version: label set, property map, and the
/// logical-deletion flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vertex {
    pub vid: VertexId,
    pub labels: Vec<LabelId>,
    pub properties: PropertyRecord,
    pub is_tombstone: bool,
}

impl Vertex {
    pub fn new(vid: VertexId, labels: Vec<LabelId>, properties: PropertyRecord) -> Self {
        Vertex {
            vid,
            labels,
            properties,
            is_tombstone: false,
        }
    }

    /// A logically deleted copy. The payload is kept so the deletion
    /// can be undone and so GC can locate stale index entries.
    pub fn tombstone(vertex: Vertex) -> Self {
        Vertex {
            is_tombstone: true,
            ..vertex
        }
    }

    pub fn vid(&self) -> VertexId {
        self.vid
    }

    pub fn is_tombstone(&self) -> bool {
        self.is_tombstone
    }

    pub fn has_label(&self, label: LabelId) -> bool {
        self.labels.contains(&label)
    }

    /// Adds `label`; returns false if it was already present.
    pub fn add_label(&mut self, label: LabelId) -> bool {
        if self.has_label(label) {
            return false;
        }
        self.labels.push(label);
        true
    }

    /// Removes `label`; returns false if it was not present.
    pub fn remove_label(&mut self, label: LabelId) -> bool {
        match self.labels.iter().position(|l| *l == label) {
            Some(idx) => {
                self.labels.remove(idx);
                true
            }
            None => false,
        }
    }

    pub fn labels(&self) -> &[LabelId] {
        &self.labels
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
