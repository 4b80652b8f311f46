//! Undo deltas.
//!
//! Every mutation records a [`DeltaOp`] describing how to recover the
//! state that preceded it. Applying a delta reverts exactly one atomic
//! change; the visibility walk applies them newest-first to rebuild the
//! version a reader is entitled to see, and abort applies a
//! transaction's deltas in reverse to erase it.

use quiver_common::{EdgeId, LabelId, PropertyId, PropertyValue, VertexId};

use crate::model::{Edge, Vertex};

/// An undo record. The variant names describe the undo action, not the
/// mutation that produced it.
#[derive(Debug, Clone)]
pub enum DeltaOp {
    /// Prior state: the vertex did not exist (undo of a create).
    DeleteVertex(VertexId),
    /// Prior state: the vertex existed with this payload (undo of a
    /// delete).
    RecreateVertex(Vertex),
    /// Prior state: the edge did not exist.
    DeleteEdge(EdgeId),
    /// Prior state: the edge existed with this payload.
    RecreateEdge(Edge),
    /// Prior value of one vertex property; `Null` means the key was
    /// absent.
    SetVertexProperty(VertexId, PropertyId, PropertyValue),
    /// Prior value of one edge property.
    SetEdgeProperty(EdgeId, PropertyId, PropertyValue),
    /// The undo re-adds this label (it was removed).
    AddLabel(VertexId, LabelId),
    /// The undo removes this label (it was added).
    RemoveLabel(VertexId, LabelId),
}

impl DeltaOp {
    /// The vertex this delta belongs to, if it is a vertex delta.
    pub fn vertex_id(&self) -> Option<VertexId> {
        match self {
            DeltaOp::DeleteVertex(vid)
            | DeltaOp::SetVertexProperty(vid, _, _)
            | DeltaOp::AddLabel(vid, _)
            | DeltaOp::RemoveLabel(vid, _) => Some(*vid),
            DeltaOp::RecreateVertex(v) => Some(v.vid()),
            _ => None,
        }
    }

    /// The edge this delta belongs to, if it is an edge delta.
    pub fn edge_id(&self) -> Option<EdgeId> {
        match self {
            DeltaOp::DeleteEdge(eid) | DeltaOp::SetEdgeProperty(eid, _, _) => Some(*eid),
            DeltaOp::RecreateEdge(e) => Some(e.eid()),
            _ => None,
        }
    }
}

/// Applies a vertex delta to a materialized vertex.
pub(crate) fn apply_vertex_delta(vertex: &mut Vertex, delta: &DeltaOp) {
    match delta {
        DeltaOp::RecreateVertex(original) => *vertex = original.clone(),
        DeltaOp::DeleteVertex(_) => vertex.is_tombstone = true,
        DeltaOp::SetVertexProperty(_, key, previous) => {
            vertex.set_property(*key, previous.clone());
        }
        DeltaOp::AddLabel(_, label) => {
            vertex.add_label(*label);
        }
        DeltaOp::RemoveLabel(_, label) => {
            vertex.remove_label(*label);
        }
        _ => unreachable!("edge delta applied to a vertex chain"),
    }
}

/// Applies an edge delta to a materialized edge.
pub(crate) fn apply_edge_delta(edge: &mut Edge, delta: &DeltaOp) {
    match delta {
        DeltaOp::RecreateEdge(original) => *edge = original.clone(),
        DeltaOp::DeleteEdge(_) => edge.is_tombstone = true,
        DeltaOp::SetEdgeProperty(_, key, previous) => {
            edge.set_property(*key, previous.clone());
        }
        _ => unreachable!("vertex delta applied to an edge chain"),
    }
}
