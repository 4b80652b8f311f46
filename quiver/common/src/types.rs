use std::num::NonZeroU32;

/// Globally unique identifier for a vertex or an edge. Issued
/// monotonically by the owning storage instance and never reused.
pub type Gid = u64;

/// Internal identifier associated with a vertex.
pub type VertexId = u64;

/// Internal identifier associated with an edge.
pub type EdgeId = u64;

/// Internal identifier associated with a label.
///
/// [`NonZeroU32`] is used to enable some memory layout optimizations:
/// `Option<LabelId>` is guaranteed to have the same size as `LabelId`,
/// which is 4 bytes.
pub type LabelId = NonZeroU32;

/// Internal identifier associated with an edge type.
pub type EdgeTypeId = NonZeroU32;

/// Internal identifier associated with a property key.
pub type PropertyId = u32;
