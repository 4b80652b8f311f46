//! Shared identifier types, property values, and name interning for the
//! quiver storage engine.

pub mod ident;
pub mod types;
pub mod value;

pub use ident::NameIdMapper;
pub use types::{EdgeId, EdgeTypeId, Gid, LabelId, PropertyId, VertexId};
pub use value::PropertyValue;
