pub mod edge;
pub mod properties;
pub mod vertex;

pub use edge::{Edge, Neighbor};
pub use properties::PropertyRecord;
pub use vertex::Vertex;
