//! Transactional in-memory property-graph storage.
//!
//! The engine keeps a directed labeled multigraph of vertices and edges
//! under snapshot isolation: per-object version chains of undo deltas
//! give every transaction a stable view, first writer wins on
//! conflicting writes, and a write-ahead log plus periodic snapshots
//! make committed state crash-recoverable.

pub mod accessor;
pub mod config;
pub mod constraint;
pub mod delta;
pub mod error;
pub mod graph;
pub mod index;
pub mod iterators;
pub mod logging;
pub mod model;
pub mod snapshot;
pub mod transaction;
pub mod txn_manager;
pub mod wal;

pub use accessor::Accessor;
pub use config::{StorageConfig, StorageMode};
pub use error::{StorageError, StorageResult};
pub use graph::{GraphStore, View};
pub use iterators::Direction;
pub use model::{Edge, Neighbor, PropertyRecord, Vertex};
pub use quiver_common::{
    EdgeId, EdgeTypeId, Gid, LabelId, PropertyId, PropertyValue, VertexId,
};
pub use quiver_transaction::{IsolationLevel, Timestamp, TxnStatus};
pub use transaction::GraphTransaction;
