use std::io;

use quiver_common::{LabelId, PropertyId, VertexId};
use quiver_transaction::TimestampError;
use thiserror::Error;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Transaction error: {0}")]
    Transaction(#[from] TransactionError),
    #[error("Constraint violation: {0}")]
    Constraint(#[from] ConstraintViolation),
    #[error("Index definition error: {0}")]
    IndexDefinition(#[from] IndexDefinitionError),
    #[error("Replication error: {0}")]
    Replication(#[from] ReplicationError),
    #[error("VertexNotFoundError: {0}")]
    VertexNotFound(#[from] VertexNotFoundError),
    #[error("EdgeNotFoundError: {0}")]
    EdgeNotFound(#[from] EdgeNotFoundError),
    #[error("Vertex {0} still has edges; use detach delete")]
    VertexHasEdges(VertexId),
    #[error("Edge properties are disabled by configuration")]
    PropertiesOnEdgesDisabled,
    #[error("WAL error: {0}")]
    Wal(#[from] WalError),
    #[error("Snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),
    #[error("Recovery failure: {0}")]
    Recovery(#[from] RecoveryFailure),
    #[error("Not yet implemented: {0}")]
    NotYetImplemented(&'static str),
    #[error("Allocation failed: {0}")]
    Allocation(String),
}

#[derive(Error, Debug)]
pub enum TransactionError {
    /// Write-write conflict under first-writer-wins; the caller should
    /// retry the whole transaction.
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// A Serializable transaction read data that was modified before it
    /// committed.
    #[error("Read-write conflict: {0}")]
    ReadWriteConflict(String),
    #[error("Version not visible: {0}")]
    VersionNotVisible(String),
    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),
    #[error("Transaction already committed: {0}")]
    TransactionAlreadyCommitted(String),
    #[error("Invalid transaction state: {0}")]
    InvalidState(String),
    #[error("Timestamp error: {0}")]
    Timestamp(#[from] TimestampError),
}

#[derive(Error, Debug)]
pub enum ConstraintViolation {
    #[error("existence constraint violated: vertex {gid} has label {label} without property {property}")]
    Existence {
        label: LabelId,
        property: PropertyId,
        gid: VertexId,
    },
    #[error("unique constraint violated on label {label}, properties {properties:?} by vertex {gid}")]
    Unique {
        label: LabelId,
        properties: Vec<PropertyId>,
        gid: VertexId,
    },
}

#[derive(Error, Debug)]
pub enum IndexDefinitionError {
    #[error("{0} already exists")]
    AlreadyExists(String),
    #[error("{0} does not exist")]
    DoesNotExist(String),
}

#[derive(Error, Debug)]
pub enum ReplicationError {
    #[error("synchronous replica did not confirm within {timeout_ms} ms")]
    NotConfirmed { timeout_ms: u64 },
}

#[derive(Error, Debug)]
pub enum VertexNotFoundError {
    #[error("Vertex {0} not found")]
    NotFound(VertexId),
    #[error("Vertex {0} is not visible at this snapshot")]
    NotVisible(VertexId),
}

#[derive(Error, Debug)]
pub enum EdgeNotFoundError {
    #[error("Edge {0} not found")]
    NotFound(u64),
    #[error("Edge {0} is not visible at this snapshot")]
    NotVisible(u64),
}

#[derive(Error, Debug)]
pub enum WalError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Data corruption: checksum mismatch")]
    ChecksumMismatch,
    #[error("Invalid record format: {0}")]
    InvalidFormat(String),
    #[error("Record serialization failed: {0}")]
    SerializationFailed(String),
    #[error("Record deserialization failed: {0}")]
    DeserializationFailed(String),
}

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Data corruption: checksum mismatch")]
    ChecksumMismatch,
    #[error("Bad magic or unsupported format version")]
    InvalidFormat,
    #[error("Snapshot serialization failed: {0}")]
    SerializationFailed(String),
    #[error("Snapshot deserialization failed: {0}")]
    DeserializationFailed(String),
    #[error("Timeout waiting for active transactions to drain")]
    Timeout,
}

/// Snapshot or WAL state that cannot be replayed. Fatal: the engine
/// refuses to open.
#[derive(Error, Debug)]
#[error("{reason}")]
pub struct RecoveryFailure {
    pub reason: String,
}

impl RecoveryFailure {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}
