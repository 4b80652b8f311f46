pub mod segment;

use std::path::Path;

pub use segment::{NameKind, WalEntry, WalManager, WalOp, WalSegment};

use crate::error::StorageResult;

/// A record that can be framed into a write-ahead log.
pub trait LogRecord: Clone + std::fmt::Debug {
    fn to_bytes(&self) -> StorageResult<Vec<u8>>;

    fn from_bytes(bytes: &[u8]) -> StorageResult<Self>
    where
        Self: Sized;
}

/// Append-only durable log of records, replayable in order.
pub trait StorageWal {
    type Record: LogRecord;

    type LogIterator: Iterator<Item = StorageResult<Self::Record>>;

    /// Open an existing log or create a new one at `path`.
    fn open<P: AsRef<Path>>(path: P) -> StorageResult<Self>
    where
        Self: Sized;

    /// Append a record to the internal buffer.
    fn append(&mut self, record: &Self::Record) -> StorageResult<()>;

    /// Flush the buffer and fsync so the data survives a crash.
    fn flush(&mut self) -> StorageResult<()>;

    /// Replay the log from the beginning.
    fn iter(&self) -> StorageResult<Self::LogIterator>;
}
