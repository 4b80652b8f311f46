//! The transaction interface and its isolation vocabulary.

use serde::{Deserialize, Serialize};

use crate::timestamp::Timestamp;

/// Isolation level of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum IsolationLevel {
    /// Reads observe a consistent snapshot taken at the start
    /// timestamp; write-write conflicts abort one side.
    #[default]
    Snapshot,
    /// Reads observe the latest committed version at the time of the
    /// read.
    ReadCommitted,
    /// Reads observe the current version, committed or not.
    ReadUncommitted,
    /// Snapshot reads plus read-set validation at commit.
    Serializable,
}

impl IsolationLevel {
    /// The boundary a reader at this level compares commit timestamps
    /// against: the transaction's own snapshot for the snapshot-based
    /// levels, the whole committed history otherwise.
    pub fn read_boundary(&self, start_ts: Timestamp) -> Timestamp {
        match self {
            IsolationLevel::Snapshot | IsolationLevel::Serializable => start_ts,
            IsolationLevel::ReadCommitted | IsolationLevel::ReadUncommitted => {
                Timestamp::max_commit_ts()
            }
        }
    }

    /// Whether reads take the current version as-is, skipping the
    /// visibility walk entirely.
    pub fn reads_uncommitted(&self) -> bool {
        matches!(self, IsolationLevel::ReadUncommitted)
    }

    /// Whether commit must re-validate everything the transaction read.
    pub fn validates_reads(&self) -> bool {
        matches!(self, IsolationLevel::Serializable)
    }
}

/// Where a transaction stands in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnStatus {
    Active,
    /// Committed at the carried timestamp.
    Committed(Timestamp),
    Aborted,
}

/// Operations every transaction supports, independent of the backing
/// store.
pub trait Transaction: Send + Sync {
    type Error;

    /// The in-progress marker stamped on this transaction's versions.
    fn txn_id(&self) -> Timestamp;

    /// The snapshot boundary assigned when the transaction began.
    fn start_ts(&self) -> Timestamp;

    fn isolation_level(&self) -> IsolationLevel;

    /// Current lifecycle state; `Committed` carries the commit
    /// timestamp.
    fn status(&self) -> TxnStatus;

    /// The boundary this transaction's reads compare commit timestamps
    /// against.
    fn read_boundary(&self) -> Timestamp {
        self.isolation_level().read_boundary(self.start_ts())
    }

    /// Commit, returning the commit timestamp on success.
    fn commit(&self) -> Result<Timestamp, Self::Error>;

    /// Abort and roll back all changes.
    fn abort(&self) -> Result<(), Self::Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_levels_bound_reads_at_the_start_timestamp() {
        let start = Timestamp::with_ts(7);
        assert_eq!(IsolationLevel::Snapshot.read_boundary(start), start);
        assert_eq!(IsolationLevel::Serializable.read_boundary(start), start);
        assert_eq!(
            IsolationLevel::ReadCommitted.read_boundary(start),
            Timestamp::max_commit_ts()
        );
        assert_eq!(
            IsolationLevel::ReadUncommitted.read_boundary(start),
            Timestamp::max_commit_ts()
        );
    }

    #[test]
    fn level_predicates() {
        assert!(IsolationLevel::ReadUncommitted.reads_uncommitted());
        assert!(!IsolationLevel::Snapshot.reads_uncommitted());
        assert!(IsolationLevel::Serializable.validates_reads());
        assert!(!IsolationLevel::ReadCommitted.validates_reads());
    }
}
