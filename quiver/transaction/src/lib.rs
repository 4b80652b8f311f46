//! Common transaction infrastructure for the quiver storage engine:
//! timestamps, transaction and manager traits, and the undo-log entries
//! that per-object version chains are built from.

use std::sync::{Arc, Weak};

pub mod error;
pub mod manager;
pub mod timestamp;
pub mod transaction;

pub use error::TimestampError;
pub use manager::GraphTxnManager;
pub use timestamp::{Timestamp, TimestampGenerator, TransactionIdGenerator};

pub use transaction::{IsolationLevel, Transaction, TxnStatus};

/// An undo record in an object's version chain.
///
/// `T` is the delta type the storage layer records. Applying the delta
/// to the state above this entry yields the older state whose commit
/// timestamp the entry carries. Entries are owned (`Arc`) by the
/// writing transaction's undo buffer; chains reference them weakly, so
/// an entry stays reachable exactly as long as its transaction is
/// retained or some in-flight reader has upgraded the pointer.
#[derive(Debug, Clone)]
pub struct UndoEntry<T> {
    delta: T,
    /// Commit timestamp of the state applying `delta` reconstructs.
    restores_ts: Timestamp,
    /// Next-older entry in the owning object's chain.
    older: UndoPtr<T>,
}

/// Weak pointer linking undo entries into per-object chains.
pub type UndoPtr<T> = Weak<UndoEntry<T>>;

impl<T> UndoEntry<T> {
    /// Allocates an entry layered above `older`, ready to be installed
    /// at an object's chain head.
    pub fn link(delta: T, restores_ts: Timestamp, older: UndoPtr<T>) -> Arc<Self> {
        Arc::new(Self {
            delta,
            restores_ts,
            older,
        })
    }

    pub fn delta(&self) -> &T {
        &self.delta
    }

    /// The commit timestamp of the state this entry reconstructs.
    pub fn restores_ts(&self) -> Timestamp {
        self.restores_ts
    }

    /// Whether the reconstructed state is committed and inside the
    /// snapshot bounded by `boundary`. A visibility walk stops at the
    /// first entry that settles.
    pub fn settles_below(&self, boundary: Timestamp) -> bool {
        self.restores_ts.is_commit_ts() && self.restores_ts <= boundary
    }

    pub fn older(&self) -> UndoPtr<T> {
        self.older.clone()
    }

    /// Walks the still-reachable suffix of a chain, newest first.
    pub fn chain_from(head: &UndoPtr<T>) -> UndoChain<T> {
        UndoChain { next: head.clone() }
    }
}

/// Iterator over the live entries of an undo chain, newest first.
/// Stops at the first entry that garbage collection has reclaimed;
/// anything below it is, by the watermark invariant, invisible to every
/// active transaction.
pub struct UndoChain<T> {
    next: UndoPtr<T>,
}

impl<T> Iterator for UndoChain<T> {
    type Item = Arc<UndoEntry<T>>;

    fn next(&mut self) -> Option<Self::Item> {
        let entry = self.next.upgrade()?;
        self.next = entry.older();
        Some(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_walks_newest_first_and_stops_at_reclaimed_tails() {
        let oldest = UndoEntry::link(1u32, Timestamp::with_ts(1), Weak::new());
        let middle = UndoEntry::link(2u32, Timestamp::with_ts(2), Arc::downgrade(&oldest));
        let newest = UndoEntry::link(3u32, Timestamp::with_ts(3), Arc::downgrade(&middle));

        let head = Arc::downgrade(&newest);
        let deltas: Vec<u32> = UndoEntry::chain_from(&head).map(|e| *e.delta()).collect();
        assert_eq!(deltas, vec![3, 2, 1]);

        // Dropping the middle entry severs the chain there.
        drop(middle);
        let deltas: Vec<u32> = UndoEntry::chain_from(&head).map(|e| *e.delta()).collect();
        assert_eq!(deltas, vec![3]);
    }

    #[test]
    fn settling_requires_a_committed_restore_stamp() {
        let boundary = Timestamp::with_ts(10);
        let committed = UndoEntry::link((), Timestamp::with_ts(5), Weak::new());
        assert!(committed.settles_below(boundary));

        let newer = UndoEntry::link((), Timestamp::with_ts(11), Weak::new());
        assert!(!newer.settles_below(boundary));

        let in_progress = UndoEntry::link((), Timestamp::with_ts(Timestamp::TXN_ID_BIT + 1), Weak::new());
        assert!(!in_progress.settles_below(boundary));
    }
}
