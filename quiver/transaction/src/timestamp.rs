//! Logical timestamps for MVCC version stamping.
//!
//! A [`Timestamp`] is a 64-bit value living in one of two disjoint
//! domains. Commit timestamps occupy the lower half of the value space;
//! transaction ids have the high bit set. While a transaction runs, its
//! versions are stamped with the transaction id, and the high bit is
//! the sole source of truth for "is this version committed yet".

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::TimestampError;

/// A logical clock value: either a commit timestamp or an in-progress
/// transaction id, distinguished by the high bit.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Timestamp(u64);

impl Timestamp {
    /// The in-progress marker. Values at or above this bit are
    /// transaction ids; values below it are commit timestamps.
    pub const TXN_ID_BIT: u64 = 1 << 63;

    pub fn with_ts(raw: u64) -> Self {
        Self(raw)
    }

    /// The greatest representable commit timestamp.
    pub fn max_commit_ts() -> Self {
        Self(u64::MAX & !Self::TXN_ID_BIT)
    }

    /// Whether this value is an in-progress transaction id.
    pub fn is_txn_id(&self) -> bool {
        self.0 & Self::TXN_ID_BIT != 0
    }

    /// Whether this value is a committed timestamp.
    pub fn is_commit_ts(&self) -> bool {
        self.0 & Self::TXN_ID_BIT == 0
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Issues start and commit timestamps from a shared monotone counter.
///
/// Owned by the engine's transaction manager and passed around
/// explicitly; there is deliberately no process-wide instance, so two
/// engines in one process never share a clock.
#[derive(Debug)]
pub struct TimestampGenerator {
    counter: AtomicU64,
}

impl TimestampGenerator {
    pub fn new() -> Self {
        Self::with_start(1)
    }

    pub fn with_start(start: u64) -> Self {
        Self {
            counter: AtomicU64::new(start),
        }
    }

    /// Draws the next timestamp.
    pub fn next(&self) -> Result<Timestamp, TimestampError> {
        let mut cur = self.counter.load(Ordering::SeqCst);
        loop {
            if cur >= Timestamp::max_commit_ts().raw() {
                return Err(TimestampError::CommitTsOverflow(cur));
            }
            match self
                .counter
                .compare_exchange_weak(cur, cur + 1, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return Ok(Timestamp::with_ts(cur)),
                Err(actual) => cur = actual,
            }
        }
    }

    /// The next timestamp that would be issued, without issuing it.
    pub fn current(&self) -> Timestamp {
        Timestamp::with_ts(self.counter.load(Ordering::SeqCst))
    }

    /// Advances the counter past `ts` if it is ahead. Used when
    /// replaying recovered timestamps.
    pub fn update_if_greater(&self, ts: Timestamp) -> Result<(), TimestampError> {
        if !ts.is_commit_ts() {
            return Err(TimestampError::WrongDomainCommit(ts.raw()));
        }
        if ts.raw() >= Timestamp::max_commit_ts().raw() {
            return Err(TimestampError::CommitTsOverflow(ts.raw()));
        }
        self.counter.fetch_max(ts.raw() + 1, Ordering::SeqCst);
        Ok(())
    }
}

impl Default for TimestampGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Issues transaction ids in the high-bit domain.
#[derive(Debug)]
pub struct TransactionIdGenerator {
    counter: AtomicU64,
}

impl TransactionIdGenerator {
    pub fn new() -> Self {
        Self {
            counter: AtomicU64::new(Timestamp::TXN_ID_BIT + 1),
        }
    }

    pub fn next(&self) -> Result<Timestamp, TimestampError> {
        let mut cur = self.counter.load(Ordering::SeqCst);
        loop {
            if cur == u64::MAX {
                return Err(TimestampError::TxnIdOverflow(cur));
            }
            match self
                .counter
                .compare_exchange_weak(cur, cur + 1, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return Ok(Timestamp::with_ts(cur)),
                Err(actual) => cur = actual,
            }
        }
    }

    /// Advances the counter past `txn_id` if it is ahead. Used when
    /// replaying recovered transaction ids.
    pub fn update_if_greater(&self, txn_id: Timestamp) -> Result<(), TimestampError> {
        if !txn_id.is_txn_id() {
            return Err(TimestampError::WrongDomainTxnId(txn_id.raw()));
        }
        if txn_id.raw() == u64::MAX {
            return Err(TimestampError::TxnIdOverflow(txn_id.raw()));
        }
        self.counter.fetch_max(txn_id.raw() + 1, Ordering::SeqCst);
        Ok(())
    }
}

impl Default for TransactionIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_detection() {
        let commit_ts = Timestamp::with_ts(100);
        assert!(commit_ts.is_commit_ts());
        assert!(!commit_ts.is_txn_id());

        let txn_id = Timestamp::with_ts(Timestamp::TXN_ID_BIT + 100);
        assert!(txn_id.is_txn_id());
        assert!(!txn_id.is_commit_ts());
    }

    #[test]
    fn timestamps_are_monotone() {
        let generator = TimestampGenerator::new();
        let a = generator.next().unwrap();
        let b = generator.next().unwrap();
        assert!(b > a);
        assert_eq!(generator.current().raw(), b.raw() + 1);
    }

    #[test]
    fn txn_ids_live_in_the_high_domain() {
        let generator = TransactionIdGenerator::new();
        let a = generator.next().unwrap();
        let b = generator.next().unwrap();
        assert!(a.is_txn_id());
        assert!(b.is_txn_id());
        assert!(b > a);
    }

    #[test]
    fn update_if_greater_never_regresses() {
        let generator = TimestampGenerator::new();
        generator
            .update_if_greater(Timestamp::with_ts(100))
            .unwrap();
        assert_eq!(generator.current().raw(), 101);
        generator.update_if_greater(Timestamp::with_ts(50)).unwrap();
        assert_eq!(generator.current().raw(), 101);

        let err = generator.update_if_greater(Timestamp::with_ts(Timestamp::TXN_ID_BIT + 1));
        assert!(err.is_err());
    }
}
