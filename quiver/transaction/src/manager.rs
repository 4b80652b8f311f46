//! Transaction lifecycle coordination: admission, retirement, and
//! reclamation.

use std::sync::Arc;

use crate::transaction::Transaction;
use crate::{IsolationLevel, Timestamp};

/// Coordinates transactions over some storage context.
///
/// The manager owns the logical clock (timestamp and transaction-id
/// generation is explicit manager state, never a process-wide global),
/// tracks which transactions are active, and decides when versions left
/// behind by finished transactions can be reclaimed.
pub trait GraphTxnManager {
    type Transaction: Transaction + Send + Sync;
    type GraphContext;
    type Error;

    /// Admits a new transaction: draws its id and start timestamp,
    /// registers it as active, and refreshes the watermark.
    fn begin_transaction(
        &self,
        isolation_level: IsolationLevel,
    ) -> Result<Arc<Self::Transaction>, Self::Error>;

    /// Retires a finished transaction. Committed transactions stay
    /// filed under their commit timestamp until reclamation, because
    /// their undo buffers own the version-chain tails.
    fn finish_transaction(&self, txn: &Self::Transaction) -> Result<(), Self::Error>;

    /// The newest commit timestamp published so far.
    fn latest_commit_ts(&self) -> Timestamp;

    /// The minimum start timestamp any active transaction observes, or
    /// the latest commit timestamp when idle. Never regresses.
    fn low_watermark(&self) -> Timestamp;

    /// Whether a version stamped `commit_ts` has sunk below the
    /// watermark: committed, and no active transaction can still need
    /// an older state of its object.
    fn reclaimable(&self, commit_ts: Timestamp) -> bool {
        commit_ts.is_commit_ts() && commit_ts <= self.low_watermark()
    }

    /// Runs one reclamation cycle: release retired transactions below
    /// the watermark and the versions and tombstoned objects they keep
    /// alive.
    fn garbage_collect(&self, graph: &Self::GraphContext) -> Result<(), Self::Error>;
}
