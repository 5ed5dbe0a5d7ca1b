//! Subscriber contracts.

use crate::{StateChangeInfo, ValidationError};
use estuary_types::{ChainScore, TransactionInfo};

/// Receives per-transaction validation failures.
///
/// The dispatcher inspector flushes the subscriber once per element, after
/// all of that element's statuses were delivered.
pub trait TransactionStatusSubscriber: Send + Sync {
    /// A transaction was rejected.
    fn notify_status(&self, info: &TransactionInfo, error: &ValidationError);

    /// All statuses for the current element were delivered.
    fn flush(&self) {}
}

/// Receives chain-tail movements.
///
/// For every committed sync the subscriber sees exactly one score change
/// followed by exactly one state change.
pub trait StateChangeSubscriber: Send + Sync {
    /// The local chain score moved; `score` is the new absolute value.
    fn notify_score_change(&self, score: ChainScore);

    /// The chain tail moved.
    fn notify_state_change(&self, info: &StateChangeInfo);
}
