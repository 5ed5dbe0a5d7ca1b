//! The chain-sync handler bundle.
//!
//! Constructed once by the pipeline assembly and handed to the chain-sync
//! consumer; immutable afterwards. Keeping the pieces function-valued lets
//! the assembly weave rollback accounting and subscriber notification around
//! the chain rules without the consumer knowing about either.

use crate::ValidationError;
use estuary_cache::{CacheDelta, CacheView};
use estuary_types::{BlockElement, Hash, Height, ScoreDelta, TransactionInfo};
use std::sync::Arc;

/// Outcome of a committed sync, as reported to state-change subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateChangeInfo {
    /// Signed score movement produced by the commit.
    pub score_delta: ScoreDelta,
    /// New chain tail height.
    pub height: Height,
}

/// What a committed sync means for in-flight transactions.
#[derive(Debug, Clone, Default)]
pub struct TransactionsChangeInfo {
    /// Hashes confirmed by the newly committed suffix.
    pub added_transaction_hashes: Vec<Hash>,
    /// Transactions un-confirmed by the undone suffix.
    pub reverted_transaction_infos: Vec<TransactionInfo>,
}

/// Verifies the incoming blocks' difficulties against the pre-sync cache.
pub type DifficultyCheckerFn = Box<dyn Fn(&[BlockElement], &CacheView) -> bool + Send + Sync>;

/// Reverses one committed block against the working delta.
pub type UndoBlockFn =
    Box<dyn Fn(&BlockElement, &mut CacheDelta) -> Result<(), ValidationError> + Send + Sync>;

/// Statefully validates and executes the incoming suffix against the delta.
pub type ProcessorFn =
    Box<dyn Fn(&[BlockElement], &mut CacheDelta) -> Result<(), ValidationError> + Send + Sync>;

/// Applies the score delta and notifies state-change subscribers.
pub type StateChangeFn = Box<dyn Fn(&StateChangeInfo) + Send + Sync>;

/// Lets the unconfirmed-transaction pool react to a committed sync.
pub type TransactionsChangeFn = Arc<dyn Fn(&TransactionsChangeInfo) + Send + Sync>;

/// The five handlers driven by the chain-sync consumer.
pub struct BlockChainSyncHandlers {
    /// Difficulty verification; also resets pending rollback accounting.
    pub difficulty_checker: DifficultyCheckerFn,
    /// Suffix undo; also increments pending rollback accounting.
    pub undo_block: UndoBlockFn,
    /// Stateful validation and execution of the incoming suffix.
    pub processor: ProcessorFn,
    /// Score update plus subscriber notification; folds rollback accounting.
    pub state_change: StateChangeFn,
    /// Unconfirmed-pool revalidation hook.
    pub transactions_change: TransactionsChangeFn,
}
