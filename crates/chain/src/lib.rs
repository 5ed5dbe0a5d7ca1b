//! Chain rules and the machinery the sync pipeline commits through.
//!
//! This crate holds everything between "a validated range of blocks" and
//! "committed chain state": chain-level configuration, the validator /
//! observer / publisher contracts supplied by the execution layer (plus the
//! built-in transfer implementations), single-block execution and rollback
//! against a cache delta, difficulty expectations and partial chain scores,
//! the stateful suffix processor, the function bundle the chain-sync
//! consumer drives, rollback accounting, and the updater that keeps the
//! unconfirmed-transaction pool consistent with the committed chain.

mod config;
mod executor;
mod handlers;
mod local_score;
mod plugins;
mod processor;
mod rollback;
mod scorer;
mod subscribers;
mod ut_updater;

pub use config::ChainConfig;
pub use executor::{execute_block, rollback_block};
pub use handlers::{
    BlockChainSyncHandlers, DifficultyCheckerFn, ProcessorFn, StateChangeFn, StateChangeInfo,
    TransactionsChangeFn, TransactionsChangeInfo, UndoBlockFn,
};
pub use local_score::LocalChainScore;
pub use plugins::{
    EntityObserver, ExecutionContext, ExecutionPlugins, NotificationPublisher, ObserverMode,
    StatefulValidator, StatelessValidator, TransferObserver, TransferPublisher,
    TransferStatefulValidator, TransferStatelessValidator, ValidationError,
};
pub use processor::create_sync_processor;
pub use rollback::{RollbackCounterType, RollbackInfo, RollbackResult};
pub use scorer::{calculate_difficulty, check_difficulties, partial_score};
pub use subscribers::{StateChangeSubscriber, TransactionStatusSubscriber};
pub use ut_updater::{UtUpdater, UtUpdaterThrottle};
