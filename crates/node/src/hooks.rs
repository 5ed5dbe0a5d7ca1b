//! The node's ingest hooks.
//!
//! Other subsystems interact with the pipelines only through these typed
//! entry points: range-consumer factories installed by the dispatcher
//! assembly, and sinks/predicates the assembly consumes. The builder is
//! write-once: every field is set exactly once while the node boots, then
//! frozen into an immutable [`NodeHooks`] record before the pipelines start,
//! so steady-state code never checks whether a hook exists.

use estuary_chain::{TransactionsChangeFn, TransactionsChangeInfo};
use estuary_consumers::{KnownHashPredicate, NewBlockSink};
use estuary_disruptor::{CompletionHandler, DispatcherError, ElementId};
use estuary_types::{Block, InputSource, NodeId, Transaction, TransactionInfo};
use std::sync::Arc;
use thiserror::Error;

/// Fire-and-forget block range submission.
pub type BlockRangeConsumer = Box<dyn Fn(Vec<Arc<Block>>, Option<NodeId>) + Send + Sync>;

/// Produces a [`BlockRangeConsumer`] bound to an input source.
pub type BlockRangeConsumerFactory =
    Box<dyn Fn(InputSource) -> BlockRangeConsumer + Send + Sync>;

/// Block range submission with a completion callback.
pub type CompletionAwareBlockRangeConsumer = Box<
    dyn Fn(Vec<Arc<Block>>, Option<NodeId>, CompletionHandler) -> Result<ElementId, DispatcherError>
        + Send
        + Sync,
>;

/// Produces a [`CompletionAwareBlockRangeConsumer`] bound to an input source.
pub type CompletionAwareBlockRangeConsumerFactory =
    Box<dyn Fn(InputSource) -> CompletionAwareBlockRangeConsumer + Send + Sync>;

/// Fire-and-forget transaction range submission (batched).
pub type TransactionRangeConsumer = Box<dyn Fn(Vec<Arc<Transaction>>, Option<NodeId>) + Send + Sync>;

/// Produces a [`TransactionRangeConsumer`] bound to an input source.
pub type TransactionRangeConsumerFactory =
    Box<dyn Fn(InputSource) -> TransactionRangeConsumer + Send + Sync>;

/// Downstream propagation of freshly accepted transactions.
pub type NewTransactionsSink = Arc<dyn Fn(&[TransactionInfo]) + Send + Sync>;

/// Errors from freezing the hooks.
#[derive(Debug, Error)]
pub enum HooksError {
    #[error("hook {0} was never set")]
    Missing(&'static str),
}

/// Write-once collection point for the node's hooks.
#[derive(Default)]
pub struct NodeHooksBuilder {
    block_range_consumer_factory: Option<BlockRangeConsumerFactory>,
    completion_aware_block_range_consumer_factory:
        Option<CompletionAwareBlockRangeConsumerFactory>,
    transaction_range_consumer_factory: Option<TransactionRangeConsumerFactory>,
    known_hash_predicate: Option<KnownHashPredicate>,
    new_block_sink: Option<NewBlockSink>,
    new_transactions_sink: Option<NewTransactionsSink>,
    transactions_change_handlers: Vec<TransactionsChangeFn>,
}

impl NodeHooksBuilder {
    /// An empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the fire-and-forget block range factory.
    ///
    /// # Panics
    ///
    /// Panics when the hook is set twice; hooks are write-once.
    pub fn set_block_range_consumer_factory(&mut self, factory: BlockRangeConsumerFactory) {
        assert!(
            self.block_range_consumer_factory.is_none(),
            "block range consumer factory already set"
        );
        self.block_range_consumer_factory = Some(factory);
    }

    /// Install the completion-aware block range factory.
    ///
    /// # Panics
    ///
    /// Panics when the hook is set twice.
    pub fn set_completion_aware_block_range_consumer_factory(
        &mut self,
        factory: CompletionAwareBlockRangeConsumerFactory,
    ) {
        assert!(
            self.completion_aware_block_range_consumer_factory.is_none(),
            "completion-aware block range consumer factory already set"
        );
        self.completion_aware_block_range_consumer_factory = Some(factory);
    }

    /// Install the transaction range factory.
    ///
    /// # Panics
    ///
    /// Panics when the hook is set twice.
    pub fn set_transaction_range_consumer_factory(
        &mut self,
        factory: TransactionRangeConsumerFactory,
    ) {
        assert!(
            self.transaction_range_consumer_factory.is_none(),
            "transaction range consumer factory already set"
        );
        self.transaction_range_consumer_factory = Some(factory);
    }

    /// Install the known-hash predicate.
    ///
    /// # Panics
    ///
    /// Panics when the hook is set twice.
    pub fn set_known_hash_predicate(&mut self, predicate: KnownHashPredicate) {
        assert!(
            self.known_hash_predicate.is_none(),
            "known hash predicate already set"
        );
        self.known_hash_predicate = Some(predicate);
    }

    /// Install the new-block sink.
    ///
    /// # Panics
    ///
    /// Panics when the hook is set twice.
    pub fn set_new_block_sink(&mut self, sink: NewBlockSink) {
        assert!(self.new_block_sink.is_none(), "new block sink already set");
        self.new_block_sink = Some(sink);
    }

    /// Install the new-transactions sink.
    ///
    /// # Panics
    ///
    /// Panics when the hook is set twice.
    pub fn set_new_transactions_sink(&mut self, sink: NewTransactionsSink) {
        assert!(
            self.new_transactions_sink.is_none(),
            "new transactions sink already set"
        );
        self.new_transactions_sink = Some(sink);
    }

    /// Append a transactions-change handler; unlike the other hooks this one
    /// aggregates all registrations.
    pub fn add_transactions_change_handler(&mut self, handler: TransactionsChangeFn) {
        self.transactions_change_handlers.push(handler);
    }

    /// The known-hash predicate, when already set.
    pub fn known_hash_predicate(&self) -> Option<KnownHashPredicate> {
        self.known_hash_predicate.clone()
    }

    /// The new-block sink, when already set.
    pub fn new_block_sink(&self) -> Option<NewBlockSink> {
        self.new_block_sink.clone()
    }

    /// The new-transactions sink, when already set.
    pub fn new_transactions_sink(&self) -> Option<NewTransactionsSink> {
        self.new_transactions_sink.clone()
    }

    /// One handler fanning out to every transactions-change registration so
    /// far.
    pub fn aggregate_transactions_change(&self) -> TransactionsChangeFn {
        let handlers: Vec<TransactionsChangeFn> = self.transactions_change_handlers.clone();
        Arc::new(move |info: &TransactionsChangeInfo| {
            for handler in &handlers {
                handler(info);
            }
        })
    }

    /// Freeze into the immutable record, failing on any unset hook.
    pub fn build(self) -> Result<NodeHooks, HooksError> {
        let transactions_change_handler = self.aggregate_transactions_change();
        Ok(NodeHooks {
            block_range_consumer_factory: self
                .block_range_consumer_factory
                .ok_or(HooksError::Missing("block_range_consumer_factory"))?,
            completion_aware_block_range_consumer_factory: self
                .completion_aware_block_range_consumer_factory
                .ok_or(HooksError::Missing(
                    "completion_aware_block_range_consumer_factory",
                ))?,
            transaction_range_consumer_factory: self
                .transaction_range_consumer_factory
                .ok_or(HooksError::Missing("transaction_range_consumer_factory"))?,
            known_hash_predicate: self
                .known_hash_predicate
                .ok_or(HooksError::Missing("known_hash_predicate"))?,
            new_block_sink: self
                .new_block_sink
                .ok_or(HooksError::Missing("new_block_sink"))?,
            new_transactions_sink: self
                .new_transactions_sink
                .ok_or(HooksError::Missing("new_transactions_sink"))?,
            transactions_change_handler,
        })
    }
}

/// The frozen hook record; every entry is guaranteed present.
pub struct NodeHooks {
    block_range_consumer_factory: BlockRangeConsumerFactory,
    completion_aware_block_range_consumer_factory: CompletionAwareBlockRangeConsumerFactory,
    transaction_range_consumer_factory: TransactionRangeConsumerFactory,
    known_hash_predicate: KnownHashPredicate,
    new_block_sink: NewBlockSink,
    new_transactions_sink: NewTransactionsSink,
    transactions_change_handler: TransactionsChangeFn,
}

impl NodeHooks {
    /// A block range consumer for the given source.
    pub fn block_range_consumer(&self, source: InputSource) -> BlockRangeConsumer {
        (self.block_range_consumer_factory)(source)
    }

    /// A completion-aware block range consumer for the given source.
    pub fn completion_aware_block_range_consumer(
        &self,
        source: InputSource,
    ) -> CompletionAwareBlockRangeConsumer {
        (self.completion_aware_block_range_consumer_factory)(source)
    }

    /// A transaction range consumer for the given source.
    pub fn transaction_range_consumer(&self, source: InputSource) -> TransactionRangeConsumer {
        (self.transaction_range_consumer_factory)(source)
    }

    /// The known-hash predicate.
    pub fn known_hash_predicate(&self) -> KnownHashPredicate {
        self.known_hash_predicate.clone()
    }

    /// The new-block sink.
    pub fn new_block_sink(&self) -> NewBlockSink {
        self.new_block_sink.clone()
    }

    /// The new-transactions sink.
    pub fn new_transactions_sink(&self) -> NewTransactionsSink {
        self.new_transactions_sink.clone()
    }

    /// The aggregated transactions-change handler.
    pub fn transactions_change_handler(&self) -> TransactionsChangeFn {
        self.transactions_change_handler.clone()
    }
}
