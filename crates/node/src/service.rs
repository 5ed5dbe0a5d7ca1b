//! Pipeline assembly.
//!
//! [`DispatcherService::register`] is where the two ingest pipelines come to
//! life: it builds the isolated validator pool, the UT updater, the rollback
//! accounting, both consumer chains, and the dispatchers, installs the range
//! consumer factories into the hooks, and registers every diagnostic
//! counter. The returned service owns the pieces in reverse-shutdown order:
//! dispatchers drain and join before the validator pool that feeds them goes
//! away.

use crate::config::EstuaryConfig;
use crate::{CounterRegistry, HooksError, NodeHooks, NodeHooksBuilder};
use estuary_cache::{CacheDelta, CacheView, ChainCache};
use estuary_chain::{
    check_difficulties, create_sync_processor, rollback_block, BlockChainSyncHandlers,
    ExecutionPlugins, LocalChainScore, RollbackCounterType, RollbackInfo, RollbackResult,
    StateChangeInfo, StateChangeSubscriber, TransactionStatusSubscriber, UtUpdater,
};
use estuary_consumers::{
    create_audit_consumer, create_block_address_extraction_consumer,
    create_block_chain_check_consumer, create_block_chain_sync_consumer,
    create_block_hash_calculator_consumer, create_block_hash_check_consumer,
    create_block_stateless_validation_consumer, create_new_block_consumer,
    create_new_transactions_consumer, create_transaction_address_extraction_consumer,
    create_transaction_hash_calculator_consumer, create_transaction_hash_check_consumer,
    create_transaction_stateless_validation_consumer, HashCheckOptions, NewTransactionsHandler,
    ParallelValidationPolicy,
};
use estuary_disruptor::{
    BatchRangeDispatcher, Consumer, ConsumerDispatcher, ConsumerDispatcherOptions, ConsumerInput,
    Inspector,
};
use estuary_mempool::MemoryUtCache;
use estuary_storage::BlockStorage;
use estuary_types::{
    AnnotatedBlockRange, AnnotatedTransactionRange, BlockElement, TimeSupplier, Timestamp,
};
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors from assembling the dispatcher service.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Hooks(#[from] HooksError),

    #[error("failed to build the validator pool: {0}")]
    ValidatorPool(String),

    #[error("failed to create audit directory {path}: {source}")]
    AuditDirectory {
        /// The directory that could not be created.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

/// Everything the assembly consumes, passed explicitly instead of through a
/// process-wide locator.
pub struct ServiceState {
    /// Full node configuration.
    pub config: EstuaryConfig,
    /// Network time source.
    pub time_supplier: TimeSupplier,
    /// The live composite cache.
    pub cache: Arc<ChainCache>,
    /// Block storage.
    pub storage: Arc<dyn BlockStorage>,
    /// The unconfirmed-transaction pool.
    pub ut_cache: Arc<MemoryUtCache>,
    /// The local chain score.
    pub score: Arc<LocalChainScore>,
    /// Execution-layer plugins.
    pub plugins: ExecutionPlugins,
    /// Per-transaction failure sink.
    pub status_subscriber: Arc<dyn TransactionStatusSubscriber>,
    /// Chain-tail movement sink.
    pub state_change_subscriber: Arc<dyn StateChangeSubscriber>,
}

/// The assembled ingest pipelines.
///
/// Field order is shutdown order: dispatchers (and the batcher feeding them)
/// drain before the UT updater and validator pool drop.
pub struct DispatcherService {
    hooks: NodeHooks,
    counters: CounterRegistry,
    batch_dispatcher: Arc<BatchRangeDispatcher>,
    block_dispatcher: Arc<ConsumerDispatcher>,
    transaction_dispatcher: Arc<ConsumerDispatcher>,
    rollback_info: Arc<RollbackInfo>,
    ut_updater: Arc<UtUpdater>,
    validator_pool: Arc<rayon::ThreadPool>,
}

impl DispatcherService {
    /// Assemble both pipelines.
    ///
    /// The builder must already carry the consumed hooks (known-hash
    /// predicate and both sinks); this call installs the range consumer
    /// factories, freezes the hooks, and wires every counter.
    pub fn register(
        state: ServiceState,
        mut hooks_builder: NodeHooksBuilder,
    ) -> Result<Self, ServiceError> {
        let node_config = state.config.node.clone();
        let chain_config = state.config.chain.clone();
        let boot_timestamp = (state.time_supplier)();

        let validator_pool = create_validator_pool(node_config.validator_threads)?;
        let validation_policy = ParallelValidationPolicy::new(Arc::clone(&validator_pool));

        let rollback_info = Arc::new(RollbackInfo::new(
            state.time_supplier.clone(),
            chain_config.half_rollback_duration(),
        ));

        let ut_updater = Arc::new(UtUpdater::new(
            Arc::clone(&state.ut_cache),
            Arc::clone(&state.cache),
            Arc::clone(&state.storage),
            state.plugins.stateful_validator.clone(),
            state.time_supplier.clone(),
            Arc::clone(&state.status_subscriber),
            UtUpdater::fill_throttle(node_config.ut_throttle_fill_ratio),
        ));
        {
            let updater = Arc::clone(&ut_updater);
            hooks_builder.add_transactions_change_handler(Arc::new(move |change| {
                updater.update_chain(
                    &change.added_transaction_hashes,
                    change.reverted_transaction_infos.clone(),
                );
            }));
        }

        let known_hash_predicate = hooks_builder
            .known_hash_predicate()
            .ok_or(HooksError::Missing("known_hash_predicate"))?;
        let new_block_sink = hooks_builder
            .new_block_sink()
            .ok_or(HooksError::Missing("new_block_sink"))?;
        let new_transactions_sink = hooks_builder
            .new_transactions_sink()
            .ok_or(HooksError::Missing("new_transactions_sink"))?;

        // Block pipeline.
        let sync_handlers =
            create_block_chain_sync_handlers(&state, &hooks_builder, &rollback_info);
        let mut block_consumers: Vec<Consumer> = vec![
            create_block_hash_calculator_consumer(),
            create_block_hash_check_consumer(
                state.time_supplier.clone(),
                hash_check_options(
                    node_config.short_lived_cache_block_duration(),
                    &node_config,
                ),
            ),
        ];
        if node_config.should_precompute_transaction_addresses {
            block_consumers.push(create_block_address_extraction_consumer(
                state.plugins.publisher.clone(),
            ));
        }
        block_consumers.push(create_block_chain_check_consumer(
            node_config.max_blocks_per_sync_attempt,
            chain_config.max_block_future_time(),
            state.time_supplier.clone(),
        ));
        block_consumers.push(create_block_stateless_validation_consumer(
            state.plugins.stateless_validator.clone(),
            validation_policy.clone(),
        ));
        block_consumers.push(create_block_chain_sync_consumer(
            Arc::clone(&state.cache),
            Arc::clone(&state.storage),
            Arc::clone(&rollback_info),
            chain_config.max_rollback_blocks,
            state.time_supplier.clone(),
            sync_handlers,
        ));
        block_consumers.push(create_new_block_consumer(new_block_sink));

        let block_dispatcher = create_dispatcher(
            &state,
            block_dispatcher_options(&node_config),
            block_consumers,
            boot_timestamp,
        )?;

        // Transaction pipeline.
        let mut transaction_consumers: Vec<Consumer> = vec![
            create_transaction_hash_calculator_consumer(),
            create_transaction_hash_check_consumer(
                state.time_supplier.clone(),
                hash_check_options(
                    node_config.short_lived_cache_transaction_duration(),
                    &node_config,
                ),
                known_hash_predicate,
            ),
        ];
        if node_config.should_precompute_transaction_addresses {
            transaction_consumers.push(create_transaction_address_extraction_consumer(
                state.plugins.publisher.clone(),
            ));
        }
        transaction_consumers.push(create_transaction_stateless_validation_consumer(
            state.plugins.stateless_validator.clone(),
            validation_policy,
            Arc::clone(&state.status_subscriber),
            state.time_supplier.clone(),
        ));
        // Forward first, then update the pool: a transaction this node
        // rejects statefully can still pass elsewhere, and a pool failure
        // must not suppress gossip.
        let new_transactions_handler: NewTransactionsHandler = {
            let updater = Arc::clone(&ut_updater);
            Box::new(move |infos| {
                new_transactions_sink(&infos);
                updater.update(infos);
            })
        };
        transaction_consumers.push(create_new_transactions_consumer(
            new_transactions_handler,
            state.time_supplier.clone(),
        ));

        let transaction_dispatcher = create_dispatcher(
            &state,
            transaction_dispatcher_options(&node_config),
            transaction_consumers,
            boot_timestamp,
        )?;
        let batch_dispatcher = Arc::new(BatchRangeDispatcher::new(Arc::clone(
            &transaction_dispatcher,
        )));

        // Install the range consumer factories.
        {
            let dispatcher = Arc::clone(&block_dispatcher);
            hooks_builder.set_block_range_consumer_factory(Box::new(move |source| {
                let dispatcher = Arc::clone(&dispatcher);
                Box::new(move |blocks, source_id| {
                    let input = ConsumerInput::from_block_range(AnnotatedBlockRange {
                        blocks,
                        source,
                        source_id,
                    });
                    if let Err(error) = dispatcher.process_element(input) {
                        warn!(%error, "dropping block range");
                    }
                })
            }));
        }
        {
            let dispatcher = Arc::clone(&block_dispatcher);
            hooks_builder.set_completion_aware_block_range_consumer_factory(Box::new(
                move |source| {
                    let dispatcher = Arc::clone(&dispatcher);
                    Box::new(move |blocks, source_id, completion| {
                        let input = ConsumerInput::from_block_range(AnnotatedBlockRange {
                            blocks,
                            source,
                            source_id,
                        });
                        dispatcher.process_element_with_completion(input, completion)
                    })
                },
            ));
        }
        {
            let batch = Arc::clone(&batch_dispatcher);
            hooks_builder.set_transaction_range_consumer_factory(Box::new(move |source| {
                let batch = Arc::clone(&batch);
                Box::new(move |transactions, source_id| {
                    batch.queue(AnnotatedTransactionRange {
                        transactions,
                        source,
                        source_id,
                    });
                })
            }));
        }

        let hooks = hooks_builder.build()?;

        let mut counters = CounterRegistry::new();
        add_dispatcher_counters(&mut counters, &block_dispatcher, "BLK");
        add_dispatcher_counters(&mut counters, &transaction_dispatcher, "TX");
        add_rollback_counter(
            &mut counters,
            &rollback_info,
            "RB COMMIT ALL",
            RollbackResult::Committed,
            RollbackCounterType::All,
        );
        add_rollback_counter(
            &mut counters,
            &rollback_info,
            "RB COMMIT RCT",
            RollbackResult::Committed,
            RollbackCounterType::Recent,
        );
        add_rollback_counter(
            &mut counters,
            &rollback_info,
            "RB IGNORE ALL",
            RollbackResult::Ignored,
            RollbackCounterType::All,
        );
        add_rollback_counter(
            &mut counters,
            &rollback_info,
            "RB IGNORE RCT",
            RollbackResult::Ignored,
            RollbackCounterType::Recent,
        );

        info!(
            block_ring = block_dispatcher.capacity(),
            transaction_ring = transaction_dispatcher.capacity(),
            "dispatcher service registered"
        );

        Ok(Self {
            hooks,
            counters,
            batch_dispatcher,
            block_dispatcher,
            transaction_dispatcher,
            rollback_info,
            ut_updater,
            validator_pool,
        })
    }

    /// The frozen hooks.
    pub fn hooks(&self) -> &NodeHooks {
        &self.hooks
    }

    /// The diagnostic counters.
    pub fn counters(&self) -> &CounterRegistry {
        &self.counters
    }

    /// The block dispatcher.
    pub fn block_dispatcher(&self) -> &Arc<ConsumerDispatcher> {
        &self.block_dispatcher
    }

    /// The transaction dispatcher.
    pub fn transaction_dispatcher(&self) -> &Arc<ConsumerDispatcher> {
        &self.transaction_dispatcher
    }

    /// The transaction range batcher.
    pub fn batch_dispatcher(&self) -> Arc<BatchRangeDispatcher> {
        Arc::clone(&self.batch_dispatcher)
    }

    /// The rollback counters.
    pub fn rollback_info(&self) -> &Arc<RollbackInfo> {
        &self.rollback_info
    }

    /// The UT updater.
    pub fn ut_updater(&self) -> &Arc<UtUpdater> {
        &self.ut_updater
    }

    /// Validator pool threads, for diagnostics.
    pub fn validator_threads(&self) -> usize {
        self.validator_pool.current_num_threads()
    }

    /// Stop accepting work and drain both pipelines. Idempotent.
    pub fn shutdown(&self) {
        self.block_dispatcher.shutdown();
        self.transaction_dispatcher.shutdown();
    }
}

impl Drop for DispatcherService {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn block_dispatcher_options(config: &crate::NodeConfig) -> ConsumerDispatcherOptions {
    let mut options =
        ConsumerDispatcherOptions::new("block dispatcher", config.block_disruptor_size);
    options.element_trace_interval = config.block_element_trace_interval;
    options.should_abort_when_full = config.should_abort_when_dispatcher_is_full;
    options
}

fn transaction_dispatcher_options(config: &crate::NodeConfig) -> ConsumerDispatcherOptions {
    let mut options = ConsumerDispatcherOptions::new(
        "transaction dispatcher",
        config.transaction_disruptor_size,
    );
    options.element_trace_interval = config.transaction_element_trace_interval;
    options.should_abort_when_full = config.should_abort_when_dispatcher_is_full;
    options
}

fn hash_check_options(
    cache_duration: Duration,
    config: &crate::NodeConfig,
) -> HashCheckOptions {
    HashCheckOptions {
        cache_duration,
        prune_interval: config.short_lived_cache_pruning_interval(),
        max_cache_size: config.short_lived_cache_max_size,
    }
}

fn create_validator_pool(threads: usize) -> Result<Arc<rayon::ThreadPool>, ServiceError> {
    let threads = if threads == 0 {
        std::thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(4)
            .saturating_sub(1)
            .max(1)
    } else {
        threads
    };
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(|i| format!("validator-{i}"))
        .build()
        .map(Arc::new)
        .map_err(|error| ServiceError::ValidatorPool(error.to_string()))
}

/// Build a dispatcher with the shared inspector and, when configured, the
/// audit consumer in front of everything else.
fn create_dispatcher(
    state: &ServiceState,
    options: ConsumerDispatcherOptions,
    mut consumers: Vec<Consumer>,
    boot_timestamp: Timestamp,
) -> Result<Arc<ConsumerDispatcher>, ServiceError> {
    let status_subscriber = Arc::clone(&state.status_subscriber);
    let inspector: Inspector = Box::new(move |_input, _result| {
        // Dropping the element afterwards reclaims its memory; the
        // inspector's other job is flushing buffered statuses.
        status_subscriber.flush();
    });

    if state.config.node.should_audit_dispatcher_inputs {
        let audit_path = state
            .config
            .node
            .data_directory
            .join("audit")
            .join(&options.name)
            .join(boot_timestamp.millis().to_string());
        debug!(path = %audit_path.display(), "enabling dispatcher auditing");
        std::fs::create_dir_all(&audit_path).map_err(|source| ServiceError::AuditDirectory {
            path: audit_path.clone(),
            source,
        })?;
        consumers.insert(0, create_audit_consumer(audit_path));
    }

    Ok(Arc::new(ConsumerDispatcher::new(
        options,
        consumers,
        inspector,
    )))
}

fn create_block_chain_sync_handlers(
    state: &ServiceState,
    hooks_builder: &NodeHooksBuilder,
    rollback_info: &Arc<RollbackInfo>,
) -> BlockChainSyncHandlers {
    let chain_config = state.config.chain.clone();
    let difficulty_rollback = Arc::clone(rollback_info);
    let undo_rollback = Arc::clone(rollback_info);
    let save_rollback = Arc::clone(rollback_info);
    let observer = state.plugins.observer.clone();
    let score = Arc::clone(&state.score);
    let subscriber = Arc::clone(&state.state_change_subscriber);

    BlockChainSyncHandlers {
        difficulty_checker: Box::new(move |elements: &[BlockElement], view: &CacheView| {
            difficulty_rollback.reset();
            check_difficulties(view.difficulties(), elements, &chain_config) == elements.len()
        }),
        undo_block: Box::new(move |element: &BlockElement, delta: &mut CacheDelta| {
            undo_rollback.increment();
            rollback_block(element, observer.as_ref(), delta)
        }),
        processor: create_sync_processor(&state.plugins),
        state_change: Box::new(move |change: &StateChangeInfo| {
            let new_score = score.apply(change.score_delta);
            // Subscribers see the new absolute score first, then the change.
            subscriber.notify_score_change(new_score);
            subscriber.notify_state_change(change);
            save_rollback.save();
        }),
        transactions_change: hooks_builder.aggregate_transactions_change(),
    }
}

fn add_dispatcher_counters(
    counters: &mut CounterRegistry,
    dispatcher: &Arc<ConsumerDispatcher>,
    prefix: &str,
) {
    let active = Arc::clone(dispatcher);
    counters.add(format!("{prefix} ACTIVE"), move || {
        active.num_active_elements()
    });
    let total = Arc::clone(dispatcher);
    counters.add(format!("{prefix} TOTAL"), move || total.num_total_elements());
}

fn add_rollback_counter(
    counters: &mut CounterRegistry,
    rollback_info: &Arc<RollbackInfo>,
    name: &str,
    result: RollbackResult,
    counter_type: RollbackCounterType,
) {
    let rollback_info = Arc::clone(rollback_info);
    counters.add(name.to_string(), move || {
        rollback_info.counter(result, counter_type)
    });
}
