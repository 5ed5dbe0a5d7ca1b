//! Server bootstrap for `estuaryd`.
//!
//! Boot order: configuration, logging, single-instance lock, node. Each
//! failure class maps to its own process exit code so operators and init
//! scripts can tell them apart.

use crate::{
    spawn_batch_transaction_task, DispatcherService, EstuaryConfig, NodeHooksBuilder,
    ServiceState,
};
use estuary_cache::{ChainCache, DifficultyInfo};
use estuary_chain::{
    ExecutionPlugins, LocalChainScore, StateChangeInfo, StateChangeSubscriber,
    TransactionStatusSubscriber, ValidationError,
};
use estuary_mempool::{MemoryUtCache, UtCacheConfig};
use estuary_storage::MemoryBlockStorage;
use estuary_types::{
    system_time_supplier, Block, BlockElement, ChainScore, Difficulty, Hash, Height, PublicKey,
    Timestamp, TransactionInfo,
};
use fs2::FileExt;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info, trace};
use tracing_subscriber::EnvFilter;

/// Configuration could not be loaded or validated.
pub const EXIT_CONFIG_ERROR: i32 = -1;
/// The node failed while booting or running.
pub const EXIT_RUN_ERROR: i32 = -2;
/// Another instance already holds the data directory.
pub const EXIT_INSTANCE_LOCK_ERROR: i32 = -3;

/// Load configuration, take the instance lock, and run the node until
/// interrupted. Returns the process exit code.
pub fn run(resources: &Path, default_log_filter: &str) -> i32 {
    // 1. Load and validate the configuration.
    let config = match EstuaryConfig::load_from_path(resources) {
        Ok(config) => config,
        Err(config_error) => {
            eprintln!("failed to load configuration: {config_error}");
            return EXIT_CONFIG_ERROR;
        }
    };

    // 2. Initialize logging.
    init_logging(default_log_filter);

    // 3. Check that no other instance owns the data directory.
    let _instance_lock = match acquire_instance_lock(&config) {
        Ok(lock) => lock,
        Err(lock_error) => {
            error!(%lock_error, "could not acquire instance lock");
            return EXIT_INSTANCE_LOCK_ERROR;
        }
    };

    // 4. Run until interrupted.
    match run_node(config) {
        Ok(()) => 0,
        Err(run_error) => {
            error!(%run_error, "node terminated abnormally");
            EXIT_RUN_ERROR
        }
    }
}

fn init_logging(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter.to_string()));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

fn acquire_instance_lock(config: &EstuaryConfig) -> anyhow::Result<std::fs::File> {
    std::fs::create_dir_all(&config.node.data_directory)?;
    let lock_path = config.node.data_directory.join("file.lock");
    let lock_file = std::fs::File::create(&lock_path)?;
    lock_file.try_lock_exclusive()?;
    Ok(lock_file)
}

fn run_node(config: EstuaryConfig) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async {
        let node = boot_node(config)?;
        info!("estuary node booted, waiting for termination signal");
        tokio::signal::ctrl_c().await?;
        info!("shutting down estuary node");
        drop(node);
        Ok(())
    })
}

/// The nemesis block every fresh chain starts from.
pub fn nemesis_block_element() -> BlockElement {
    BlockElement::new(Arc::new(Block {
        height: Height(1),
        timestamp: Timestamp(0),
        difficulty: Difficulty::MIN,
        previous_block_hash: Hash::ZERO,
        transactions_hash: Hash::ZERO,
        harvester: PublicKey::ZERO,
        transactions: Vec::new(),
    }))
}

struct RunningNode {
    service: DispatcherService,
    batch_task: tokio::task::JoinHandle<()>,
}

impl Drop for RunningNode {
    fn drop(&mut self) {
        self.batch_task.abort();
        self.service.shutdown();
    }
}

fn boot_node(config: EstuaryConfig) -> anyhow::Result<RunningNode> {
    let time_supplier = system_time_supplier();

    let nemesis = nemesis_block_element();
    let storage = Arc::new(MemoryBlockStorage::new(nemesis.clone()));
    let cache = Arc::new(ChainCache::new(config.chain.max_difficulty_blocks * 2));
    let score = Arc::new(LocalChainScore::new(ChainScore(u128::from(
        nemesis.block.difficulty.value(),
    ))));

    // Seed the cache: genesis balances plus the nemesis difficulty record.
    {
        let mut delta = cache.begin_delta();
        for account in &config.genesis.accounts {
            let bytes = hex::decode(&account.public_key)?;
            let key = PublicKey(
                bytes
                    .try_into()
                    .map_err(|_| anyhow::anyhow!("genesis public key must be 32 bytes"))?,
            );
            delta.accounts_mut().credit(key.address(), account.balance);
        }
        delta.difficulties_mut().insert(DifficultyInfo {
            height: nemesis.block.height,
            timestamp: nemesis.block.timestamp,
            difficulty: nemesis.block.difficulty,
        });
        cache.commit(delta);
        info!(
            accounts = config.genesis.accounts.len(),
            "seeded genesis state"
        );
    }

    let ut_cache = Arc::new(MemoryUtCache::new(UtCacheConfig {
        max_transactions: config.node.max_unconfirmed_transactions,
    }));

    let mut hooks_builder = NodeHooksBuilder::new();
    {
        let pool = Arc::clone(&ut_cache);
        hooks_builder.set_known_hash_predicate(Arc::new(move |_, hash| pool.contains(hash)));
    }
    hooks_builder.set_new_block_sink(Arc::new(|element, source| {
        info!(height = element.block.height.0, %source, "announcing block");
    }));
    hooks_builder.set_new_transactions_sink(Arc::new(|infos| {
        debug!(count = infos.len(), "announcing transactions");
    }));

    let batch_interval = config.node.batch_dispatch_interval();
    let state = ServiceState {
        config,
        time_supplier,
        cache,
        storage,
        ut_cache,
        score,
        plugins: ExecutionPlugins::transfer(),
        status_subscriber: Arc::new(LoggingStatusSubscriber),
        state_change_subscriber: Arc::new(LoggingStateChangeSubscriber),
    };
    let service = DispatcherService::register(state, hooks_builder)?;
    let batch_task = spawn_batch_transaction_task(service.batch_dispatcher(), batch_interval);

    Ok(RunningNode {
        service,
        batch_task,
    })
}

/// Logs per-transaction failures.
struct LoggingStatusSubscriber;

impl TransactionStatusSubscriber for LoggingStatusSubscriber {
    fn notify_status(&self, info: &TransactionInfo, validation_error: &ValidationError) {
        debug!(hash = %info.entity_hash, %validation_error, "transaction rejected");
    }

    fn flush(&self) {
        trace!("transaction statuses flushed");
    }
}

/// Logs chain-tail movements.
struct LoggingStateChangeSubscriber;

impl StateChangeSubscriber for LoggingStateChangeSubscriber {
    fn notify_score_change(&self, score: ChainScore) {
        info!(%score, "chain score changed");
    }

    fn notify_state_change(&self, change: &StateChangeInfo) {
        info!(
            height = change.height.0,
            score_delta = %change.score_delta,
            "chain state changed"
        );
    }
}
