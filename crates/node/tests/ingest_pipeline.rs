//! End-to-end scenarios through the fully assembled ingest pipelines.

use estuary_cache::{ChainCache, DifficultyInfo};
use estuary_chain::{
    ExecutionPlugins, LocalChainScore, StateChangeInfo, StateChangeSubscriber,
    TransactionStatusSubscriber, ValidationError,
};
use estuary_disruptor::{AbortReason, CompletionResult, CompletionStatus};
use estuary_mempool::{MemoryUtCache, UtCacheConfig};
use estuary_node::{server, DispatcherService, EstuaryConfig, NodeHooksBuilder, ServiceState};
use estuary_storage::{BlockStorage, MemoryBlockStorage};
use estuary_types::{
    Block, ChainScore, Difficulty, Hash, Height, InputSource, NodeId, PublicKey, TimeSupplier,
    Timestamp, Transaction, TransactionInfo,
};
use parking_lot::Mutex;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Fixed "now" for every test; block timestamps stay far in the past.
const NOW_MS: u64 = 1_000_000_000;

/// Genesis-funded signing key.
const SIGNER: PublicKey = PublicKey([1u8; 32]);

#[derive(Default)]
struct RecordingStatus {
    rejected: Mutex<Vec<(Hash, ValidationError)>>,
    flushes: Mutex<u64>,
}

impl TransactionStatusSubscriber for RecordingStatus {
    fn notify_status(&self, info: &TransactionInfo, error: &ValidationError) {
        self.rejected.lock().push((info.entity_hash, error.clone()));
    }

    fn flush(&self) {
        *self.flushes.lock() += 1;
    }
}

/// Records score and state changes in arrival order, so the
/// score-before-state ordering is observable.
#[derive(Default)]
struct RecordingStateChanges {
    events: Mutex<Vec<StateChangeEvent>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum StateChangeEvent {
    Score(ChainScore),
    State(StateChangeInfo),
}

impl StateChangeSubscriber for RecordingStateChanges {
    fn notify_score_change(&self, score: ChainScore) {
        self.events.lock().push(StateChangeEvent::Score(score));
    }

    fn notify_state_change(&self, info: &StateChangeInfo) {
        self.events.lock().push(StateChangeEvent::State(*info));
    }
}

struct TestNode {
    service: DispatcherService,
    cache: Arc<ChainCache>,
    storage: Arc<MemoryBlockStorage>,
    ut_cache: Arc<MemoryUtCache>,
    score: Arc<LocalChainScore>,
    status: Arc<RecordingStatus>,
    state_changes: Arc<RecordingStateChanges>,
    announced_transactions: Arc<Mutex<Vec<Hash>>>,
}

fn build_node(configure: impl FnOnce(&mut EstuaryConfig)) -> TestNode {
    let mut config = EstuaryConfig::default();
    configure(&mut config);

    let time_supplier: TimeSupplier = Arc::new(|| Timestamp(NOW_MS));
    let nemesis = server::nemesis_block_element();
    let storage = Arc::new(MemoryBlockStorage::new(nemesis.clone()));
    let cache = Arc::new(ChainCache::new(config.chain.max_difficulty_blocks * 2));
    {
        let mut delta = cache.begin_delta();
        delta.accounts_mut().credit(SIGNER.address(), 1_000_000);
        delta.difficulties_mut().insert(DifficultyInfo {
            height: nemesis.block.height,
            timestamp: nemesis.block.timestamp,
            difficulty: nemesis.block.difficulty,
        });
        cache.commit(delta);
    }
    let score = Arc::new(LocalChainScore::new(ChainScore(u128::from(
        nemesis.block.difficulty.value(),
    ))));
    let ut_cache = Arc::new(MemoryUtCache::new(UtCacheConfig {
        max_transactions: config.node.max_unconfirmed_transactions,
    }));

    let status = Arc::new(RecordingStatus::default());
    let state_changes = Arc::new(RecordingStateChanges::default());
    let announced_transactions: Arc<Mutex<Vec<Hash>>> = Arc::new(Mutex::new(Vec::new()));

    let mut hooks_builder = NodeHooksBuilder::new();
    {
        let pool = Arc::clone(&ut_cache);
        hooks_builder.set_known_hash_predicate(Arc::new(move |_, hash| pool.contains(hash)));
    }
    hooks_builder.set_new_block_sink(Arc::new(|_, _| {}));
    {
        let announced = Arc::clone(&announced_transactions);
        hooks_builder.set_new_transactions_sink(Arc::new(move |infos| {
            announced
                .lock()
                .extend(infos.iter().map(|info| info.entity_hash));
        }));
    }

    let state = ServiceState {
        config,
        time_supplier,
        cache: Arc::clone(&cache),
        storage: Arc::clone(&storage) as Arc<dyn BlockStorage>,
        ut_cache: Arc::clone(&ut_cache),
        score: Arc::clone(&score),
        plugins: ExecutionPlugins::transfer(),
        status_subscriber: Arc::clone(&status) as Arc<dyn TransactionStatusSubscriber>,
        state_change_subscriber:
            Arc::clone(&state_changes) as Arc<dyn StateChangeSubscriber>,
    };
    let service = DispatcherService::register(state, hooks_builder).unwrap();

    TestNode {
        service,
        cache,
        storage,
        ut_cache,
        score,
        status,
        state_changes,
        announced_transactions,
    }
}

/// 15-second spacing keeps the difficulty expectation flat at the nemesis
/// difficulty, so every honestly built block passes the difficulty check.
fn block_at(height: u64, parent: Hash, harvester: PublicKey, transactions: Vec<Arc<Transaction>>) -> Arc<Block> {
    Arc::new(Block {
        height: Height(height),
        timestamp: Timestamp((height - 1) * 15_000),
        difficulty: Difficulty::MIN,
        previous_block_hash: parent,
        transactions_hash: Block::merkle_root(&transactions),
        harvester,
        transactions,
    })
}

/// A chain of empty blocks from `first_height` to `last_height` inclusive.
fn chain(
    first_height: u64,
    last_height: u64,
    parent: Hash,
    harvester: PublicKey,
) -> Vec<Arc<Block>> {
    let mut blocks = Vec::new();
    let mut parent = parent;
    for height in first_height..=last_height {
        let block = block_at(height, parent, harvester, Vec::new());
        parent = block.hash();
        blocks.push(block);
    }
    blocks
}

fn transfer(amount: u64) -> Arc<Transaction> {
    Arc::new(Transaction {
        signer: SIGNER,
        recipient: PublicKey([2u8; 32]).address(),
        amount,
        fee: 5,
        deadline: Timestamp(NOW_MS + 3_600_000),
    })
}

impl TestNode {
    fn submit_blocks(&self, blocks: Vec<Arc<Block>>) -> CompletionResult {
        let consumer = self
            .service
            .hooks()
            .completion_aware_block_range_consumer(InputSource::RemotePull);
        let (done_tx, done_rx) = mpsc::channel();
        consumer(
            blocks,
            Some(NodeId(7)),
            Box::new(move |_id, result| done_tx.send(*result).unwrap()),
        )
        .unwrap();
        done_rx
            .recv_timeout(Duration::from_secs(10))
            .expect("block range completes")
    }

    fn submit_transactions(&self, transactions: Vec<Arc<Transaction>>) {
        let consumer = self
            .service
            .hooks()
            .transaction_range_consumer(InputSource::RemotePush);
        consumer(transactions, Some(NodeId(9)));
        // The periodic task is the only submission site; drive it directly.
        self.service.batch_dispatcher().dispatch();
    }

    fn wait_until(&self, what: &str, predicate: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while Instant::now() < deadline {
            if predicate() {
                return;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        panic!("timed out waiting for {what}");
    }

    fn counter(&self, name: &str) -> u64 {
        self.service.counters().value(name).unwrap()
    }

    fn chain_tip(&self) -> Height {
        self.storage.chain_height()
    }
}

#[test]
fn simple_extension_commits_and_updates_score() {
    let node = build_node(|_| {});
    let nemesis_hash = node.storage.load_block_element(Height(1)).unwrap().entity_hash;

    let result = node.submit_blocks(chain(2, 6, nemesis_hash, PublicKey([3u8; 32])));
    assert_eq!(result.status, CompletionStatus::Normal);

    assert_eq!(node.chain_tip(), Height(6));
    let expected_score = ChainScore(u128::from(Difficulty::MIN.value()) * 6);
    assert_eq!(node.score.get(), expected_score);
    assert_eq!(node.counter("RB COMMIT ALL"), 0);
    assert_eq!(node.counter("RB IGNORE ALL"), 0);
    assert_eq!(node.counter("BLK TOTAL"), 1);

    // Exactly one score change, then one state change.
    let events = node.state_changes.events.lock();
    assert_eq!(
        *events,
        vec![
            StateChangeEvent::Score(expected_score),
            StateChangeEvent::State(StateChangeInfo {
                score_delta: estuary_types::ScoreDelta(5 * i128::from(Difficulty::MIN.value())),
                height: Height(6),
            }),
        ]
    );
}

#[test]
fn equal_score_fork_is_rejected_neutrally() {
    let node = build_node(|_| {});
    let nemesis_hash = node.storage.load_block_element(Height(1)).unwrap().entity_hash;

    let committed = chain(2, 4, nemesis_hash, PublicKey([3u8; 32]));
    assert_eq!(
        node.submit_blocks(committed.clone()).status,
        CompletionStatus::Normal
    );
    let score_before = node.score.get();

    // Same-length fork attaching at height 2: identical cumulative score.
    let fork = chain(3, 4, committed[0].hash(), PublicKey([4u8; 32]));
    let result = node.submit_blocks(fork);
    assert_eq!(result.status, CompletionStatus::Aborted);
    assert_eq!(result.reason, Some(AbortReason::LowerChainScore));

    assert_eq!(node.chain_tip(), Height(4));
    assert_eq!(node.score.get(), score_before);
    assert_eq!(node.counter("RB IGNORE ALL"), 1);
    assert_eq!(node.counter("RB COMMIT ALL"), 0);
}

#[test]
fn deeper_fork_commits_and_reverts_transactions_to_the_pool() {
    let node = build_node(|_| {});
    let nemesis_hash = node.storage.load_block_element(Height(1)).unwrap().entity_hash;

    // Chain to height 5; block 3 confirms a transfer.
    let harvester = PublicKey([3u8; 32]);
    let reverted = transfer(50);
    let block2 = block_at(2, nemesis_hash, harvester, Vec::new());
    let block3 = block_at(3, block2.hash(), harvester, vec![Arc::clone(&reverted)]);
    let block4 = block_at(4, block3.hash(), harvester, Vec::new());
    let block5 = block_at(5, block4.hash(), harvester, Vec::new());
    assert_eq!(
        node.submit_blocks(vec![block2.clone(), block3, block4, block5])
            .status,
        CompletionStatus::Normal
    );
    let score_before = node.score.get();

    // Fork [3..6] with one more block: undoes 3, commits 4.
    let fork = chain(3, 6, block2.hash(), PublicKey([4u8; 32]));
    assert_eq!(node.submit_blocks(fork).status, CompletionStatus::Normal);

    assert_eq!(node.chain_tip(), Height(6));
    assert_eq!(node.counter("RB COMMIT ALL"), 3);
    assert_eq!(node.counter("RB COMMIT RCT"), 3);
    assert_eq!(
        node.score.get(),
        score_before.apply(estuary_types::ScoreDelta(i128::from(
            Difficulty::MIN.value()
        )))
    );

    // The undone transfer went back to the unconfirmed pool, revalidated
    // against the new chain state, with no failure status emitted.
    node.wait_until("reverted transaction returns to the pool", || {
        node.ut_cache.contains(&reverted.hash())
    });
    assert!(node.status.rejected.lock().is_empty());

    // Its effects are unwound from the cache.
    assert_eq!(
        node.cache.read().accounts().balance(&SIGNER.address()),
        1_000_000
    );
}

#[test]
fn too_deep_rollback_is_rejected_without_state_change() {
    let node = build_node(|config| {
        config.chain.max_rollback_blocks = 3;
    });
    let nemesis_hash = node.storage.load_block_element(Height(1)).unwrap().entity_hash;

    let committed = chain(2, 6, nemesis_hash, PublicKey([3u8; 32]));
    assert_eq!(
        node.submit_blocks(committed.clone()).status,
        CompletionStatus::Normal
    );
    let score_before = node.score.get();

    // Fork attaching at height 2 would undo 4 > 3 blocks, even though its
    // score would win.
    let fork = chain(3, 9, committed[0].hash(), PublicKey([4u8; 32]));
    let result = node.submit_blocks(fork);
    assert_eq!(result.status, CompletionStatus::Aborted);
    assert_eq!(result.reason, Some(AbortReason::RollbackTooDeep));

    assert_eq!(node.chain_tip(), Height(6));
    assert_eq!(node.score.get(), score_before);
    assert_eq!(node.counter("RB COMMIT ALL"), 0);
    assert_eq!(node.counter("RB IGNORE ALL"), 0);
}

#[test]
fn duplicate_transactions_are_filtered_silently() {
    let node = build_node(|_| {});

    let pooled = transfer(10);
    node.submit_transactions(vec![Arc::clone(&pooled)]);
    node.wait_until("first transaction enters the pool", || {
        node.ut_cache.contains(&pooled.hash())
    });

    // Resubmit the pooled transaction alongside a fresh one.
    let fresh = transfer(20);
    node.submit_transactions(vec![Arc::clone(&pooled), Arc::clone(&fresh)]);
    node.wait_until("fresh transaction enters the pool", || {
        node.ut_cache.contains(&fresh.hash())
    });

    // The duplicate was dropped silently: no status notification, no second
    // announcement.
    assert!(node.status.rejected.lock().is_empty());
    assert_eq!(
        *node.announced_transactions.lock(),
        vec![pooled.hash(), fresh.hash()]
    );
    assert_eq!(node.ut_cache.len(), 2);
}

#[test]
fn invalid_transactions_are_reported_per_transaction() {
    let node = build_node(|_| {});

    let invalid = Arc::new(Transaction {
        signer: SIGNER,
        recipient: PublicKey([2u8; 32]).address(),
        amount: 0,
        fee: 1,
        deadline: Timestamp(NOW_MS + 3_600_000),
    });
    let valid = transfer(30);
    node.submit_transactions(vec![Arc::clone(&invalid), Arc::clone(&valid)]);
    node.wait_until("valid transaction enters the pool", || {
        node.ut_cache.contains(&valid.hash())
    });

    assert!(!node.ut_cache.contains(&invalid.hash()));
    let rejected = node.status.rejected.lock();
    assert_eq!(rejected.len(), 1);
    assert_eq!(rejected[0], (invalid.hash(), ValidationError::ZeroAmount));
    // Only the valid transaction was announced.
    assert_eq!(*node.announced_transactions.lock(), vec![valid.hash()]);
}

#[test]
fn dispatcher_capacity_and_backpressure_mode_are_plumbed() {
    let node = build_node(|config| {
        config.node.block_disruptor_size = 4;
        config.node.transaction_disruptor_size = 8;
        config.node.should_abort_when_dispatcher_is_full = true;
    });
    assert_eq!(node.service.block_dispatcher().capacity(), 4);
    assert_eq!(node.service.transaction_dispatcher().capacity(), 8);
}

#[test]
fn audited_inputs_land_under_the_boot_directory() {
    let audit_root = tempfile::tempdir().unwrap();
    let node = build_node(|config| {
        config.node.should_audit_dispatcher_inputs = true;
        config.node.data_directory = audit_root.path().to_path_buf();
    });
    let nemesis_hash = node.storage.load_block_element(Height(1)).unwrap().entity_hash;

    assert_eq!(
        node.submit_blocks(chain(2, 3, nemesis_hash, PublicKey([3u8; 32])))
            .status,
        CompletionStatus::Normal
    );

    let audit_file = audit_root
        .path()
        .join("audit")
        .join("block dispatcher")
        .join(NOW_MS.to_string())
        .join("1");
    assert!(audit_file.exists(), "audit file for element 1 exists");
}

#[test]
fn replayed_block_range_is_a_neutral_duplicate() {
    let node = build_node(|_| {});
    let nemesis_hash = node.storage.load_block_element(Height(1)).unwrap().entity_hash;

    let range = chain(2, 4, nemesis_hash, PublicKey([3u8; 32]));
    assert_eq!(
        node.submit_blocks(range.clone()).status,
        CompletionStatus::Normal
    );

    // The short-lived cache catches the immediate replay before chain sync.
    let result = node.submit_blocks(range);
    assert_eq!(result.status, CompletionStatus::Aborted);
    assert_eq!(result.reason, Some(AbortReason::DuplicateHash));
    assert_eq!(node.chain_tip(), Height(4));
}
