//! The chain-sync consumer: the stateful commit.
//!
//! Per attempt the consumer walks `Checking → Undoing → Executing →
//! {Committing | Aborting}`. Checking and Executing only touch a discardable
//! cache delta; Committing is the single atomic transition in which the
//! cache, block storage, and local score move together.

use estuary_cache::ChainCache;
use estuary_chain::{
    partial_score, BlockChainSyncHandlers, RollbackInfo, StateChangeInfo, TransactionsChangeInfo,
};
use estuary_disruptor::{AbortReason, Consumer, ConsumerOutcome};
use estuary_storage::BlockStorage;
use estuary_types::{Hash, ScoreDelta, TimeSupplier, TransactionInfo};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Build the chain-sync consumer.
///
/// The handler bundle carries the chain rules plus the rollback-accounting
/// and subscriber side effects woven in by the assembly; the consumer itself
/// only sequences the attempt and owns the working delta.
pub fn create_block_chain_sync_consumer(
    cache: Arc<ChainCache>,
    storage: Arc<dyn BlockStorage>,
    rollback_info: Arc<RollbackInfo>,
    max_rollback_blocks: u64,
    time_supplier: TimeSupplier,
    handlers: BlockChainSyncHandlers,
) -> Consumer {
    Box::new(move |input| {
        let elements = input.blocks();

        // Checking: difficulty expectations against the pre-sync cache.
        let view = cache.read();
        if !(handlers.difficulty_checker)(elements, &view) {
            return ConsumerOutcome::Abort(AbortReason::DifficultyMismatch);
        }

        // Checking: where does the range attach?
        let first = &elements[0];
        let incoming_height = first.block.height;
        let chain_height = storage.chain_height();
        if incoming_height.0 < 2 || incoming_height.0 > chain_height.0 + 1 {
            debug!(
                incoming = incoming_height.0,
                chain = chain_height.0,
                "range does not attach to the chain"
            );
            return ConsumerOutcome::Abort(AbortReason::UnlinkedChain);
        }
        let ancestor = incoming_height.prev();
        let parent = match storage.load_block_element(ancestor) {
            Ok(parent) => parent,
            Err(_) => return ConsumerOutcome::Abort(AbortReason::UnlinkedChain),
        };
        if first.block.previous_block_hash != parent.entity_hash {
            return ConsumerOutcome::Abort(AbortReason::UnlinkedChain);
        }

        // Checking: rollback depth, before any work happens.
        let undo_count = chain_height.0 - ancestor.0;
        if undo_count > max_rollback_blocks {
            debug!(undo_count, max_rollback_blocks, "sync would rewind too far");
            return ConsumerOutcome::Abort(AbortReason::RollbackTooDeep);
        }

        // Checking: strict score improvement; ties lose so equal-score forks
        // cannot oscillate.
        let undone = match storage.load_block_elements_above(ancestor) {
            Ok(undone) => undone,
            Err(storage_error) => {
                error!(%storage_error, "could not load the committed suffix");
                return ConsumerOutcome::Abort(AbortReason::StorageFailure);
            }
        };
        let committed_score = partial_score(&undone);
        let incoming_score = partial_score(elements);
        if incoming_score <= committed_score {
            debug!(incoming_score, committed_score, "candidate chain does not improve the score");
            rollback_info.record_ignored();
            return ConsumerOutcome::Abort(AbortReason::LowerChainScore);
        }

        // Undoing: rewind the committed suffix on a working delta.
        let mut delta = cache.begin_delta();
        for element in undone.iter().rev() {
            if let Err(chain_error) = (handlers.undo_block)(element, &mut delta) {
                error!(height = element.block.height.0, %chain_error, "undo failed");
                rollback_info.record_ignored();
                return ConsumerOutcome::Abort(AbortReason::ChainPartInvalid);
            }
        }

        // Executing: stateful validation + execution of the incoming suffix.
        if let Err(chain_error) = (handlers.processor)(elements, &mut delta) {
            debug!(%chain_error, "incoming chain part failed execution");
            rollback_info.record_ignored();
            return ConsumerOutcome::Abort(AbortReason::ChainPartInvalid);
        }

        // Committing: cache, storage, and score move together.
        cache.commit(delta);
        if let Err(storage_error) = storage.drop_blocks_after(ancestor) {
            error!(%storage_error, "fatal: cache committed but storage rewind failed");
            return ConsumerOutcome::Abort(AbortReason::StorageFailure);
        }
        for element in elements {
            if let Err(storage_error) = storage.save_block_element(element) {
                error!(
                    height = element.block.height.0,
                    %storage_error,
                    "fatal: cache committed but storage append failed"
                );
                return ConsumerOutcome::Abort(AbortReason::StorageFailure);
            }
        }

        let new_height = elements[elements.len() - 1].block.height;
        let score_delta = ScoreDelta(incoming_score as i128 - committed_score as i128);
        (handlers.state_change)(&StateChangeInfo {
            score_delta,
            height: new_height,
        });

        // Let the unconfirmed pool react: confirmed hashes leave, undone
        // transactions (unless re-confirmed by the new suffix) revert.
        let added_transaction_hashes: Vec<Hash> = elements
            .iter()
            .flat_map(|element| element.transaction_elements.iter())
            .map(|tx_element| tx_element.entity_hash)
            .collect();
        let added: HashSet<Hash> = added_transaction_hashes.iter().copied().collect();
        let now = (time_supplier)();
        let reverted_transaction_infos: Vec<TransactionInfo> = undone
            .iter()
            .flat_map(|element| element.transaction_elements.iter())
            .filter(|tx_element| !added.contains(&tx_element.entity_hash))
            .map(|tx_element| TransactionInfo::from_element(tx_element, now))
            .collect();
        (handlers.transactions_change)(&TransactionsChangeInfo {
            added_transaction_hashes,
            reverted_transaction_infos,
        });

        info!(
            height = new_height.0,
            undone = undo_count,
            %score_delta,
            "chain sync committed"
        );
        ConsumerOutcome::Continue
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use estuary_cache::CacheDelta;
    use estuary_chain::{
        create_sync_processor, execute_block, rollback_block, ExecutionPlugins, LocalChainScore,
        RollbackCounterType, RollbackResult,
    };
    use estuary_storage::MemoryBlockStorage;
    use estuary_types::{
        AnnotatedBlockRange, Block, BlockElement, ChainScore, Difficulty, Height, InputSource,
        NodeId, PublicKey, Timestamp, Transaction,
    };
    use estuary_disruptor::ConsumerInput;
    use parking_lot::Mutex;
    use std::time::Duration;

    const NOW_MS: u64 = 10_000_000;

    struct Harness {
        cache: Arc<ChainCache>,
        storage: Arc<MemoryBlockStorage>,
        score: Arc<LocalChainScore>,
        rollback: Arc<RollbackInfo>,
        plugins: ExecutionPlugins,
        state_changes: Arc<Mutex<Vec<StateChangeInfo>>>,
        transactions_changes: Arc<Mutex<Vec<TransactionsChangeInfo>>>,
    }

    impl Harness {
        fn new() -> Self {
            let nemesis = BlockElement::new(Arc::new(Block {
                height: Height(1),
                timestamp: Timestamp(0),
                difficulty: Difficulty(1_000),
                previous_block_hash: Hash::ZERO,
                transactions_hash: Hash::ZERO,
                harvester: PublicKey::ZERO,
                transactions: Vec::new(),
            }));
            Self {
                cache: Arc::new(ChainCache::new(64)),
                storage: Arc::new(MemoryBlockStorage::new(nemesis)),
                score: Arc::new(LocalChainScore::new(ChainScore(0))),
                rollback: Arc::new(RollbackInfo::new(
                    Arc::new(|| Timestamp(NOW_MS)),
                    Duration::from_secs(3_600),
                )),
                plugins: ExecutionPlugins::transfer(),
                state_changes: Arc::new(Mutex::new(Vec::new())),
                transactions_changes: Arc::new(Mutex::new(Vec::new())),
            }
        }

        /// Fund an account directly in the live cache.
        fn fund(&self, key: PublicKey, amount: u64) {
            let mut delta = self.cache.begin_delta();
            delta.accounts_mut().credit(key.address(), amount);
            self.cache.commit(delta);
        }

        /// Commit a block to cache + storage + score, as a prior sync would have.
        fn commit_block(&self, element: &BlockElement) {
            let mut delta = self.cache.begin_delta();
            execute_block(element, self.plugins.observer.as_ref(), &mut delta).unwrap();
            self.cache.commit(delta);
            self.storage.save_block_element(element).unwrap();
            self.score
                .apply(ScoreDelta(element.block.difficulty.value() as i128));
        }

        fn block(
            &self,
            height: u64,
            parent: Hash,
            difficulty: u64,
            transactions: Vec<Arc<Transaction>>,
        ) -> BlockElement {
            BlockElement::new(Arc::new(Block {
                height: Height(height),
                timestamp: Timestamp(height * 15_000),
                difficulty: Difficulty(difficulty),
                previous_block_hash: parent,
                transactions_hash: Block::merkle_root(&transactions),
                harvester: PublicKey([9u8; 32]),
                transactions,
            }))
        }

        /// Extend the committed chain by `count` empty blocks of the given
        /// difficulty, returning the committed elements.
        fn extend_chain(&self, count: usize, difficulty: u64) -> Vec<BlockElement> {
            let mut committed = Vec::new();
            for _ in 0..count {
                let tail_height = self.storage.chain_height();
                let tail = self.storage.load_block_element(tail_height).unwrap();
                let element =
                    self.block(tail_height.0 + 1, tail.entity_hash, difficulty, Vec::new());
                self.commit_block(&element);
                committed.push(element);
            }
            committed
        }

        fn consumer(&self, max_rollback_blocks: u64) -> Consumer {
            let rollback = Arc::clone(&self.rollback);
            let rollback_for_undo = Arc::clone(&self.rollback);
            let rollback_for_save = Arc::clone(&self.rollback);
            let observer = self.plugins.observer.clone();
            let score = Arc::clone(&self.score);
            let state_changes = Arc::clone(&self.state_changes);
            let transactions_changes = Arc::clone(&self.transactions_changes);

            let handlers = BlockChainSyncHandlers {
                difficulty_checker: Box::new(move |_, _| {
                    rollback.reset();
                    true
                }),
                undo_block: Box::new(move |element: &BlockElement, delta: &mut CacheDelta| {
                    rollback_for_undo.increment();
                    rollback_block(element, observer.as_ref(), delta)
                }),
                processor: create_sync_processor(&self.plugins),
                state_change: Box::new(move |info: &StateChangeInfo| {
                    score.apply(info.score_delta);
                    state_changes.lock().push(*info);
                    rollback_for_save.save();
                }),
                transactions_change: Arc::new(move |info: &TransactionsChangeInfo| {
                    transactions_changes.lock().push(info.clone());
                }),
            };

            create_block_chain_sync_consumer(
                Arc::clone(&self.cache),
                Arc::clone(&self.storage) as Arc<dyn BlockStorage>,
                Arc::clone(&self.rollback),
                max_rollback_blocks,
                Arc::new(|| Timestamp(NOW_MS)),
                handlers,
            )
        }

        fn input(&self, elements: Vec<BlockElement>) -> ConsumerInput {
            let blocks = elements
                .iter()
                .map(|element| Arc::clone(&element.block))
                .collect();
            let mut input = ConsumerInput::from_block_range(AnnotatedBlockRange::remote(
                blocks,
                InputSource::RemotePull,
                NodeId(1),
            ));
            for element in input.blocks_mut() {
                element.compute_hashes();
            }
            input
        }

        fn rollback_counters(&self) -> (u64, u64) {
            (
                self.rollback
                    .counter(RollbackResult::Committed, RollbackCounterType::All),
                self.rollback
                    .counter(RollbackResult::Ignored, RollbackCounterType::All),
            )
        }
    }

    #[test]
    fn simple_extension_commits_and_moves_the_score() {
        let harness = Harness::new();
        harness.extend_chain(4, 1_000);
        let base_score = harness.score.get();

        // Build [6..10] linking at the current tail.
        let tail = harness.storage.load_block_element(Height(5)).unwrap();
        let mut suffix = Vec::new();
        let mut parent = tail.entity_hash;
        for height in 6..=10u64 {
            let element = harness.block(height, parent, 1_010, Vec::new());
            parent = element.entity_hash;
            suffix.push(element);
        }

        let mut consumer = harness.consumer(10);
        let mut input = harness.input(suffix);
        assert!(matches!(consumer(&mut input), ConsumerOutcome::Continue));

        assert_eq!(harness.storage.chain_height(), Height(10));
        assert_eq!(
            harness.score.get(),
            base_score.apply(ScoreDelta(5 * 1_010))
        );
        assert_eq!(harness.state_changes.lock().len(), 1);
        assert_eq!(harness.rollback_counters(), (0, 0), "no undos on extension");
    }

    #[test]
    fn equal_score_fork_is_neutral_and_counted_ignored() {
        let harness = Harness::new();
        let committed = harness.extend_chain(3, 1_000);
        let score_before = harness.score.get();

        // A fork of the same cumulative score, attaching below the tail.
        let fork_parent = committed[0].clone(); // height 2
        let mut suffix = Vec::new();
        let mut parent = fork_parent.entity_hash;
        for height in 3..=4u64 {
            let element = harness.block(height, parent, 1_000, Vec::new());
            parent = element.entity_hash;
            suffix.push(element);
        }

        let mut consumer = harness.consumer(10);
        let mut input = harness.input(suffix);
        assert!(matches!(
            consumer(&mut input),
            ConsumerOutcome::Abort(AbortReason::LowerChainScore)
        ));

        assert_eq!(harness.storage.chain_height(), Height(4));
        assert_eq!(harness.score.get(), score_before);
        assert_eq!(harness.rollback_counters(), (0, 1));
        assert!(harness.state_changes.lock().is_empty());
    }

    #[test]
    fn deeper_fork_commits_with_undos_and_reverts_transactions() {
        let harness = Harness::new();
        let signer = PublicKey([3u8; 32]);
        harness.fund(signer, 1_000);

        // Chain to height 4, then a committed suffix [5..7] carrying a transfer.
        harness.extend_chain(3, 1_000);
        let tail = harness.storage.load_block_element(Height(4)).unwrap();
        let reverted_tx = Arc::new(Transaction {
            signer,
            recipient: PublicKey([4u8; 32]).address(),
            amount: 50,
            fee: 5,
            deadline: Timestamp(u64::MAX),
        });
        let block5 = harness.block(5, tail.entity_hash, 1_000, vec![Arc::clone(&reverted_tx)]);
        harness.commit_block(&block5);
        let block6 = harness.block(6, block5.entity_hash, 1_000, Vec::new());
        harness.commit_block(&block6);
        let block7 = harness.block(7, block6.entity_hash, 1_000, Vec::new());
        harness.commit_block(&block7);
        let score_before = harness.score.get();

        // Incoming fork [5..8] with higher cumulative score.
        let mut suffix = Vec::new();
        let mut parent = tail.entity_hash;
        for height in 5..=8u64 {
            let element = harness.block(height, parent, 1_200, Vec::new());
            parent = element.entity_hash;
            suffix.push(element);
        }

        let mut consumer = harness.consumer(10);
        let mut input = harness.input(suffix);
        assert!(matches!(consumer(&mut input), ConsumerOutcome::Continue));

        assert_eq!(harness.storage.chain_height(), Height(8));
        let expected_delta = 4 * 1_200 - 3 * 1_000;
        assert_eq!(
            harness.score.get(),
            score_before.apply(ScoreDelta(expected_delta))
        );
        assert_eq!(harness.rollback_counters(), (3, 0), "three undone blocks");

        // The undone transfer is unwound from the cache and reported reverted.
        assert_eq!(
            harness.cache.read().accounts().balance(&signer.address()),
            1_000
        );
        let changes = harness.transactions_changes.lock();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].reverted_transaction_infos.len(), 1);
        assert_eq!(
            changes[0].reverted_transaction_infos[0].entity_hash,
            reverted_tx.hash()
        );
        assert!(changes[0].added_transaction_hashes.is_empty());
    }

    #[test]
    fn rollback_of_exactly_the_limit_is_permitted() {
        let harness = Harness::new();
        let committed = harness.extend_chain(11, 1_000);

        // Fork attaching at height 2: undoes exactly 10 blocks.
        let mut suffix = Vec::new();
        let mut parent = committed[0].entity_hash;
        for height in 3..=13u64 {
            let element = harness.block(height, parent, 2_000, Vec::new());
            parent = element.entity_hash;
            suffix.push(element);
        }
        let mut consumer = harness.consumer(10);
        let mut input = harness.input(suffix);
        assert!(matches!(consumer(&mut input), ConsumerOutcome::Continue));
        assert_eq!(harness.storage.chain_height(), Height(13));
        assert_eq!(harness.rollback_counters(), (10, 0));
    }

    #[test]
    fn rollback_beyond_the_limit_is_structural_failure() {
        let harness = Harness::new();
        harness.extend_chain(11, 1_000);
        let score_before = harness.score.get();

        // Fork attaching at the nemesis: would undo 11 > 10.
        let nemesis = harness.storage.load_block_element(Height(1)).unwrap();
        let mut suffix = Vec::new();
        let mut parent = nemesis.entity_hash;
        for height in 2..=13u64 {
            let element = harness.block(height, parent, 2_000, Vec::new());
            parent = element.entity_hash;
            suffix.push(element);
        }
        let mut consumer = harness.consumer(10);
        let mut input = harness.input(suffix);
        assert!(matches!(
            consumer(&mut input),
            ConsumerOutcome::Abort(AbortReason::RollbackTooDeep)
        ));
        assert_eq!(harness.storage.chain_height(), Height(12));
        assert_eq!(harness.score.get(), score_before);
        assert_eq!(harness.rollback_counters(), (0, 0), "no counter change");
    }

    #[test]
    fn unlinked_range_is_rejected() {
        let harness = Harness::new();
        harness.extend_chain(2, 1_000);

        // Correct height, wrong parent hash.
        let fake_parent = Hash::from_bytes(b"someone else's chain");
        let element = harness.block(4, fake_parent, 5_000, Vec::new());
        let mut consumer = harness.consumer(10);
        let mut input = harness.input(vec![element]);
        assert!(matches!(
            consumer(&mut input),
            ConsumerOutcome::Abort(AbortReason::UnlinkedChain)
        ));

        // Height beyond the tail + 1.
        let tail = harness.storage.load_block_element(Height(3)).unwrap();
        let gap = harness.block(6, tail.entity_hash, 5_000, Vec::new());
        let mut input = harness.input(vec![gap]);
        assert!(matches!(
            consumer(&mut input),
            ConsumerOutcome::Abort(AbortReason::UnlinkedChain)
        ));
    }

    #[test]
    fn stateful_failure_discards_all_work() {
        let harness = Harness::new();
        harness.extend_chain(2, 1_000);
        let score_before = harness.score.get();

        // The incoming block spends money its signer does not have.
        let pauper = PublicKey([6u8; 32]);
        let tail = harness.storage.load_block_element(Height(3)).unwrap();
        let overdraft = Arc::new(Transaction {
            signer: pauper,
            recipient: PublicKey([7u8; 32]).address(),
            amount: 1_000_000,
            fee: 0,
            deadline: Timestamp(u64::MAX),
        });
        let element = harness.block(4, tail.entity_hash, 5_000, vec![overdraft]);

        let mut consumer = harness.consumer(10);
        let mut input = harness.input(vec![element]);
        assert!(matches!(
            consumer(&mut input),
            ConsumerOutcome::Abort(AbortReason::ChainPartInvalid)
        ));

        assert_eq!(harness.storage.chain_height(), Height(3));
        assert_eq!(harness.score.get(), score_before);
        assert_eq!(harness.rollback_counters().1, 1, "counted ignored");
        assert!(harness.state_changes.lock().is_empty());
    }

    #[test]
    fn replaying_a_committed_range_is_neutral() {
        let harness = Harness::new();
        let committed = harness.extend_chain(5, 1_000);
        let score_before = harness.score.get();

        let replay: Vec<BlockElement> = committed[1..].to_vec();
        let mut consumer = harness.consumer(10);
        let mut input = harness.input(replay);
        assert!(matches!(
            consumer(&mut input),
            ConsumerOutcome::Abort(AbortReason::LowerChainScore)
        ));
        assert_eq!(harness.storage.chain_height(), Height(6));
        assert_eq!(harness.score.get(), score_before);
    }
}
