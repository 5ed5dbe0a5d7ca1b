//! Block pipeline consumers (everything but chain-sync).

use crate::{HashCheckOptions, ParallelValidationPolicy, ShortLivedHashCache};
use estuary_chain::{NotificationPublisher, StatelessValidator};
use estuary_disruptor::{AbortReason, Consumer, ConsumerOutcome};
use estuary_types::{BlockElement, InputSource, TimeSupplier, Transaction};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Computes block and transaction hashes; pure function of the bytes.
pub fn create_block_hash_calculator_consumer() -> Consumer {
    Box::new(|input| {
        for element in input.blocks_mut() {
            element.compute_hashes();
        }
        ConsumerOutcome::Continue
    })
}

/// Rejects ranges whose blocks were all seen recently.
pub fn create_block_hash_check_consumer(
    time_supplier: TimeSupplier,
    options: HashCheckOptions,
) -> Consumer {
    let mut cache = ShortLivedHashCache::new(options);
    Box::new(move |input| {
        let now = (time_supplier)();
        let mut any_unseen = false;
        for element in input.blocks() {
            if !cache.check_and_set(now, element.entity_hash) {
                any_unseen = true;
            }
        }
        if any_unseen {
            ConsumerOutcome::Continue
        } else {
            ConsumerOutcome::Abort(AbortReason::DuplicateHash)
        }
    })
}

/// Precomputes the addresses every transaction touches.
pub fn create_block_address_extraction_consumer(
    publisher: Arc<dyn NotificationPublisher>,
) -> Consumer {
    Box::new(move |input| {
        for element in input.blocks_mut() {
            for tx_element in &mut element.transaction_elements {
                tx_element.addresses =
                    Some(publisher.publish_addresses(&tx_element.transaction));
            }
        }
        ConsumerOutcome::Continue
    })
}

/// Structural checks on the range: size limit, height contiguity, internal
/// parent-hash linkage, and the future-time bound.
pub fn create_block_chain_check_consumer(
    max_blocks_per_sync_attempt: usize,
    max_block_future_time: Duration,
    time_supplier: TimeSupplier,
) -> Consumer {
    Box::new(move |input| {
        let elements = input.blocks();
        if elements.len() > max_blocks_per_sync_attempt {
            return ConsumerOutcome::Abort(AbortReason::RangeTooLarge);
        }

        for pair in elements.windows(2) {
            if pair[1].block.height != pair[0].block.height.next() {
                return ConsumerOutcome::Abort(AbortReason::HeightsNotContiguous);
            }
            if pair[1].block.previous_block_hash != pair[0].entity_hash {
                return ConsumerOutcome::Abort(AbortReason::UnlinkedChain);
            }
        }

        let limit = (time_supplier)() + max_block_future_time;
        for element in elements {
            if element.block.timestamp > limit {
                debug!(
                    height = element.block.height.0,
                    timestamp = %element.block.timestamp,
                    %limit,
                    "block timestamp too far in the future"
                );
                return ConsumerOutcome::Abort(AbortReason::TimestampTooFarInFuture);
            }
        }
        ConsumerOutcome::Continue
    })
}

/// Stateless validation of block shells and, in parallel, every carried
/// transaction; the whole range aborts on the first failure.
pub fn create_block_stateless_validation_consumer(
    validator: Arc<dyn StatelessValidator>,
    policy: ParallelValidationPolicy,
) -> Consumer {
    Box::new(move |input| {
        for element in input.blocks() {
            if let Err(error) = validator.validate_block(&element.block) {
                debug!(height = element.block.height.0, %error, "block failed stateless validation");
                return ConsumerOutcome::Abort(AbortReason::ValidationFailed);
            }
        }

        let transactions: Vec<Arc<Transaction>> = input
            .blocks()
            .iter()
            .flat_map(|element| element.transaction_elements.iter())
            .map(|tx_element| Arc::clone(&tx_element.transaction))
            .collect();
        match policy.validate_all(&transactions, |tx| validator.validate_transaction(tx)) {
            Ok(()) => ConsumerOutcome::Continue,
            Err(error) => {
                debug!(%error, "block transaction failed stateless validation");
                ConsumerOutcome::Abort(AbortReason::ValidationFailed)
            }
        }
    })
}

/// Downstream announcement of a freshly committed block.
pub type NewBlockSink = Arc<dyn Fn(&BlockElement, InputSource) + Send + Sync>;

/// Forwards single-block inputs (pushed or locally harvested blocks) to the
/// new-block sink; multi-block sync pulls are not rebroadcast.
pub fn create_new_block_consumer(sink: NewBlockSink) -> Consumer {
    Box::new(move |input| {
        if let [element] = input.blocks() {
            sink(element, input.source());
        }
        ConsumerOutcome::Continue
    })
}
