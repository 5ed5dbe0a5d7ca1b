//! Transaction pipeline consumers.

use crate::{HashCheckOptions, ParallelValidationPolicy, ShortLivedHashCache};
use estuary_chain::{NotificationPublisher, StatelessValidator, TransactionStatusSubscriber};
use estuary_disruptor::{AbortReason, Consumer, ConsumerOutcome};
use estuary_types::{Hash, TimeSupplier, Timestamp, TransactionInfo};
use std::sync::Arc;
use tracing::debug;

/// Asks the unconfirmed pool whether it already holds a hash.
pub type KnownHashPredicate = Arc<dyn Fn(Timestamp, &Hash) -> bool + Send + Sync>;

/// Terminal handler for surviving transactions: forward to the network sink,
/// then hand to the UT updater.
pub type NewTransactionsHandler = Box<dyn Fn(Vec<TransactionInfo>) + Send>;

/// Computes transaction hashes; pure function of the bytes.
pub fn create_transaction_hash_calculator_consumer() -> Consumer {
    Box::new(|input| {
        for element in input.transactions_mut() {
            element.compute_hash();
        }
        ConsumerOutcome::Continue
    })
}

/// Drops transactions seen recently or already pooled; duplicates are
/// filtered silently. Aborts (neutral) when nothing survives.
pub fn create_transaction_hash_check_consumer(
    time_supplier: TimeSupplier,
    options: HashCheckOptions,
    known_hash_predicate: KnownHashPredicate,
) -> Consumer {
    let mut cache = ShortLivedHashCache::new(options);
    Box::new(move |input| {
        let now = (time_supplier)();
        let elements = input.transactions_vec_mut();
        let before = elements.len();
        elements.retain(|element| {
            if known_hash_predicate(now, &element.entity_hash) {
                return false;
            }
            !cache.check_and_set(now, element.entity_hash)
        });
        let dropped = before - elements.len();
        if dropped > 0 {
            debug!(dropped, remaining = elements.len(), "filtered duplicate transactions");
        }
        if elements.is_empty() {
            ConsumerOutcome::Abort(AbortReason::DuplicateHash)
        } else {
            ConsumerOutcome::Continue
        }
    })
}

/// Precomputes the addresses every transaction touches.
pub fn create_transaction_address_extraction_consumer(
    publisher: Arc<dyn NotificationPublisher>,
) -> Consumer {
    Box::new(move |input| {
        for element in input.transactions_mut() {
            element.addresses = Some(publisher.publish_addresses(&element.transaction));
        }
        ConsumerOutcome::Continue
    })
}

/// Parallel stateless validation; failures are reported per transaction to
/// the status subscriber and dropped, valid transactions continue. The
/// element aborts only when nothing survives.
pub fn create_transaction_stateless_validation_consumer(
    validator: Arc<dyn StatelessValidator>,
    policy: ParallelValidationPolicy,
    status_subscriber: Arc<dyn TransactionStatusSubscriber>,
    time_supplier: TimeSupplier,
) -> Consumer {
    Box::new(move |input| {
        let now = (time_supplier)();
        let elements = input.transactions_vec_mut();
        let results = policy.validate_each(elements.as_slice(), |element| {
            validator.validate_transaction(&element.transaction)
        });

        let mut index = 0;
        elements.retain(|element| {
            let result = &results[index];
            index += 1;
            if let Err(error) = result {
                debug!(hash = %element.entity_hash, %error, "transaction failed stateless validation");
                status_subscriber
                    .notify_status(&TransactionInfo::from_element(element, now), error);
                return false;
            }
            true
        });

        if elements.is_empty() {
            ConsumerOutcome::Abort(AbortReason::ValidationFailed)
        } else {
            ConsumerOutcome::Continue
        }
    })
}

/// Hands the surviving transactions to the terminal handler.
///
/// All survivors are forwarded even though some may later fail stateful
/// validation: a transaction this node rejects can still pass elsewhere, and
/// an unsynced node would wrongly reject transactions for missing account
/// state.
pub fn create_new_transactions_consumer(
    handler: NewTransactionsHandler,
    time_supplier: TimeSupplier,
) -> Consumer {
    Box::new(move |input| {
        let now = (time_supplier)();
        let infos: Vec<TransactionInfo> = input
            .transactions()
            .iter()
            .map(|element| TransactionInfo::from_element(element, now))
            .collect();
        handler(infos);
        ConsumerOutcome::Continue
    })
}
