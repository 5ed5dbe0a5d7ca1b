//! Revalidation of the unconfirmed-transaction pool.

use crate::{
    ExecutionContext, StatefulValidator, TransactionStatusSubscriber, ValidationError,
};
use estuary_cache::ChainCache;
use estuary_mempool::MemoryUtCache;
use estuary_storage::BlockStorage;
use estuary_types::{Hash, TimeSupplier, TransactionInfo};
use std::sync::Arc;
use tracing::{debug, trace};

/// Admission throttle; returning `true` rejects the transaction.
pub type UtUpdaterThrottle = Box<dyn Fn(&TransactionInfo, &MemoryUtCache) -> bool + Send + Sync>;

/// Keeps the unconfirmed-transaction pool consistent with the chain.
///
/// The updater is the pool's single writer; both entry points serialize on
/// the pool's internal lock. Every arriving transaction is throttled, then
/// statefully validated against a read-only cache snapshot at the current
/// tail, and only then inserted.
pub struct UtUpdater {
    ut_cache: Arc<MemoryUtCache>,
    cache: Arc<ChainCache>,
    storage: Arc<dyn BlockStorage>,
    stateful_validator: Arc<dyn StatefulValidator>,
    time_supplier: TimeSupplier,
    status_subscriber: Arc<dyn TransactionStatusSubscriber>,
    throttle: UtUpdaterThrottle,
}

impl UtUpdater {
    /// Wire an updater to its collaborators.
    pub fn new(
        ut_cache: Arc<MemoryUtCache>,
        cache: Arc<ChainCache>,
        storage: Arc<dyn BlockStorage>,
        stateful_validator: Arc<dyn StatefulValidator>,
        time_supplier: TimeSupplier,
        status_subscriber: Arc<dyn TransactionStatusSubscriber>,
        throttle: UtUpdaterThrottle,
    ) -> Self {
        Self {
            ut_cache,
            cache,
            storage,
            stateful_validator,
            time_supplier,
            status_subscriber,
            throttle,
        }
    }

    /// A throttle that rejects once the pool fill ratio crosses `threshold`.
    pub fn fill_throttle(threshold: f64) -> UtUpdaterThrottle {
        Box::new(move |_info, pool| pool.fill_ratio() >= threshold)
    }

    /// Admit new transactions from the network or local submission.
    pub fn update(&self, infos: Vec<TransactionInfo>) {
        if infos.is_empty() {
            return;
        }
        let view = self.cache.read();
        let context = ExecutionContext {
            height: self.storage.chain_height().next(),
            time: (self.time_supplier)(),
        };

        for info in infos {
            if self.ut_cache.contains(&info.entity_hash) {
                continue;
            }
            if (self.throttle)(&info, &self.ut_cache) {
                debug!(hash = %info.entity_hash, "transaction throttled");
                self.status_subscriber
                    .notify_status(&info, &ValidationError::RejectedByThrottle);
                continue;
            }
            match self
                .stateful_validator
                .validate(&info.transaction, &context, view.accounts())
            {
                Ok(()) => {
                    if !self.ut_cache.add(info) {
                        trace!("transaction raced into the pool, skipping");
                    }
                }
                Err(error) => {
                    debug!(hash = %info.entity_hash, %error, "transaction rejected");
                    self.status_subscriber.notify_status(&info, &error);
                }
            }
        }
    }

    /// React to a committed sync: confirmed hashes leave the pool, reverted
    /// transactions re-enter it through full revalidation.
    pub fn update_chain(&self, added_hashes: &[Hash], reverted_infos: Vec<TransactionInfo>) {
        let removed = self.ut_cache.remove_all(added_hashes);
        if !removed.is_empty() || !reverted_infos.is_empty() {
            debug!(
                confirmed = removed.len(),
                reverted = reverted_infos.len(),
                "updating unconfirmed pool after chain change"
            );
        }
        self.update(reverted_infos);
    }
}
