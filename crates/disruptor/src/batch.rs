//! Coalescing of small transaction ranges into batched dispatcher inputs.

use crate::{ConsumerDispatcher, ConsumerInput, DispatcherError};
use estuary_types::{AnnotatedTransactionRange, InputSource, NodeId, Transaction};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Bucket key: ranges are coalesced per provenance so audit and rebroadcast
/// policy stay attributable to the originating peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct BatchKey {
    source: InputSource,
    source_id: Option<NodeId>,
}

/// Coalesces many small transaction ranges into larger dispatcher inputs.
///
/// [`queue`](Self::queue) never blocks and never submits; the periodic node
/// task calls [`dispatch`](Self::dispatch), the only submission site, which
/// drains every bucket into one `ConsumerInput` per provenance.
pub struct BatchRangeDispatcher {
    dispatcher: Arc<ConsumerDispatcher>,
    queued: Mutex<BTreeMap<BatchKey, Vec<Arc<Transaction>>>>,
}

impl BatchRangeDispatcher {
    /// Wrap the transaction dispatcher.
    pub fn new(dispatcher: Arc<ConsumerDispatcher>) -> Self {
        Self {
            dispatcher,
            queued: Mutex::new(BTreeMap::new()),
        }
    }

    /// Append a range to its provenance bucket. Never blocks.
    pub fn queue(&self, range: AnnotatedTransactionRange) {
        if range.transactions.is_empty() {
            return;
        }
        let key = BatchKey {
            source: range.source,
            source_id: range.source_id,
        };
        self.queued
            .lock()
            .entry(key)
            .or_default()
            .extend(range.transactions);
    }

    /// Drain all buckets into the wrapped dispatcher, one input per bucket.
    ///
    /// A submission rejected for capacity drops that bucket's transactions;
    /// peers will regossip anything that matters.
    pub fn dispatch(&self) {
        let drained = std::mem::take(&mut *self.queued.lock());
        for (key, transactions) in drained {
            let count = transactions.len();
            let input = ConsumerInput::from_transaction_range(AnnotatedTransactionRange {
                transactions,
                source: key.source,
                source_id: key.source_id,
            });
            match self.dispatcher.process_element(input) {
                Ok(id) => {
                    debug!(
                        element_id = id,
                        count,
                        source = %key.source,
                        "dispatched batched transaction range"
                    );
                }
                Err(DispatcherError::Full(name)) => {
                    warn!(dispatcher = %name, count, "dropping batch, dispatcher full");
                }
                Err(error) => {
                    warn!(%error, count, "dropping batch");
                }
            }
        }
    }

    /// Whether no ranges are waiting to be dispatched.
    pub fn is_empty(&self) -> bool {
        self.queued.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        CompletionResult, Consumer, ConsumerDispatcherOptions, ConsumerOutcome, Inspector,
    };
    use estuary_types::{PublicKey, Timestamp};
    use std::sync::mpsc;

    fn transaction(tag: u64) -> Arc<Transaction> {
        Arc::new(Transaction {
            signer: PublicKey([1u8; 32]),
            recipient: PublicKey([2u8; 32]).address(),
            amount: tag,
            fee: 1,
            deadline: Timestamp(60_000),
        })
    }

    fn recording_dispatcher() -> (
        Arc<ConsumerDispatcher>,
        mpsc::Receiver<(InputSource, Option<NodeId>, Vec<u64>)>,
    ) {
        let (seen_tx, seen_rx) = mpsc::channel();
        let consumer: Consumer = Box::new(move |input| {
            let tags = input
                .transactions()
                .iter()
                .map(|element| element.transaction.amount)
                .collect();
            seen_tx
                .send((input.source(), input.source_id(), tags))
                .unwrap();
            ConsumerOutcome::Continue
        });
        let inspector: Inspector = Box::new(|_: &ConsumerInput, _: &CompletionResult| {});
        let dispatcher = Arc::new(ConsumerDispatcher::new(
            ConsumerDispatcherOptions::new("batch-test", 8),
            vec![consumer],
            inspector,
        ));
        (dispatcher, seen_rx)
    }

    #[test]
    fn ranges_are_coalesced_per_source() {
        let (dispatcher, seen_rx) = recording_dispatcher();
        let batcher = BatchRangeDispatcher::new(Arc::clone(&dispatcher));

        batcher.queue(AnnotatedTransactionRange::remote(
            vec![transaction(1)],
            InputSource::RemotePush,
            NodeId(7),
        ));
        batcher.queue(AnnotatedTransactionRange::remote(
            vec![transaction(2), transaction(3)],
            InputSource::RemotePush,
            NodeId(7),
        ));
        batcher.queue(AnnotatedTransactionRange::local(vec![transaction(9)]));
        assert!(!batcher.is_empty());

        batcher.dispatch();
        assert!(batcher.is_empty());
        dispatcher.shutdown();

        let mut seen: Vec<_> = seen_rx.try_iter().collect();
        seen.sort();
        assert_eq!(
            seen,
            vec![
                (InputSource::Local, None, vec![9]),
                (InputSource::RemotePush, Some(NodeId(7)), vec![1, 2, 3]),
            ]
        );
    }

    #[test]
    fn empty_ranges_are_ignored() {
        let (dispatcher, seen_rx) = recording_dispatcher();
        let batcher = BatchRangeDispatcher::new(Arc::clone(&dispatcher));

        batcher.queue(AnnotatedTransactionRange::local(Vec::new()));
        assert!(batcher.is_empty());
        batcher.dispatch();
        dispatcher.shutdown();
        assert_eq!(seen_rx.try_iter().count(), 0);
    }

    #[test]
    fn dispatch_with_nothing_queued_is_a_no_op() {
        let (dispatcher, seen_rx) = recording_dispatcher();
        let batcher = BatchRangeDispatcher::new(Arc::clone(&dispatcher));
        batcher.dispatch();
        dispatcher.shutdown();
        assert_eq!(seen_rx.try_iter().count(), 0);
    }
}
