//! The in-memory unconfirmed-transaction pool.

use estuary_types::{Hash, TransactionInfo};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use tracing::trace;

/// Pool configuration.
#[derive(Debug, Clone)]
pub struct UtCacheConfig {
    /// Hard cap on pooled transactions; inserts beyond it are rejected.
    pub max_transactions: usize,
}

impl Default for UtCacheConfig {
    fn default() -> Self {
        Self {
            max_transactions: 100_000,
        }
    }
}

#[derive(Default)]
struct PoolInner {
    /// Infos keyed by entity hash.
    transactions: HashMap<Hash, TransactionInfo>,
    /// Arrival order, for deterministic snapshots.
    order: BTreeMap<u64, Hash>,
    /// Hash → arrival sequence, for O(log n) removal from `order`.
    sequence: HashMap<Hash, u64>,
    next_sequence: u64,
}

/// The unconfirmed-transaction memory pool.
///
/// The UT updater is the single writer; readers use [`contains`](Self::contains)
/// (the known-hash predicate) and [`snapshot`](Self::snapshot). All operations
/// serialize on one internal lock.
pub struct MemoryUtCache {
    config: UtCacheConfig,
    inner: Mutex<PoolInner>,
}

impl MemoryUtCache {
    /// An empty pool.
    pub fn new(config: UtCacheConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(PoolInner::default()),
        }
    }

    /// Whether a transaction with this hash is pooled.
    pub fn contains(&self, hash: &Hash) -> bool {
        self.inner.lock().transactions.contains_key(hash)
    }

    /// Insert an info. Returns `false` when the hash is already pooled or
    /// the pool is at capacity.
    pub fn add(&self, info: TransactionInfo) -> bool {
        let mut inner = self.inner.lock();
        if inner.transactions.len() >= self.config.max_transactions {
            trace!(hash = %info.entity_hash, "pool at capacity, rejecting");
            return false;
        }
        if inner.transactions.contains_key(&info.entity_hash) {
            return false;
        }
        let sequence = inner.next_sequence;
        inner.next_sequence += 1;
        inner.order.insert(sequence, info.entity_hash);
        inner.sequence.insert(info.entity_hash, sequence);
        inner.transactions.insert(info.entity_hash, info);
        true
    }

    /// Remove and return the info with this hash, when pooled.
    pub fn remove(&self, hash: &Hash) -> Option<TransactionInfo> {
        let mut inner = self.inner.lock();
        let info = inner.transactions.remove(hash)?;
        if let Some(sequence) = inner.sequence.remove(hash) {
            inner.order.remove(&sequence);
        }
        Some(info)
    }

    /// Remove every listed hash; absent hashes are ignored.
    pub fn remove_all(&self, hashes: &[Hash]) -> Vec<TransactionInfo> {
        hashes.iter().filter_map(|hash| self.remove(hash)).collect()
    }

    /// All pooled infos in arrival order.
    pub fn snapshot(&self) -> Vec<TransactionInfo> {
        let inner = self.inner.lock();
        inner
            .order
            .values()
            .filter_map(|hash| inner.transactions.get(hash).cloned())
            .collect()
    }

    /// Number of pooled transactions.
    pub fn len(&self) -> usize {
        self.inner.lock().transactions.len()
    }

    /// Whether the pool is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pool fill ratio in `[0, 1]`, used by the updater throttle.
    pub fn fill_ratio(&self) -> f64 {
        self.len() as f64 / self.config.max_transactions.max(1) as f64
    }
}
