//! Short-lived seen-hash cache.

use estuary_types::{Hash, Timestamp};
use std::collections::HashMap;
use std::time::Duration;

/// Tuning for a [`ShortLivedHashCache`].
#[derive(Debug, Clone)]
pub struct HashCheckOptions {
    /// How long a seen hash keeps rejecting resubmissions.
    pub cache_duration: Duration,
    /// How often expired entries are swept out.
    pub prune_interval: Duration,
    /// Hard cap on cached hashes; at the cap, unseen hashes pass through
    /// without being cached rather than being rejected.
    pub max_cache_size: usize,
}

impl HashCheckOptions {
    /// Options with the given TTL and default pruning.
    pub fn new(cache_duration: Duration) -> Self {
        Self {
            cache_duration,
            prune_interval: Duration::from_secs(90),
            max_cache_size: 10_000_000,
        }
    }
}

/// Cache of recently seen entity hashes.
///
/// Owned exclusively by one hash-check consumer, so no synchronization. A
/// hash that was never seen is never rejected; a hash seen within the
/// configured duration is.
pub struct ShortLivedHashCache {
    options: HashCheckOptions,
    entries: HashMap<Hash, Timestamp>,
    last_prune: Timestamp,
}

impl ShortLivedHashCache {
    /// An empty cache.
    pub fn new(options: HashCheckOptions) -> Self {
        Self {
            options,
            entries: HashMap::new(),
            last_prune: Timestamp(0),
        }
    }

    /// Whether `hash` was seen within the cache duration. Unseen (or
    /// expired) hashes are recorded as seen at `now` and admitted.
    pub fn check_and_set(&mut self, now: Timestamp, hash: Hash) -> bool {
        self.prune_if_due(now);

        if let Some(&seen_at) = self.entries.get(&hash) {
            if now.saturating_elapsed_since(seen_at) < self.options.cache_duration {
                return true;
            }
        }

        if self.entries.len() >= self.options.max_cache_size {
            self.prune(now);
        }
        if self.entries.len() < self.options.max_cache_size {
            self.entries.insert(hash, now);
        }
        false
    }

    /// Number of cached hashes.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn prune_if_due(&mut self, now: Timestamp) {
        if now.saturating_elapsed_since(self.last_prune) >= self.options.prune_interval {
            self.prune(now);
        }
    }

    fn prune(&mut self, now: Timestamp) {
        let duration = self.options.cache_duration;
        self.entries
            .retain(|_, seen_at| now.saturating_elapsed_since(*seen_at) < duration);
        self.last_prune = now;
    }
}
