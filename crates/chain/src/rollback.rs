//! Rollback accounting.

use estuary_types::{TimeSupplier, Timestamp};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;

/// How a finished rollback was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackResult {
    /// The undone suffix was replaced by a better chain.
    Committed,
    /// The attempt was rejected; nothing was replaced.
    Ignored,
}

/// Which counter family to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackCounterType {
    /// All events since boot.
    All,
    /// Only events within the recent window.
    Recent,
}

/// One counter family: an all-time total plus a ring of timestamped deltas
/// for the windowed view.
#[derive(Debug, Default)]
struct Family {
    all: u64,
    recent: VecDeque<(Timestamp, u64)>,
}

impl Family {
    fn add(&mut self, now: Timestamp, delta: u64, window: Duration) {
        self.all += delta;
        self.recent.push_back((now, delta));
        self.prune(now, window);
    }

    fn prune(&mut self, now: Timestamp, window: Duration) {
        let horizon = now - window;
        while let Some(&(timestamp, _)) = self.recent.front() {
            if timestamp < horizon {
                self.recent.pop_front();
            } else {
                break;
            }
        }
    }

    fn recent_total(&mut self, now: Timestamp, window: Duration) -> u64 {
        self.prune(now, window);
        self.recent.iter().map(|(_, delta)| delta).sum()
    }
}

#[derive(Debug, Default)]
struct Counters {
    pending: u64,
    committed: Family,
    ignored: Family,
}

/// Scored counters of recent and all-time rollbacks.
///
/// A sync attempt increments the pending counter once per undone block.
/// [`save`](Self::save) resolves the pending count as committed,
/// [`record_ignored`](Self::record_ignored) as ignored, and
/// [`reset`](Self::reset) discards it. The recent window covers half the
/// full rollback duration, ending at the current time.
pub struct RollbackInfo {
    time_supplier: TimeSupplier,
    recent_window: Duration,
    counters: Mutex<Counters>,
}

impl RollbackInfo {
    /// Create with the given time source and recent-window width.
    pub fn new(time_supplier: TimeSupplier, recent_window: Duration) -> Self {
        Self {
            time_supplier,
            recent_window,
            counters: Mutex::new(Counters::default()),
        }
    }

    /// Note one undone block in the in-flight attempt.
    pub fn increment(&self) {
        self.counters.lock().pending += 1;
    }

    /// Discard the in-flight attempt's pending count.
    pub fn reset(&self) {
        self.counters.lock().pending = 0;
    }

    /// Resolve the in-flight attempt as committed.
    pub fn save(&self) {
        let now = (self.time_supplier)();
        let mut counters = self.counters.lock();
        let pending = std::mem::take(&mut counters.pending);
        if pending > 0 {
            counters.committed.add(now, pending, self.recent_window);
        }
    }

    /// Resolve the in-flight attempt as ignored.
    ///
    /// An attempt rejected before any undo still counts as one ignored
    /// event, so score-based rejections stay visible in the counters.
    pub fn record_ignored(&self) {
        let now = (self.time_supplier)();
        let mut counters = self.counters.lock();
        let pending = std::mem::take(&mut counters.pending).max(1);
        counters.ignored.add(now, pending, self.recent_window);
    }

    /// Read a counter.
    pub fn counter(&self, result: RollbackResult, counter_type: RollbackCounterType) -> u64 {
        let now = (self.time_supplier)();
        let mut counters = self.counters.lock();
        let family = match result {
            RollbackResult::Committed => &mut counters.committed,
            RollbackResult::Ignored => &mut counters.ignored,
        };
        match counter_type {
            RollbackCounterType::All => family.all,
            RollbackCounterType::Recent => family.recent_total(now, self.recent_window),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::RwLock;
    use std::sync::Arc;

    fn manual_clock() -> (Arc<RwLock<u64>>, TimeSupplier) {
        let now = Arc::new(RwLock::new(0u64));
        let clock = Arc::clone(&now);
        let supplier: TimeSupplier = Arc::new(move || Timestamp(*clock.read()));
        (now, supplier)
    }

    fn counters(info: &RollbackInfo) -> (u64, u64, u64, u64) {
        (
            info.counter(RollbackResult::Committed, RollbackCounterType::All),
            info.counter(RollbackResult::Committed, RollbackCounterType::Recent),
            info.counter(RollbackResult::Ignored, RollbackCounterType::All),
            info.counter(RollbackResult::Ignored, RollbackCounterType::Recent),
        )
    }

    #[test]
    fn save_folds_pending_into_committed() {
        let (_, supplier) = manual_clock();
        let info = RollbackInfo::new(supplier, Duration::from_secs(60));
        info.increment();
        info.increment();
        info.increment();
        info.save();
        assert_eq!(counters(&info), (3, 3, 0, 0));

        // A clean extension (no undos) leaves the counters untouched.
        info.save();
        assert_eq!(counters(&info), (3, 3, 0, 0));
    }

    #[test]
    fn reset_discards_pending() {
        let (_, supplier) = manual_clock();
        let info = RollbackInfo::new(supplier, Duration::from_secs(60));
        info.increment();
        info.reset();
        info.save();
        assert_eq!(counters(&info), (0, 0, 0, 0));
    }

    #[test]
    fn ignored_counts_at_least_one_event() {
        let (_, supplier) = manual_clock();
        let info = RollbackInfo::new(supplier, Duration::from_secs(60));

        // Score rejection with no undos.
        info.record_ignored();
        assert_eq!(counters(&info), (0, 0, 1, 1));

        // Stateful failure after two undos.
        info.increment();
        info.increment();
        info.record_ignored();
        assert_eq!(counters(&info), (0, 0, 3, 3));
    }

    #[test]
    fn recent_counters_decay_with_time() {
        let (now, supplier) = manual_clock();
        let info = RollbackInfo::new(supplier, Duration::from_secs(60));

        info.increment();
        info.save();
        assert_eq!(counters(&info), (1, 1, 0, 0));

        *now.write() = 59_999;
        assert_eq!(
            info.counter(RollbackResult::Committed, RollbackCounterType::Recent),
            1
        );

        *now.write() = 61_000;
        assert_eq!(
            info.counter(RollbackResult::Committed, RollbackCounterType::Recent),
            0
        );
        // The all-time counter never decays.
        assert_eq!(
            info.counter(RollbackResult::Committed, RollbackCounterType::All),
            1
        );
    }

    #[test]
    fn recent_never_exceeds_all() {
        let (now, supplier) = manual_clock();
        let info = RollbackInfo::new(supplier, Duration::from_secs(60));
        for round in 0..5u64 {
            *now.write() = round * 30_000;
            info.increment();
            info.save();
            let all = info.counter(RollbackResult::Committed, RollbackCounterType::All);
            let recent = info.counter(RollbackResult::Committed, RollbackCounterType::Recent);
            assert!(recent <= all);
        }
    }
}
