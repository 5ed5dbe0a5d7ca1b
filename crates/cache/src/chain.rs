//! The composite cache: snapshots, deltas, atomic commit.

use crate::{AccountStateCache, BlockDifficultyCache};
use parking_lot::RwLock;
use tracing::debug;

/// The full cache contents at one point in time.
#[derive(Debug, Clone)]
struct State {
    accounts: AccountStateCache,
    difficulties: BlockDifficultyCache,
    /// Generation counter, bumped on every commit.
    generation: u64,
}

/// Immutable snapshot of the composite cache.
///
/// Cheap to create and to keep; later commits do not show through.
#[derive(Debug, Clone)]
pub struct CacheView {
    state: State,
}

impl CacheView {
    /// Account-state sub-cache.
    pub fn accounts(&self) -> &AccountStateCache {
        &self.state.accounts
    }

    /// Block-difficulty sub-cache.
    pub fn difficulties(&self) -> &BlockDifficultyCache {
        &self.state.difficulties
    }

    /// Commit generation this view was taken at.
    pub fn generation(&self) -> u64 {
        self.state.generation
    }
}

/// An isolated mutable copy of the composite cache.
///
/// All mutations land here; dropping the delta discards them, committing it
/// replaces the live cache in one atomic step.
#[derive(Debug)]
pub struct CacheDelta {
    state: State,
}

impl CacheDelta {
    /// Read access to the (possibly modified) account sub-cache.
    pub fn accounts(&self) -> &AccountStateCache {
        &self.state.accounts
    }

    /// Mutable account sub-cache.
    pub fn accounts_mut(&mut self) -> &mut AccountStateCache {
        &mut self.state.accounts
    }

    /// Read access to the (possibly modified) difficulty sub-cache.
    pub fn difficulties(&self) -> &BlockDifficultyCache {
        &self.state.difficulties
    }

    /// Mutable difficulty sub-cache.
    pub fn difficulties_mut(&mut self) -> &mut BlockDifficultyCache {
        &mut self.state.difficulties
    }

    /// Generation of the live cache this delta was forked from.
    pub fn base_generation(&self) -> u64 {
        self.state.generation
    }
}

/// The live composite cache.
///
/// The chain-sync consumer is the only writer; everything else takes views.
#[derive(Debug)]
pub struct ChainCache {
    state: RwLock<State>,
}

impl ChainCache {
    /// An empty cache whose difficulty sub-cache retains `retention` records.
    pub fn new(difficulty_retention: usize) -> Self {
        Self {
            state: RwLock::new(State {
                accounts: AccountStateCache::new(),
                difficulties: BlockDifficultyCache::new(difficulty_retention),
                generation: 0,
            }),
        }
    }

    /// Take an immutable snapshot of the current state.
    pub fn read(&self) -> CacheView {
        CacheView {
            state: self.state.read().clone(),
        }
    }

    /// Fork a mutable delta off the current state.
    pub fn begin_delta(&self) -> CacheDelta {
        CacheDelta {
            state: self.state.read().clone(),
        }
    }

    /// Atomically replace the live state with a delta's state.
    ///
    /// The write lock makes the swap a single atomic transition; at most one
    /// commit is in flight at any time.
    pub fn commit(&self, delta: CacheDelta) {
        let mut state = self.state.write();
        let generation = state.generation + 1;
        *state = delta.state;
        state.generation = generation;
        debug!(generation, "cache committed");
    }
}
