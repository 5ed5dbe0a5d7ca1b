//! Chain-level configuration.

use serde::Deserialize;
use std::time::Duration;

const DEFAULT_TARGET_BLOCK_TIME_MS: u64 = 15_000;
const DEFAULT_MAX_BLOCK_FUTURE_TIME_MS: u64 = 10_000;
const DEFAULT_MAX_ROLLBACK_BLOCKS: u64 = 360;
const DEFAULT_MAX_DIFFICULTY_BLOCKS: usize = 60;

/// Consensus-facing knobs of the chain.
#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    /// Desired spacing between blocks, in milliseconds.
    #[serde(default = "default_target_block_time_ms")]
    pub target_block_time_ms: u64,

    /// How far past the local clock a block timestamp may lie.
    #[serde(default = "default_max_block_future_time_ms")]
    pub max_block_future_time_ms: u64,

    /// Deepest fork the node will switch to.
    #[serde(default = "default_max_rollback_blocks")]
    pub max_rollback_blocks: u64,

    /// Number of trailing blocks feeding the difficulty expectation.
    #[serde(default = "default_max_difficulty_blocks")]
    pub max_difficulty_blocks: usize,
}

fn default_target_block_time_ms() -> u64 {
    DEFAULT_TARGET_BLOCK_TIME_MS
}

fn default_max_block_future_time_ms() -> u64 {
    DEFAULT_MAX_BLOCK_FUTURE_TIME_MS
}

fn default_max_rollback_blocks() -> u64 {
    DEFAULT_MAX_ROLLBACK_BLOCKS
}

fn default_max_difficulty_blocks() -> usize {
    DEFAULT_MAX_DIFFICULTY_BLOCKS
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            target_block_time_ms: DEFAULT_TARGET_BLOCK_TIME_MS,
            max_block_future_time_ms: DEFAULT_MAX_BLOCK_FUTURE_TIME_MS,
            max_rollback_blocks: DEFAULT_MAX_ROLLBACK_BLOCKS,
            max_difficulty_blocks: DEFAULT_MAX_DIFFICULTY_BLOCKS,
        }
    }
}

impl ChainConfig {
    /// Desired spacing between blocks.
    pub fn target_block_time(&self) -> Duration {
        Duration::from_millis(self.target_block_time_ms)
    }

    /// How far past the local clock a block timestamp may lie.
    pub fn max_block_future_time(&self) -> Duration {
        Duration::from_millis(self.max_block_future_time_ms)
    }

    /// Full rollback window: deepest fork times target spacing.
    pub fn full_rollback_duration(&self) -> Duration {
        Duration::from_millis(self.max_rollback_blocks * self.target_block_time_ms)
    }

    /// Half the rollback window; the "recent" counter horizon.
    pub fn half_rollback_duration(&self) -> Duration {
        self.full_rollback_duration() / 2
    }
}
