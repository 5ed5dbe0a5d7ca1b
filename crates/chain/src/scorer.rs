//! Difficulty expectations and chain scores.

use crate::ChainConfig;
use estuary_cache::{BlockDifficultyCache, DifficultyInfo};
use estuary_types::{BlockElement, Difficulty};

/// Per-adjustment clamp on difficulty movement, in percent.
const MAX_ADJUSTMENT_PERCENT: u128 = 5;

/// Expected difficulty of the next block given the trailing history.
///
/// The average trailing difficulty is scaled by how fast blocks actually
/// arrived versus the target spacing, then clamped to ±5% of the last
/// difficulty so a single burst cannot swing the target. All arithmetic is
/// integral and deterministic.
pub fn calculate_difficulty(history: &[DifficultyInfo], config: &ChainConfig) -> Difficulty {
    let Some(last) = history.last() else {
        return Difficulty::MIN;
    };
    if history.len() < 2 {
        return last.difficulty.clamped();
    }

    let total_difficulty: u128 = history
        .iter()
        .map(|info| u128::from(info.difficulty.value()))
        .sum();
    let average_difficulty = total_difficulty / history.len() as u128;

    let gaps = history.len() as u128 - 1;
    let elapsed_ms = u128::from(
        history[history.len() - 1]
            .timestamp
            .millis()
            .saturating_sub(history[0].timestamp.millis()),
    );
    let average_gap_ms = (elapsed_ms / gaps).max(1);

    let target_ms = u128::from(config.target_block_time_ms.max(1));
    let raw = average_difficulty * target_ms / average_gap_ms;

    let last_difficulty = u128::from(last.difficulty.value());
    let floor = last_difficulty * (100 - MAX_ADJUSTMENT_PERCENT) / 100;
    let ceiling = last_difficulty * (100 + MAX_ADJUSTMENT_PERCENT) / 100;
    let clamped = raw.clamp(floor, ceiling);

    Difficulty(clamped.min(u128::from(u64::MAX)) as u64).clamped()
}

/// Check the incoming blocks' difficulties against expectations.
///
/// Returns the number of leading blocks whose difficulty matches; the range
/// is consistent when the count equals the range length.
pub fn check_difficulties(
    cache: &BlockDifficultyCache,
    elements: &[BlockElement],
    config: &ChainConfig,
) -> usize {
    let Some(first) = elements.first() else {
        return 0;
    };

    let mut window = cache.recent_up_to(first.block.height.prev(), config.max_difficulty_blocks);
    let mut matched = 0;
    for element in elements {
        let expected = calculate_difficulty(&window, config);
        if element.block.difficulty != expected {
            break;
        }
        matched += 1;
        window.push(DifficultyInfo {
            height: element.block.height,
            timestamp: element.block.timestamp,
            difficulty: element.block.difficulty,
        });
        if window.len() > config.max_difficulty_blocks {
            window.remove(0);
        }
    }
    matched
}

/// Summed score contribution of a run of blocks.
pub fn partial_score<'a>(elements: impl IntoIterator<Item = &'a BlockElement>) -> u128 {
    elements
        .into_iter()
        .map(|element| u128::from(element.block.difficulty.value()))
        .sum()
}
