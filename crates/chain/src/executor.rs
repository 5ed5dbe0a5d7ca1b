//! Applying and rolling back single blocks.

use crate::{EntityObserver, ObserverMode, ValidationError};
use estuary_cache::CacheDelta;
use estuary_types::BlockElement;
use tracing::debug;

/// Apply a block's effects to a delta: transactions in order, then the block
/// entity itself.
pub fn execute_block(
    element: &BlockElement,
    observer: &dyn EntityObserver,
    delta: &mut CacheDelta,
) -> Result<(), ValidationError> {
    for tx_element in &element.transaction_elements {
        observer.notify_transaction(&tx_element.transaction, delta, ObserverMode::Commit)?;
    }
    observer.notify_block(element, delta, ObserverMode::Commit)
}

/// Reverse a block's effects: the block entity first, then its transactions
/// in reverse order.
pub fn rollback_block(
    element: &BlockElement,
    observer: &dyn EntityObserver,
    delta: &mut CacheDelta,
) -> Result<(), ValidationError> {
    debug!(height = element.block.height.0, "rolling back block");
    observer.notify_block(element, delta, ObserverMode::Rollback)?;
    for tx_element in element.transaction_elements.iter().rev() {
        observer.notify_transaction(&tx_element.transaction, delta, ObserverMode::Rollback)?;
    }
    Ok(())
}
