//! Stateful processing of an incoming block suffix.

use crate::{execute_block, ExecutionContext, ExecutionPlugins, ProcessorFn, ValidationError};
use estuary_cache::CacheDelta;
use estuary_types::BlockElement;
use tracing::debug;

/// Build the sync processor: for each incoming block, statefully validate
/// its transactions against the working delta, then execute it.
///
/// The processor touches only the delta it is handed; a failure leaves the
/// live cache untouched because the caller discards the delta.
pub fn create_sync_processor(plugins: &ExecutionPlugins) -> ProcessorFn {
    let stateful_validator = plugins.stateful_validator.clone();
    let observer = plugins.observer.clone();
    Box::new(move |elements: &[BlockElement], delta: &mut CacheDelta| {
        for element in elements {
            let context = ExecutionContext {
                height: element.block.height,
                time: element.block.timestamp,
            };
            for tx_element in &element.transaction_elements {
                stateful_validator.validate(&tx_element.transaction, &context, delta.accounts())?;
            }
            execute_block(element, observer.as_ref(), delta)?;
            debug!(height = element.block.height.0, "executed block");
        }
        Ok::<(), ValidationError>(())
    })
}
