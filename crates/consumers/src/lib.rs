//! The block and transaction pipeline consumers.
//!
//! Each factory here returns one [`Consumer`](estuary_disruptor::Consumer)
//! stage; the node assembly arranges them in pipeline order:
//!
//! ```text
//! blocks:       [audit] → hash-calc → hash-check → [addresses] → chain-check
//!               → stateless-validate → chain-sync → new-block
//! transactions: [audit] → hash-calc → hash-check+known → [addresses]
//!               → stateless-validate → new-transactions
//! ```
//!
//! Bracketed stages are conditional on node configuration.

mod audit;
mod block;
mod hash_cache;
mod sync;
mod transaction;
mod validation;

pub use audit::create_audit_consumer;
pub use block::{
    create_block_address_extraction_consumer, create_block_chain_check_consumer,
    create_block_hash_calculator_consumer, create_block_hash_check_consumer,
    create_block_stateless_validation_consumer, create_new_block_consumer, NewBlockSink,
};
pub use hash_cache::{HashCheckOptions, ShortLivedHashCache};
pub use sync::create_block_chain_sync_consumer;
pub use transaction::{
    create_new_transactions_consumer, create_transaction_address_extraction_consumer,
    create_transaction_hash_calculator_consumer, create_transaction_hash_check_consumer,
    create_transaction_stateless_validation_consumer, KnownHashPredicate, NewTransactionsHandler,
};
pub use validation::ParallelValidationPolicy;
