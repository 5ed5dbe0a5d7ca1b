//! Node assembly: configuration, hooks, counters, the two ingest pipelines,
//! and the `estuaryd` server bootstrap.

mod config;
mod counters;
mod hooks;
mod service;
pub mod server;
mod tasks;

pub use config::{ConfigError, EstuaryConfig, GenesisAccount, GenesisConfig, NodeConfig};
pub use counters::CounterRegistry;
pub use hooks::{
    BlockRangeConsumer, BlockRangeConsumerFactory, CompletionAwareBlockRangeConsumer,
    CompletionAwareBlockRangeConsumerFactory, HooksError, NewTransactionsSink, NodeHooks,
    NodeHooksBuilder, TransactionRangeConsumer, TransactionRangeConsumerFactory,
};
pub use service::{DispatcherService, ServiceError, ServiceState};
pub use tasks::spawn_batch_transaction_task;
