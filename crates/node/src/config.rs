//! Node configuration.
//!
//! Loaded from `estuary.toml` under the resources directory. Every field has
//! a default so a minimal file (or none of a section) still boots a sane
//! node. Durations are integer milliseconds in TOML.

use estuary_chain::ChainConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors from loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        /// The offending path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        /// The offending path.
        path: PathBuf,
        /// Underlying TOML error.
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Ingest-pipeline knobs.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    /// Block dispatcher ring capacity.
    #[serde(default = "default_block_disruptor_size")]
    pub block_disruptor_size: usize,

    /// Transaction dispatcher ring capacity.
    #[serde(default = "default_transaction_disruptor_size")]
    pub transaction_disruptor_size: usize,

    /// Trace-log every Nth block element.
    #[serde(default = "default_block_element_trace_interval")]
    pub block_element_trace_interval: u64,

    /// Trace-log every Nth transaction element.
    #[serde(default = "default_transaction_element_trace_interval")]
    pub transaction_element_trace_interval: u64,

    /// Fail submissions instead of blocking when a ring is full.
    #[serde(default)]
    pub should_abort_when_dispatcher_is_full: bool,

    /// Persist every dispatcher input under the data directory.
    #[serde(default)]
    pub should_audit_dispatcher_inputs: bool,

    /// Resolve transaction addresses inside the pipelines.
    #[serde(default)]
    pub should_precompute_transaction_addresses: bool,

    /// TTL of the block seen-hash cache, in milliseconds.
    #[serde(default = "default_short_lived_cache_block_duration_ms")]
    pub short_lived_cache_block_duration_ms: u64,

    /// TTL of the transaction seen-hash cache, in milliseconds.
    #[serde(default = "default_short_lived_cache_transaction_duration_ms")]
    pub short_lived_cache_transaction_duration_ms: u64,

    /// Sweep interval of the seen-hash caches, in milliseconds.
    #[serde(default = "default_short_lived_cache_pruning_interval_ms")]
    pub short_lived_cache_pruning_interval_ms: u64,

    /// Hard cap on entries per seen-hash cache.
    #[serde(default = "default_short_lived_cache_max_size")]
    pub short_lived_cache_max_size: usize,

    /// Largest block range a single sync attempt may carry.
    #[serde(default = "default_max_blocks_per_sync_attempt")]
    pub max_blocks_per_sync_attempt: usize,

    /// Flush interval of the transaction range batcher, in milliseconds.
    #[serde(default = "default_batch_dispatch_interval_ms")]
    pub batch_dispatch_interval_ms: u64,

    /// Maximum transactions held by the unconfirmed pool.
    #[serde(default = "default_max_unconfirmed_transactions")]
    pub max_unconfirmed_transactions: usize,

    /// Unconfirmed-pool fill ratio beyond which the throttle rejects.
    #[serde(default = "default_ut_throttle_fill_ratio")]
    pub ut_throttle_fill_ratio: f64,

    /// Threads in the isolated validator pool; 0 picks a size from the
    /// available parallelism.
    #[serde(default)]
    pub validator_threads: usize,

    /// Root of all node-owned on-disk state.
    #[serde(default = "default_data_directory")]
    pub data_directory: PathBuf,
}

fn default_block_disruptor_size() -> usize {
    4_096
}

fn default_transaction_disruptor_size() -> usize {
    8_192
}

fn default_block_element_trace_interval() -> u64 {
    1
}

fn default_transaction_element_trace_interval() -> u64 {
    10
}

fn default_short_lived_cache_block_duration_ms() -> u64 {
    100_000
}

fn default_short_lived_cache_transaction_duration_ms() -> u64 {
    10_000
}

fn default_short_lived_cache_pruning_interval_ms() -> u64 {
    90_000
}

fn default_short_lived_cache_max_size() -> usize {
    10_000_000
}

fn default_max_blocks_per_sync_attempt() -> usize {
    400
}

fn default_batch_dispatch_interval_ms() -> u64 {
    100
}

fn default_max_unconfirmed_transactions() -> usize {
    100_000
}

fn default_ut_throttle_fill_ratio() -> f64 {
    0.9
}

fn default_data_directory() -> PathBuf {
    PathBuf::from("data")
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            block_disruptor_size: default_block_disruptor_size(),
            transaction_disruptor_size: default_transaction_disruptor_size(),
            block_element_trace_interval: default_block_element_trace_interval(),
            transaction_element_trace_interval: default_transaction_element_trace_interval(),
            should_abort_when_dispatcher_is_full: false,
            should_audit_dispatcher_inputs: false,
            should_precompute_transaction_addresses: false,
            short_lived_cache_block_duration_ms: default_short_lived_cache_block_duration_ms(),
            short_lived_cache_transaction_duration_ms:
                default_short_lived_cache_transaction_duration_ms(),
            short_lived_cache_pruning_interval_ms:
                default_short_lived_cache_pruning_interval_ms(),
            short_lived_cache_max_size: default_short_lived_cache_max_size(),
            max_blocks_per_sync_attempt: default_max_blocks_per_sync_attempt(),
            batch_dispatch_interval_ms: default_batch_dispatch_interval_ms(),
            max_unconfirmed_transactions: default_max_unconfirmed_transactions(),
            ut_throttle_fill_ratio: default_ut_throttle_fill_ratio(),
            validator_threads: 0,
            data_directory: default_data_directory(),
        }
    }
}

impl NodeConfig {
    /// TTL of the block seen-hash cache.
    pub fn short_lived_cache_block_duration(&self) -> Duration {
        Duration::from_millis(self.short_lived_cache_block_duration_ms)
    }

    /// TTL of the transaction seen-hash cache.
    pub fn short_lived_cache_transaction_duration(&self) -> Duration {
        Duration::from_millis(self.short_lived_cache_transaction_duration_ms)
    }

    /// Sweep interval of the seen-hash caches.
    pub fn short_lived_cache_pruning_interval(&self) -> Duration {
        Duration::from_millis(self.short_lived_cache_pruning_interval_ms)
    }

    /// Flush interval of the transaction range batcher.
    pub fn batch_dispatch_interval(&self) -> Duration {
        Duration::from_millis(self.batch_dispatch_interval_ms)
    }
}

/// One pre-funded account.
#[derive(Debug, Clone, Deserialize)]
pub struct GenesisAccount {
    /// Hex-encoded 32-byte public key.
    pub public_key: String,
    /// Initial balance in base units.
    pub balance: u64,
}

/// Initial chain state.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GenesisConfig {
    /// Accounts funded at boot.
    #[serde(default)]
    pub accounts: Vec<GenesisAccount>,
}

/// The full configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EstuaryConfig {
    /// Ingest-pipeline knobs.
    #[serde(default)]
    pub node: NodeConfig,
    /// Consensus-facing chain knobs.
    #[serde(default)]
    pub chain: ChainConfig,
    /// Initial accounts.
    #[serde(default)]
    pub genesis: GenesisConfig,
}

impl EstuaryConfig {
    /// Load `estuary.toml` from the resources directory and validate it.
    pub fn load_from_path(resources: &Path) -> Result<Self, ConfigError> {
        let path = resources.join("estuary.toml");
        let contents = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        let config: EstuaryConfig =
            toml::from_str(&contents).map_err(|source| ConfigError::Parse { path, source })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the pipelines cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.node.block_disruptor_size == 0 {
            return Err(ConfigError::Invalid(
                "block_disruptor_size must be non-zero".into(),
            ));
        }
        if self.node.transaction_disruptor_size == 0 {
            return Err(ConfigError::Invalid(
                "transaction_disruptor_size must be non-zero".into(),
            ));
        }
        if self.node.max_blocks_per_sync_attempt == 0 {
            return Err(ConfigError::Invalid(
                "max_blocks_per_sync_attempt must be non-zero".into(),
            ));
        }
        if self.chain.max_rollback_blocks == 0 {
            return Err(ConfigError::Invalid(
                "max_rollback_blocks must be non-zero".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.node.ut_throttle_fill_ratio) {
            return Err(ConfigError::Invalid(
                "ut_throttle_fill_ratio must lie in [0, 1]".into(),
            ));
        }
        for account in &self.genesis.accounts {
            if hex::decode(&account.public_key).map(|b| b.len()) != Ok(32) {
                return Err(ConfigError::Invalid(format!(
                    "genesis public key {} is not 32 hex-encoded bytes",
                    account.public_key
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config: EstuaryConfig = toml::from_str("").unwrap();
        config.validate().unwrap();
        assert_eq!(config.node.block_disruptor_size, 4_096);
        assert_eq!(config.chain.max_rollback_blocks, 360);
        assert!(config.genesis.accounts.is_empty());
    }

    #[test]
    fn sections_override_defaults() {
        let config: EstuaryConfig = toml::from_str(
            r#"
            [node]
            block_disruptor_size = 16
            should_abort_when_dispatcher_is_full = true
            short_lived_cache_block_duration_ms = 5000

            [chain]
            max_rollback_blocks = 40

            [[genesis.accounts]]
            public_key = "0101010101010101010101010101010101010101010101010101010101010101"
            balance = 500
            "#,
        )
        .unwrap();
        config.validate().unwrap();
        assert_eq!(config.node.block_disruptor_size, 16);
        assert!(config.node.should_abort_when_dispatcher_is_full);
        assert_eq!(
            config.node.short_lived_cache_block_duration(),
            Duration::from_secs(5)
        );
        assert_eq!(config.chain.max_rollback_blocks, 40);
        assert_eq!(config.genesis.accounts.len(), 1);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let config: EstuaryConfig = toml::from_str("[node]\nblock_disruptor_size = 0").unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let config: EstuaryConfig =
            toml::from_str("[[genesis.accounts]]\npublic_key = \"zz\"\nbalance = 1").unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }
}
