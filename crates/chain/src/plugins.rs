//! Execution-layer contracts and the built-in transfer implementations.
//!
//! The ingest pipeline is generic over how entities are validated and
//! executed; the traits here are that seam. [`ExecutionPlugins`] bundles one
//! implementation of each concern and is handed to the pipeline assembly by
//! reference.

use estuary_cache::{AccountStateCache, CacheDelta, CacheError, DifficultyInfo};
use estuary_types::{Address, Block, BlockElement, Height, Timestamp, Transaction};
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;

/// Reasons an entity failed validation or execution.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("transaction amount is zero")]
    ZeroAmount,

    #[error("transaction signer is not set")]
    MissingSigner,

    #[error("transaction deadline {deadline} has passed (now {now})")]
    DeadlinePassed {
        /// The transaction deadline.
        deadline: Timestamp,
        /// Validation time.
        now: Timestamp,
    },

    #[error("block transactions hash does not match its transactions")]
    TransactionsHashMismatch,

    #[error("block harvester is not set")]
    MissingHarvester,

    #[error("account balance cannot cover the transfer")]
    InsufficientBalance,

    #[error("rejected by the unconfirmed-pool throttle")]
    RejectedByThrottle,
}

impl From<CacheError> for ValidationError {
    fn from(_: CacheError) -> Self {
        ValidationError::InsufficientBalance
    }
}

/// Context a stateful check runs in.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionContext {
    /// Height the entity would confirm at.
    pub height: Height,
    /// Network time to validate deadlines against.
    pub time: Timestamp,
}

/// Checks that depend only on the entity bytes, never on chain state.
pub trait StatelessValidator: Send + Sync {
    /// Validate a single transaction.
    fn validate_transaction(&self, transaction: &Transaction) -> Result<(), ValidationError>;

    /// Validate a block shell (its transactions are validated separately).
    fn validate_block(&self, block: &Block) -> Result<(), ValidationError>;
}

/// Checks that run against live account state.
pub trait StatefulValidator: Send + Sync {
    /// Validate a transaction against the given account state.
    fn validate(
        &self,
        transaction: &Transaction,
        context: &ExecutionContext,
        accounts: &AccountStateCache,
    ) -> Result<(), ValidationError>;
}

/// Resolves the addresses a transaction touches.
pub trait NotificationPublisher: Send + Sync {
    /// All addresses affected by the transaction.
    fn publish_addresses(&self, transaction: &Transaction) -> BTreeSet<Address>;
}

/// Whether an observer call applies or reverses an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObserverMode {
    /// Apply the entity's effects.
    Commit,
    /// Reverse the entity's effects.
    Rollback,
}

/// Applies entity effects to a cache delta, forwards or in reverse.
pub trait EntityObserver: Send + Sync {
    /// Observe a transaction.
    fn notify_transaction(
        &self,
        transaction: &Transaction,
        delta: &mut CacheDelta,
        mode: ObserverMode,
    ) -> Result<(), ValidationError>;

    /// Observe the block entity itself (fees, difficulty bookkeeping).
    fn notify_block(
        &self,
        element: &BlockElement,
        delta: &mut CacheDelta,
        mode: ObserverMode,
    ) -> Result<(), ValidationError>;
}

/// One implementation of every execution-layer concern.
#[derive(Clone)]
pub struct ExecutionPlugins {
    /// Stateless validation.
    pub stateless_validator: Arc<dyn StatelessValidator>,
    /// Stateful validation.
    pub stateful_validator: Arc<dyn StatefulValidator>,
    /// Entity observation (execute / undo).
    pub observer: Arc<dyn EntityObserver>,
    /// Address resolution.
    pub publisher: Arc<dyn NotificationPublisher>,
}

impl ExecutionPlugins {
    /// The built-in transfer semantics.
    pub fn transfer() -> Self {
        Self {
            stateless_validator: Arc::new(TransferStatelessValidator),
            stateful_validator: Arc::new(TransferStatefulValidator),
            observer: Arc::new(TransferObserver),
            publisher: Arc::new(TransferPublisher),
        }
    }
}

/// Built-in stateless rules for transfer transactions and blocks.
pub struct TransferStatelessValidator;

impl StatelessValidator for TransferStatelessValidator {
    fn validate_transaction(&self, transaction: &Transaction) -> Result<(), ValidationError> {
        if transaction.signer.as_bytes().iter().all(|&b| b == 0) {
            return Err(ValidationError::MissingSigner);
        }
        if transaction.amount == 0 {
            return Err(ValidationError::ZeroAmount);
        }
        Ok(())
    }

    fn validate_block(&self, block: &Block) -> Result<(), ValidationError> {
        if block.harvester.as_bytes().iter().all(|&b| b == 0) && block.height.0 > 1 {
            return Err(ValidationError::MissingHarvester);
        }
        if Block::merkle_root(&block.transactions) != block.transactions_hash {
            return Err(ValidationError::TransactionsHashMismatch);
        }
        Ok(())
    }
}

/// Built-in stateful rules for transfer transactions.
pub struct TransferStatefulValidator;

impl StatefulValidator for TransferStatefulValidator {
    fn validate(
        &self,
        transaction: &Transaction,
        context: &ExecutionContext,
        accounts: &AccountStateCache,
    ) -> Result<(), ValidationError> {
        if transaction.deadline < context.time {
            return Err(ValidationError::DeadlinePassed {
                deadline: transaction.deadline,
                now: context.time,
            });
        }
        let required = transaction.amount.saturating_add(transaction.fee);
        let available = accounts.balance(&transaction.signer.address());
        if available < required {
            return Err(ValidationError::InsufficientBalance);
        }
        Ok(())
    }
}

/// Built-in transfer effects.
pub struct TransferObserver;

impl EntityObserver for TransferObserver {
    fn notify_transaction(
        &self,
        transaction: &Transaction,
        delta: &mut CacheDelta,
        mode: ObserverMode,
    ) -> Result<(), ValidationError> {
        let signer = transaction.signer.address();
        let total = transaction.amount.saturating_add(transaction.fee);
        let accounts = delta.accounts_mut();
        match mode {
            ObserverMode::Commit => {
                accounts.debit(signer, total)?;
                accounts.credit(transaction.recipient, transaction.amount);
            }
            ObserverMode::Rollback => {
                accounts.debit(transaction.recipient, transaction.amount)?;
                accounts.credit(signer, total);
            }
        }
        Ok(())
    }

    fn notify_block(
        &self,
        element: &BlockElement,
        delta: &mut CacheDelta,
        mode: ObserverMode,
    ) -> Result<(), ValidationError> {
        let block = &element.block;
        let fees: u64 = block.transactions.iter().map(|tx| tx.fee).sum();
        let harvester = block.harvester.address();
        match mode {
            ObserverMode::Commit => {
                if fees > 0 {
                    delta.accounts_mut().credit(harvester, fees);
                }
                delta.difficulties_mut().insert(DifficultyInfo {
                    height: block.height,
                    timestamp: block.timestamp,
                    difficulty: block.difficulty,
                });
            }
            ObserverMode::Rollback => {
                if fees > 0 {
                    delta.accounts_mut().debit(harvester, fees)?;
                }
                delta.difficulties_mut().remove_above(block.height.prev());
            }
        }
        Ok(())
    }
}

/// Built-in address resolution: a transfer touches its signer and recipient.
pub struct TransferPublisher;

impl NotificationPublisher for TransferPublisher {
    fn publish_addresses(&self, transaction: &Transaction) -> BTreeSet<Address> {
        let mut addresses = BTreeSet::new();
        addresses.insert(transaction.signer.address());
        addresses.insert(transaction.recipient);
        addresses
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use estuary_types::PublicKey;

    fn transaction(amount: u64) -> Transaction {
        Transaction {
            signer: PublicKey([1u8; 32]),
            recipient: PublicKey([2u8; 32]).address(),
            amount,
            fee: 5,
            deadline: Timestamp(60_000),
        }
    }

    #[test]
    fn stateless_rejects_zero_amount_and_missing_signer() {
        let validator = TransferStatelessValidator;
        assert!(validator.validate_transaction(&transaction(10)).is_ok());
        assert_eq!(
            validator.validate_transaction(&transaction(0)),
            Err(ValidationError::ZeroAmount)
        );

        let mut unsigned = transaction(10);
        unsigned.signer = PublicKey::ZERO;
        assert_eq!(
            validator.validate_transaction(&unsigned),
            Err(ValidationError::MissingSigner)
        );
    }

    #[test]
    fn stateful_enforces_deadline_and_balance() {
        let validator = TransferStatefulValidator;
        let mut accounts = AccountStateCache::new();
        let tx = transaction(10);
        let context = ExecutionContext {
            height: Height(2),
            time: Timestamp(1_000),
        };

        assert_eq!(
            validator.validate(&tx, &context, &accounts),
            Err(ValidationError::InsufficientBalance)
        );

        accounts.credit(tx.signer.address(), 15);
        assert!(validator.validate(&tx, &context, &accounts).is_ok());

        let late = ExecutionContext {
            height: Height(2),
            time: Timestamp(61_000),
        };
        assert!(matches!(
            validator.validate(&tx, &late, &accounts),
            Err(ValidationError::DeadlinePassed { .. })
        ));
    }

    #[test]
    fn publisher_resolves_both_parties() {
        let tx = transaction(10);
        let addresses = TransferPublisher.publish_addresses(&tx);
        assert!(addresses.contains(&tx.signer.address()));
        assert!(addresses.contains(&tx.recipient));
        assert_eq!(addresses.len(), 2);
    }
}
