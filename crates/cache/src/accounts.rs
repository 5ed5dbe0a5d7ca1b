//! Account-state sub-cache.

use estuary_types::Address;
use thiserror::Error;

/// Errors from account mutations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    #[error("account {0:?} has insufficient balance: {available} < {required}")]
    InsufficientBalance {
        /// The debited account.
        address: Address,
        /// Balance on hand.
        available: u64,
        /// Amount requested.
        required: u64,
    },
}

/// State tracked per account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountState {
    /// The account address.
    pub address: Address,
    /// Spendable balance in base units.
    pub balance: u64,
}

/// Balances keyed by address.
///
/// Backed by an `im` persistent map so clones share structure; a delta's
/// mutations never disturb the snapshot they were forked from.
#[derive(Debug, Clone, Default)]
pub struct AccountStateCache {
    accounts: im::HashMap<Address, AccountState>,
}

impl AccountStateCache {
    /// An empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current balance of an account; unknown accounts hold zero.
    pub fn balance(&self, address: &Address) -> u64 {
        self.accounts.get(address).map_or(0, |state| state.balance)
    }

    /// Whether the account has ever been credited.
    pub fn contains(&self, address: &Address) -> bool {
        self.accounts.contains_key(address)
    }

    /// Add funds to an account, creating it if needed.
    pub fn credit(&mut self, address: Address, amount: u64) {
        self.accounts
            .entry(address)
            .or_insert_with(|| AccountState {
                address,
                balance: 0,
            })
            .balance += amount;
    }

    /// Remove funds from an account.
    pub fn debit(&mut self, address: Address, amount: u64) -> Result<(), CacheError> {
        let available = self.balance(&address);
        if available < amount {
            return Err(CacheError::InsufficientBalance {
                address,
                available,
                required: amount,
            });
        }
        if let Some(state) = self.accounts.get_mut(&address) {
            state.balance = available - amount;
        }
        Ok(())
    }

    /// Number of known accounts.
    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    /// Whether no accounts are known.
    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use estuary_types::PublicKey;

    fn address(seed: u8) -> Address {
        PublicKey([seed; 32]).address()
    }

    #[test]
    fn credit_then_debit() {
        let mut cache = AccountStateCache::new();
        let a = address(1);
        cache.credit(a, 100);
        assert_eq!(cache.balance(&a), 100);
        cache.debit(a, 40).unwrap();
        assert_eq!(cache.balance(&a), 60);
    }

    #[test]
    fn debit_rejects_overdraft() {
        let mut cache = AccountStateCache::new();
        let a = address(1);
        cache.credit(a, 10);
        let err = cache.debit(a, 11).unwrap_err();
        assert_eq!(
            err,
            CacheError::InsufficientBalance {
                address: a,
                available: 10,
                required: 11
            }
        );
        assert_eq!(cache.balance(&a), 10);
    }

    #[test]
    fn clones_do_not_share_mutations() {
        let mut cache = AccountStateCache::new();
        let a = address(1);
        cache.credit(a, 100);

        let snapshot = cache.clone();
        cache.debit(a, 100).unwrap();
        assert_eq!(cache.balance(&a), 0);
        assert_eq!(snapshot.balance(&a), 100);
    }
}
