//! Transfer transactions.

use crate::{Address, Hash, PublicKey, Timestamp};

/// A signed transfer of funds between two accounts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    /// Public key of the sending account.
    pub signer: PublicKey,
    /// Receiving account.
    pub recipient: Address,
    /// Amount transferred, in base units.
    pub amount: u64,
    /// Fee paid to the block harvester.
    pub fee: u64,
    /// Latest network time at which the transaction may confirm.
    pub deadline: Timestamp,
}

impl Transaction {
    /// Canonical byte layout, used for hashing and auditing.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(32 + 32 + 8 + 8 + 8);
        bytes.extend_from_slice(self.signer.as_bytes());
        bytes.extend_from_slice(self.recipient.as_bytes());
        bytes.extend_from_slice(&self.amount.to_le_bytes());
        bytes.extend_from_slice(&self.fee.to_le_bytes());
        bytes.extend_from_slice(&self.deadline.millis().to_le_bytes());
        bytes
    }

    /// Entity hash of this transaction.
    pub fn hash(&self) -> Hash {
        Hash::from_bytes(&self.to_bytes())
    }
}
