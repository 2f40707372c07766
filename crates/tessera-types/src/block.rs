//! Consensus-ordered blocks.
//!
//! A block is the unit the ordering service delivers to the bridge: a finite,
//! ordered batch of transactions with a consensus-assigned index.

use crate::hash::{BlockHash, Hash32};
use crate::transaction::{Transaction, TransactionId};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// An ordered batch of transactions confirmed by the ordering service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Consensus-assigned index. The first block of a chain has index 1.
    pub index: u64,

    /// Content identifier assigned by the ordering service.
    pub hash: BlockHash,

    /// Transactions in consensus order.
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Creates a block and derives its hash from the index and transaction ids.
    pub fn new(index: u64, transactions: Vec<Transaction>) -> Self {
        let hash = Self::compute_hash(index, &transactions);
        Self {
            index,
            hash,
            transactions,
        }
    }

    /// Creates a block carrying a hash chosen by the ordering service.
    pub fn with_hash(index: u64, hash: BlockHash, transactions: Vec<Transaction>) -> Self {
        Self {
            index,
            hash,
            transactions,
        }
    }

    /// Returns the number of transactions.
    pub fn tx_count(&self) -> usize {
        self.transactions.len()
    }

    /// Returns an iterator over transaction ids.
    pub fn transaction_ids(&self) -> impl Iterator<Item = TransactionId> + '_ {
        self.transactions.iter().map(Transaction::id)
    }

    fn compute_hash(index: u64, transactions: &[Transaction]) -> BlockHash {
        let mut hasher = Sha256::new();
        hasher.update(b"tessera/block/v1");
        hasher.update(index.to_be_bytes());
        for tx in transactions {
            hasher.update(tx.id().as_bytes());
        }
        Hash32::from_bytes(hasher.finalize().into())
    }
}
