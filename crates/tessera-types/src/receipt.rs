//! Execution receipts and commit outcomes.

use crate::hash::{BlockHash, StateHash};
use crate::transaction::TransactionId;
use serde::{Deserialize, Serialize};

/// Result of executing one transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReceiptStatus {
    /// The transaction was applied.
    Success,
    /// The transaction was rejected deterministically and left state untouched.
    Failed {
        /// Human-readable reason, identical on every honest replica.
        reason: String,
    },
}

impl ReceiptStatus {
    /// Byte folded into the state hash for this status.
    pub fn as_byte(&self) -> u8 {
        match self {
            ReceiptStatus::Success => 1,
            ReceiptStatus::Failed { .. } => 0,
        }
    }
}

/// Receipt recorded for every transaction of a committed block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    /// Transaction id.
    pub tx_id: TransactionId,
    /// Index of the block that carried the transaction.
    pub block_index: u64,
    /// Hash of the block that carried the transaction.
    pub block_hash: BlockHash,
    /// Position of the transaction within its block.
    pub index_in_block: u32,
    /// Execution status.
    #[serde(flatten)]
    pub status: ReceiptStatus,
}

impl Receipt {
    /// Returns true if the transaction was applied.
    pub fn is_success(&self) -> bool {
        matches!(self.status, ReceiptStatus::Success)
    }
}

/// A transaction that failed inside an otherwise committed block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxFailure {
    /// Position within the block.
    pub index_in_block: u32,
    /// Transaction id.
    pub tx_id: TransactionId,
    /// Deterministic failure reason.
    pub reason: String,
}

/// What the bridge reports back after committing a block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitOutcome {
    /// Height after the commit (equal to the block index).
    pub height: u64,
    /// State hash after the commit.
    pub state_hash: StateHash,
    /// Transactions of the block that failed to apply.
    pub failed: Vec<TxFailure>,
}
