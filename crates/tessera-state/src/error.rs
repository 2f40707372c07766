//! State executor error types.

use thiserror::Error;

/// Errors that can occur while mutating or reading the execution state.
///
/// None of these describe a transaction that failed to execute; those are
/// reported through failed receipts so every replica records the same outcome.
#[derive(Debug, Error)]
pub enum StateError {
    /// Genesis allocation was attempted twice or after a block was applied.
    #[error("state already bootstrapped")]
    AlreadyBootstrapped,

    /// A block was opened before genesis allocation.
    #[error("state not bootstrapped")]
    NotBootstrapped,

    /// A block index does not follow the current height.
    #[error("block out of order: expected index {expected}, got {got}")]
    OutOfOrder {
        /// The index the executor expects next.
        expected: u64,
        /// The index that was delivered.
        got: u64,
    },

    /// A block is already open.
    #[error("block {0} is still being applied")]
    BlockAlreadyOpen(u64),

    /// `apply` or `commit` was called without an open block.
    #[error("no block is being applied")]
    NoOpenBlock,

    /// A transaction position skipped or repeated within the open block.
    #[error("transaction out of sequence: expected position {expected}, got {got}")]
    TxOutOfSequence {
        /// Next expected position.
        expected: u32,
        /// Position that was supplied.
        got: u32,
    },

    /// Another caller holds the exclusive apply token.
    #[error("another block application is in progress")]
    ApplyInProgress,

    /// Snapshot could not be produced or decoded.
    #[error("snapshot error: {0}")]
    Snapshot(String),

    /// Genesis file could not be read or parsed.
    #[error("invalid genesis: {0}")]
    Genesis(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized Result type for state operations.
pub type Result<T> = std::result::Result<T, StateError>;
