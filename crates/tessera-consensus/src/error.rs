//! Bridge error types.

use tessera_state::StateError;
use thiserror::Error;

/// Errors that can occur while moving transactions and blocks across the bridge.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Invalid identity, peer set or other startup configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// The state executor rejected an operation.
    #[error(transparent)]
    State(StateError),

    /// A block index does not follow the current height.
    #[error("block out of order: expected index {expected}, got {got}")]
    OutOfOrder {
        /// The index the state expects next.
        expected: u64,
        /// The index that was delivered.
        got: u64,
    },

    /// A block was delivered while another one is being applied.
    #[error("another block is being committed")]
    ConcurrentCommit,

    /// A snapshot was requested at a height other than the current one.
    #[error("snapshot unavailable at height {requested}: current height is {current}")]
    SnapshotHeight {
        /// Requested height.
        requested: u64,
        /// Current height.
        current: u64,
    },

    /// Restore was requested after blocks were applied outside catch-up.
    #[error("restore is only allowed before the first block or while catching up")]
    RestoreNotAllowed,

    /// Restore raced a block application.
    #[error("cannot restore while a block is being applied")]
    ApplyInProgress,

    /// The submission receiver was already handed out.
    #[error("submission channel already taken")]
    SubmissionTaken,

    /// The other end of the submission queue is gone.
    #[error("submission queue closed")]
    QueueClosed,

    /// Connection-level failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// Malformed or unexpected wire message.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The connection dropped while a request was being served.
    #[error("connection lost with an outstanding {0} request")]
    CommitInterrupted(&'static str),

    /// An operation did not complete in time.
    #[error("timeout: {0}")]
    Timeout(String),

    /// The ordering service failed.
    #[error("engine error: {0}")]
    Engine(String),

    /// The remote application reported an error.
    #[error("remote error: {0}")]
    Remote(String),
}

impl From<StateError> for BridgeError {
    fn from(err: StateError) -> Self {
        match err {
            StateError::OutOfOrder { expected, got } => BridgeError::OutOfOrder { expected, got },
            StateError::ApplyInProgress => BridgeError::ConcurrentCommit,
            other => BridgeError::State(other),
        }
    }
}

impl From<std::io::Error> for BridgeError {
    fn from(err: std::io::Error) -> Self {
        BridgeError::Transport(err.to_string())
    }
}

/// A specialized Result type for bridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;
