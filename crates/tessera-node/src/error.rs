//! Node error types.

use crate::config::ConfigError;
use tessera_consensus::BridgeError;
use tessera_state::StateError;
use thiserror::Error;

/// Errors that stop the node.
#[derive(Debug, Error)]
pub enum NodeError {
    /// Invalid or unreadable configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The commit bridge or ordering service failed.
    #[error("bridge error: {0}")]
    Bridge(#[from] BridgeError),

    /// State could not be built.
    #[error("state error: {0}")]
    State(#[from] StateError),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for node assembly.
pub type Result<T> = std::result::Result<T, NodeError>;
