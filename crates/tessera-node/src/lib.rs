//! Tessera node library.
//!
//! This crate wires the commit bridge to the outside world:
//!
//! - [`api`]: HTTP API for transaction submission and state queries
//! - [`config`]: layered node configuration
//! - [`node`]: assembly of the embedded, remote and sequencer processes
//! - [`observability`]: logging and Prometheus metrics

pub mod api;
pub mod config;
pub mod error;
pub mod metered;
pub mod node;
pub mod observability;

pub use config::{ConfigError, NodeConfig};
pub use error::{NodeError, Result};
pub use node::{EmbeddedNode, RemoteNode, Sequencer};
