//! Tessera Commit Bridge
//!
//! This crate connects an ordering service (something that turns a stream of
//! client transactions into a totally ordered sequence of blocks) to the
//! deterministic state executor in `tessera-state`.
//!
//! # Components
//!
//! - [`CommitProxy`]: what an ordering service sees of the application
//! - [`SubmissionQueue`]: single-slot handoff of client transactions
//! - [`InmemProxy`]: executes blocks against local state
//! - [`EmbeddedBridge`]: runs an [`OrderingService`] in the node process
//! - [`SoloEngine`]: single-replica ordering service
//! - [`remote`]: ordering service and application in separate processes
//!
//! # Transaction Flow
//!
//! ```text
//! ┌──────────────┐     ┌──────────────┐     ┌──────────────┐
//! │   Client     │────▶│   HTTP API   │────▶│  Submission  │
//! │              │     │  POST /tx    │     │    Queue     │
//! └──────────────┘     └──────────────┘     └──────┬───────┘
//!                                                   │
//!                      ┌────────────────────────────┘
//!                      ▼
//!               ┌──────────────┐     ┌──────────────┐
//!               │   Ordering   │────▶│ CommitProxy  │
//!               │   Service    │     │ commit_block │
//!               └──────────────┘     └──────┬───────┘
//!                                           │
//!                                           ▼
//!                      ┌──────────────────────────────────┐
//!                      │     Apply to State, Commit       │
//!                      │   (exclusive, in index order)    │
//!                      └──────────────────────────────────┘
//! ```

mod embedded;
mod error;
mod inmem;
mod peers;
mod proxy;
pub mod remote;
mod solo;
mod submission;

pub use embedded::{EmbeddedBridge, OrderingService};
pub use error::{BridgeError, Result};
pub use inmem::InmemProxy;
pub use peers::{Identity, Peer, PeerSet};
pub use proxy::CommitProxy;
pub use remote::{
    ReconnectPolicy, RemoteBridge, RemoteBridgeConfig, SocketProxy, SocketProxyConfig,
};
pub use solo::{SoloConfig, SoloEngine};
pub use submission::{
    PendingSubmission, SubmissionQueue, SubmissionReceiver, SubmissionSender,
};
