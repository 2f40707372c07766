//! Remote topology: ordering service and application in separate processes.
//!
//! ```text
//!   application process                 ordering service process
//!   InmemProxy <- RemoteBridge  <-TCP->  SocketProxy <- ordering service
//! ```
//!
//! The application dials the ordering service. Transactions flow towards the
//! service as `SubmitTx` frames; commit, snapshot and restore requests flow
//! back and are answered on the same connection.

mod bridge;
mod reconnect;
mod socket;
pub mod wire;

pub use bridge::{RemoteBridge, RemoteBridgeConfig};
pub use reconnect::ReconnectPolicy;
pub use socket::{SocketProxy, SocketProxyConfig};
