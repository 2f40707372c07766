//! The contract between an ordering service and the application state.

use crate::error::Result;
use crate::submission::SubmissionReceiver;
use async_trait::async_trait;
use bytes::Bytes;
use tessera_types::{Block, CommitOutcome, StateHash};

/// What an ordering service sees of the application.
///
/// The ordering service pulls client transactions from the submission channel,
/// orders them into blocks and hands each block back through
/// [`commit_block`](CommitProxy::commit_block). Blocks must be delivered in
/// index order, exactly once, starting at `height() + 1`.
#[async_trait]
pub trait CommitProxy: Send + Sync {
    /// Returns the consumer end of the submission queue.
    ///
    /// There is a single consumer: a second call fails with
    /// [`BridgeError::SubmissionTaken`](crate::BridgeError::SubmissionTaken).
    fn submission_channel(&self) -> Result<SubmissionReceiver>;

    /// Applies every transaction of `block` in order and commits it.
    ///
    /// Individual transaction failures are reported in the outcome; an error
    /// means the block was not committed.
    async fn commit_block(&self, block: Block) -> Result<CommitOutcome>;

    /// Returns the serialized state, which must be at `height`.
    async fn get_snapshot(&self, height: u64) -> Result<Bytes>;

    /// Replaces the state with a snapshot and returns its hash.
    async fn restore(&self, snapshot: &[u8]) -> Result<StateHash>;

    /// Returns the number of committed blocks.
    async fn height(&self) -> Result<u64>;

    /// Marks the start of a catch-up phase, during which
    /// [`restore`](CommitProxy::restore) is accepted after blocks were applied.
    fn begin_catch_up(&self) {}

    /// Marks the end of a catch-up phase.
    fn end_catch_up(&self) {}
}
