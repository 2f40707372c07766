//! Commit proxy wrapper that records commit metrics.

use crate::observability::METRICS;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Instant;
use tessera_consensus::{CommitProxy, Result, SubmissionReceiver};
use tessera_types::{Block, CommitOutcome, StateHash};

/// Forwards every call to `inner` and records the outcome of each commit.
pub struct MeteredProxy {
    inner: Arc<dyn CommitProxy>,
}

impl MeteredProxy {
    /// Wraps `inner`.
    pub fn new(inner: Arc<dyn CommitProxy>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl CommitProxy for MeteredProxy {
    fn submission_channel(&self) -> Result<SubmissionReceiver> {
        self.inner.submission_channel()
    }

    async fn commit_block(&self, block: Block) -> Result<CommitOutcome> {
        let start = Instant::now();
        let outcome = self.inner.commit_block(block).await?;
        METRICS.record_commit(&outcome, start.elapsed().as_secs_f64());
        Ok(outcome)
    }

    async fn get_snapshot(&self, height: u64) -> Result<Bytes> {
        self.inner.get_snapshot(height).await
    }

    async fn restore(&self, snapshot: &[u8]) -> Result<StateHash> {
        let hash = self.inner.restore(snapshot).await?;
        METRICS.height.set(self.inner.height().await? as i64);
        Ok(hash)
    }

    async fn height(&self) -> Result<u64> {
        self.inner.height().await
    }

    fn begin_catch_up(&self) {
        self.inner.begin_catch_up();
    }

    fn end_catch_up(&self) {
        self.inner.end_catch_up();
    }
}
