//! In-process commit proxy.

use crate::error::{BridgeError, Result};
use crate::proxy::CommitProxy;
use crate::submission::{SubmissionQueue, SubmissionReceiver, SubmissionSender};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tessera_state::{SharedState, Snapshot, StateError};
use tessera_types::{Block, CommitOutcome, ReceiptStatus, StateHash, TxFailure};

/// Commit proxy that executes blocks against a local [`SharedState`].
pub struct InmemProxy {
    state: SharedState,
    sender: SubmissionSender,
    receiver: Mutex<Option<SubmissionReceiver>>,
    applied_any: AtomicBool,
    catching_up: AtomicBool,
}

impl InmemProxy {
    /// Creates a proxy over an already bootstrapped state.
    pub fn new(state: SharedState) -> Self {
        let (sender, receiver) = SubmissionQueue::new();
        Self {
            state,
            sender,
            receiver: Mutex::new(Some(receiver)),
            applied_any: AtomicBool::new(false),
            catching_up: AtomicBool::new(false),
        }
    }

    /// Returns a producer handle for client transactions.
    pub fn submitter(&self) -> SubmissionSender {
        self.sender.clone()
    }

    /// Returns the shared state this proxy writes to.
    pub fn state(&self) -> &SharedState {
        &self.state
    }

    fn apply_block(&self, block: &Block) -> Result<CommitOutcome> {
        let mut token = self.state.try_begin_apply()?;
        token.begin_block(block.index, block.hash)?;

        let mut failed = Vec::new();
        for (i, tx) in block.transactions.iter().enumerate() {
            let index_in_block = i as u32;
            let receipt = token.apply(tx, index_in_block)?;
            if let ReceiptStatus::Failed { reason } = receipt.status {
                failed.push(TxFailure {
                    index_in_block,
                    tx_id: receipt.tx_id,
                    reason,
                });
            }
        }

        let state_hash = token.commit()?;
        self.applied_any.store(true, Ordering::Release);

        Ok(CommitOutcome {
            height: token.height(),
            state_hash,
            failed,
        })
    }

    fn restore_snapshot(&self, bytes: &[u8]) -> Result<StateHash> {
        let snapshot = Snapshot::decode(bytes)?;
        let mut token = self.state.try_begin_apply().map_err(|err| match err {
            StateError::ApplyInProgress => BridgeError::ApplyInProgress,
            other => other.into(),
        })?;
        // Checked under the token: a commit cannot land between check and restore.
        if self.applied_any.load(Ordering::Acquire) && !self.catching_up.load(Ordering::Acquire) {
            return Err(BridgeError::RestoreNotAllowed);
        }
        Ok(token.restore(snapshot)?)
    }
}

#[async_trait]
impl CommitProxy for InmemProxy {
    fn submission_channel(&self) -> Result<SubmissionReceiver> {
        self.receiver.lock().take().ok_or(BridgeError::SubmissionTaken)
    }

    async fn commit_block(&self, block: Block) -> Result<CommitOutcome> {
        let outcome = self.apply_block(&block).map_err(|err| {
            tracing::error!(index = block.index, error = %err, "block commit failed");
            err
        })?;

        tracing::info!(
            index = block.index,
            tx_count = block.tx_count(),
            failed = outcome.failed.len(),
            state_hash = %outcome.state_hash,
            "committed block"
        );
        Ok(outcome)
    }

    async fn get_snapshot(&self, height: u64) -> Result<Bytes> {
        self.state.read(|state| {
            if state.height() != height {
                return Err(BridgeError::SnapshotHeight {
                    requested: height,
                    current: state.height(),
                });
            }
            let bytes = state.snapshot()?.encode()?;
            Ok(Bytes::from(bytes))
        })
    }

    async fn restore(&self, snapshot: &[u8]) -> Result<StateHash> {
        self.restore_snapshot(snapshot)
    }

    async fn height(&self) -> Result<u64> {
        Ok(self.state.read(|state| state.height()))
    }

    fn begin_catch_up(&self) {
        self.catching_up.store(true, Ordering::Release);
        tracing::info!("catch-up started");
    }

    fn end_catch_up(&self) {
        self.catching_up.store(false, Ordering::Release);
        tracing::info!("catch-up finished");
    }
}
