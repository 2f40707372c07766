//! Single-slot submission queue.
//!
//! Producers hand a transaction to the ordering service and wait until it has
//! been taken. The queue holds at most one transaction in flight per producer
//! and never buffers beyond the slot, so a slow consumer slows every producer.

use crate::error::{BridgeError, Result};
use tessera_types::Transaction;
use tokio::sync::{mpsc, oneshot};

type Slot = (Transaction, oneshot::Sender<()>);

/// Constructor for a sender/receiver pair.
pub struct SubmissionQueue;

impl SubmissionQueue {
    /// Creates a new queue.
    #[allow(clippy::new_ret_no_self)]
    pub fn new() -> (SubmissionSender, SubmissionReceiver) {
        let (tx, rx) = mpsc::channel(1);
        (SubmissionSender { tx }, SubmissionReceiver { rx })
    }
}

/// Producer side. Cheap to clone.
#[derive(Debug, Clone)]
pub struct SubmissionSender {
    tx: mpsc::Sender<Slot>,
}

impl SubmissionSender {
    /// Submits a transaction and waits until the consumer has taken it.
    ///
    /// Fails with [`BridgeError::QueueClosed`] if the receiver is gone, either
    /// before the slot was filled or before the transaction was taken.
    pub async fn submit(&self, tx: Transaction) -> Result<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send((tx, ack_tx))
            .await
            .map_err(|_| BridgeError::QueueClosed)?;
        ack_rx.await.map_err(|_| BridgeError::QueueClosed)
    }

    /// Returns true if the receiver has been dropped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer side. There is exactly one per queue.
#[derive(Debug)]
pub struct SubmissionReceiver {
    rx: mpsc::Receiver<Slot>,
}

impl SubmissionReceiver {
    /// Takes the next transaction, or `None` once every sender is gone.
    ///
    /// Cancel safe: if the future is dropped before completing, no
    /// transaction is lost.
    pub async fn take(&mut self) -> Option<Transaction> {
        self.take_pending().await.map(PendingSubmission::acknowledge)
    }

    /// Takes the next transaction without releasing its producer.
    ///
    /// The producer stays blocked until [`PendingSubmission::acknowledge`] is
    /// called, and fails with [`BridgeError::QueueClosed`] if the pending
    /// submission is dropped instead. Cancel safe.
    pub async fn take_pending(&mut self) -> Option<PendingSubmission> {
        let (tx, ack) = self.rx.recv().await?;
        Some(PendingSubmission { tx, ack })
    }
}

/// A transaction taken from the queue whose producer is still waiting.
#[derive(Debug)]
pub struct PendingSubmission {
    tx: Transaction,
    ack: oneshot::Sender<()>,
}

impl PendingSubmission {
    /// Returns the transaction.
    pub fn transaction(&self) -> &Transaction {
        &self.tx
    }

    /// Releases the producer and returns the transaction.
    pub fn acknowledge(self) -> Transaction {
        // The producer may have given up waiting; the transaction is still ours.
        let _ = self.ack.send(());
        self.tx
    }
}
