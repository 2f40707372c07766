//! Engine side of the remote topology.
//!
//! [`SocketProxy`] implements [`CommitProxy`] for an ordering service whose
//! application runs in another process. It listens for the application's
//! connection, feeds forwarded transactions into its own submission queue and
//! turns commit, snapshot and restore calls into request frames.
//!
//! A forwarded transaction is acknowledged with a `SubmitAck` frame once the
//! ordering service has taken it. The application must wait for that
//! acknowledgement before forwarding the next one, so client backpressure
//! reaches across the connection.

use super::wire::{codec, Message, MAX_FRAME_LEN};
use crate::error::{BridgeError, Result};
use crate::proxy::CommitProxy;
use crate::submission::{SubmissionQueue, SubmissionReceiver, SubmissionSender};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tessera_types::{Block, CommitOutcome, StateHash, Transaction};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};

/// Configuration for a [`SocketProxy`].
#[derive(Debug, Clone)]
pub struct SocketProxyConfig {
    /// How long to wait for the application to answer a request.
    pub request_timeout: Duration,
    /// Height the application is known to be at when the engine starts.
    pub initial_height: u64,
}

impl Default for SocketProxyConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            initial_height: 0,
        }
    }
}

struct Shared {
    config: SocketProxyConfig,
    receiver: Mutex<Option<SubmissionReceiver>>,
    sender: SubmissionSender,
    outbound: Mutex<Option<mpsc::Sender<Bytes>>>,
    pending: Mutex<HashMap<u64, oneshot::Sender<Message>>>,
    next_id: AtomicU64,
    height: AtomicU64,
}

/// Commit proxy that forwards every call to a remote application.
pub struct SocketProxy {
    shared: Arc<Shared>,
    local_addr: SocketAddr,
    tasks: Vec<JoinHandle<()>>,
}

impl SocketProxy {
    /// Binds `addr` and starts accepting the application connection.
    pub async fn bind(addr: &str, config: SocketProxyConfig) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| BridgeError::Config(format!("cannot listen on {addr}: {e}")))?;
        let local_addr = listener.local_addr()?;

        let (sender, receiver) = SubmissionQueue::new();

        let shared = Arc::new(Shared {
            height: AtomicU64::new(config.initial_height),
            config,
            receiver: Mutex::new(Some(receiver)),
            sender,
            outbound: Mutex::new(None),
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        });

        let acceptor = tokio::spawn(accept_loop(listener, shared.clone()));

        tracing::info!(%local_addr, "waiting for application connection");
        Ok(Self {
            shared,
            local_addr,
            tasks: vec![acceptor],
        })
    }

    /// Returns the address the proxy listens on.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Returns true while an application is connected.
    pub fn is_connected(&self) -> bool {
        self.shared.outbound.lock().is_some()
    }

    async fn request(&self, build: impl FnOnce(u64) -> Message) -> Result<Message> {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let frame = build(id).encode();
        if frame.len() > MAX_FRAME_LEN {
            return Err(BridgeError::Protocol(format!(
                "request of {} bytes exceeds the frame limit",
                frame.len()
            )));
        }
        let outbound = self
            .shared
            .outbound
            .lock()
            .clone()
            .ok_or_else(|| BridgeError::Transport("no application connected".into()))?;

        let (reply_tx, reply_rx) = oneshot::channel();
        self.shared.pending.lock().insert(id, reply_tx);

        if outbound.send(frame).await.is_err() {
            self.shared.pending.lock().remove(&id);
            return Err(BridgeError::Transport("application connection closed".into()));
        }

        match tokio::time::timeout(self.shared.config.request_timeout, reply_rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(BridgeError::Transport(
                "application disconnected before replying".into(),
            )),
            Err(_) => {
                self.shared.pending.lock().remove(&id);
                Err(BridgeError::Timeout(format!("request {id} got no reply")))
            }
        }
    }
}

impl Drop for SocketProxy {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

#[async_trait]
impl CommitProxy for SocketProxy {
    fn submission_channel(&self) -> Result<SubmissionReceiver> {
        self.shared
            .receiver
            .lock()
            .take()
            .ok_or(BridgeError::SubmissionTaken)
    }

    async fn commit_block(&self, block: Block) -> Result<CommitOutcome> {
        let index = block.index;
        match self.request(|id| Message::CommitRequest { id, block }).await? {
            Message::CommitResponse { result, .. } => {
                let outcome = result.map_err(BridgeError::Remote)?;
                self.shared.height.store(outcome.height, Ordering::Release);
                tracing::info!(index, state_hash = %outcome.state_hash, "remote commit");
                Ok(outcome)
            }
            other => Err(unexpected(other)),
        }
    }

    async fn get_snapshot(&self, height: u64) -> Result<Bytes> {
        match self
            .request(|id| Message::SnapshotRequest { id, height })
            .await?
        {
            Message::SnapshotResponse { result, .. } => result.map_err(BridgeError::Remote),
            other => Err(unexpected(other)),
        }
    }

    async fn restore(&self, snapshot: &[u8]) -> Result<StateHash> {
        let snapshot = Bytes::copy_from_slice(snapshot);
        match self
            .request(|id| Message::RestoreRequest { id, snapshot })
            .await?
        {
            Message::RestoreResponse { result, .. } => {
                let restored = result.map_err(BridgeError::Remote)?;
                self.shared.height.store(restored.height, Ordering::Release);
                tracing::info!(
                    height = restored.height,
                    state_hash = %restored.state_hash,
                    "remote restore"
                );
                Ok(restored.state_hash)
            }
            other => Err(unexpected(other)),
        }
    }

    async fn height(&self) -> Result<u64> {
        Ok(self.shared.height.load(Ordering::Acquire))
    }
}

fn unexpected(message: Message) -> BridgeError {
    BridgeError::Protocol(format!(
        "unexpected reply type {:?}",
        message.message_type()
    ))
}

/// Feeds forwarded transactions into the submission queue and reports each
/// one taken.
///
/// Runs apart from the connection so responses keep flowing while the
/// ordering service is busy committing.
async fn forward_transactions(
    sender: SubmissionSender,
    mut forward_rx: mpsc::Receiver<Transaction>,
    taken: mpsc::Sender<()>,
) {
    while let Some(tx) = forward_rx.recv().await {
        if sender.submit(tx).await.is_err() {
            tracing::debug!("submission queue closed, dropping forwarded transactions");
            break;
        }
        if taken.send(()).await.is_err() {
            break;
        }
    }
}

async fn accept_loop(listener: TcpListener, shared: Arc<Shared>) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::warn!(error = %e, "accept failed");
                continue;
            }
        };
        tracing::info!(%peer, "application connected");

        match serve_connection(stream, &shared).await {
            Ok(()) => tracing::info!(%peer, "application disconnected"),
            Err(e) => tracing::warn!(%peer, error = %e, "application connection failed"),
        }

        *shared.outbound.lock() = None;
        // Dropping the senders fails every waiting request.
        let failed = shared.pending.lock().drain().count();
        if failed > 0 {
            tracing::warn!(failed, "pending requests failed on disconnect");
        }
    }
}

async fn serve_connection(stream: TcpStream, shared: &Shared) -> Result<()> {
    let (forward_tx, forward_rx) = mpsc::channel(1);
    let (taken_tx, taken_rx) = mpsc::channel(1);
    let forwarder = tokio::spawn(forward_transactions(
        shared.sender.clone(),
        forward_rx,
        taken_tx,
    ));

    let result = drive_connection(stream, shared, forward_tx, taken_rx).await;
    // A transaction still waiting in the queue is resent by the application
    // after it reconnects.
    forwarder.abort();
    result
}

async fn drive_connection(
    stream: TcpStream,
    shared: &Shared,
    forward_tx: mpsc::Sender<Transaction>,
    mut taken_rx: mpsc::Receiver<()>,
) -> Result<()> {
    let (read, write) = stream.into_split();
    let mut frames = FramedRead::new(read, codec());
    let mut sink = FramedWrite::new(write, codec());

    let (out_tx, mut out_rx) = mpsc::channel::<Bytes>(64);
    *shared.outbound.lock() = Some(out_tx);
    let mut awaiting_ack = false;

    loop {
        tokio::select! {
            frame = frames.next() => {
                let frame = match frame {
                    Some(frame) => frame?,
                    None => return Ok(()),
                };
                match Message::decode(&frame)? {
                    Message::SubmitTx(tx) => {
                        if awaiting_ack {
                            return Err(BridgeError::Protocol(
                                "transaction forwarded before the previous one was acknowledged"
                                    .into(),
                            ));
                        }
                        forward_tx.try_send(tx).map_err(|_| BridgeError::QueueClosed)?;
                        awaiting_ack = true;
                    }
                    reply @ (Message::CommitResponse { .. }
                    | Message::SnapshotResponse { .. }
                    | Message::RestoreResponse { .. }) => {
                        let id = reply.id().unwrap_or_default();
                        match shared.pending.lock().remove(&id) {
                            Some(waiter) => {
                                let _ = waiter.send(reply);
                            }
                            None => tracing::warn!(id, "reply for unknown or expired request"),
                        }
                    }
                    other => {
                        return Err(BridgeError::Protocol(format!(
                            "application sent {:?}",
                            other.message_type()
                        )));
                    }
                }
            }

            Some(()) = taken_rx.recv() => {
                awaiting_ack = false;
                sink.send(Message::SubmitAck.encode()).await?;
            }

            Some(out) = out_rx.recv() => {
                sink.send(out).await?;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn connect(proxy: &SocketProxy) -> (
        FramedRead<tokio::net::tcp::OwnedReadHalf, tokio_util::codec::LengthDelimitedCodec>,
        FramedWrite<tokio::net::tcp::OwnedWriteHalf, tokio_util::codec::LengthDelimitedCodec>,
    ) {
        let stream = TcpStream::connect(proxy.local_addr()).await.unwrap();
        let (read, write) = stream.into_split();
        let conn = (FramedRead::new(read, codec()), FramedWrite::new(write, codec()));
        for _ in 0..100 {
            if proxy.is_connected() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        conn
    }

    #[tokio::test]
    async fn test_request_without_application_fails() {
        let proxy = SocketProxy::bind("127.0.0.1:0", SocketProxyConfig::default())
            .await
            .unwrap();
        assert!(matches!(
            proxy.commit_block(Block::new(1, vec![])).await,
            Err(BridgeError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn test_forwarded_transactions_reach_the_queue() {
        let proxy = SocketProxy::bind("127.0.0.1:0", SocketProxyConfig::default())
            .await
            .unwrap();
        let mut receiver = proxy.submission_channel().unwrap();
        let (mut frames, mut sink) = connect(&proxy).await;

        for payload in [b"one".as_slice(), b"two".as_slice()] {
            let msg = Message::SubmitTx(Transaction::new(Bytes::copy_from_slice(payload)));
            sink.send(msg.encode()).await.unwrap();
            assert_eq!(receiver.take().await.unwrap().payload().as_ref(), payload);
            let ack = Message::decode(&frames.next().await.unwrap().unwrap()).unwrap();
            assert_eq!(ack, Message::SubmitAck);
        }
    }

    #[tokio::test]
    async fn test_no_ack_until_engine_takes() {
        let proxy = SocketProxy::bind("127.0.0.1:0", SocketProxyConfig::default())
            .await
            .unwrap();
        let mut receiver = proxy.submission_channel().unwrap();
        let (mut frames, mut sink) = connect(&proxy).await;

        let msg = Message::SubmitTx(Transaction::from(vec![1]));
        sink.send(msg.encode()).await.unwrap();
        let early = tokio::time::timeout(Duration::from_millis(100), frames.next()).await;
        assert!(early.is_err(), "acknowledged before the engine took it");

        receiver.take().await.unwrap();
        let ack = Message::decode(&frames.next().await.unwrap().unwrap()).unwrap();
        assert_eq!(ack, Message::SubmitAck);
    }

    #[tokio::test]
    async fn test_unacknowledged_second_transaction_drops_connection() {
        let proxy = SocketProxy::bind("127.0.0.1:0", SocketProxyConfig::default())
            .await
            .unwrap();
        let _receiver = proxy.submission_channel().unwrap();
        let (mut frames, mut sink) = connect(&proxy).await;

        for payload in [vec![1], vec![2]] {
            let msg = Message::SubmitTx(Transaction::from(payload));
            sink.send(msg.encode()).await.unwrap();
        }
        let end = tokio::time::timeout(Duration::from_secs(2), frames.next())
            .await
            .unwrap();
        assert!(end.is_none() || end.unwrap().is_err());
    }

    #[tokio::test]
    async fn test_oversized_request_is_refused_locally() {
        let proxy = SocketProxy::bind("127.0.0.1:0", SocketProxyConfig::default())
            .await
            .unwrap();
        let (_frames, _sink) = connect(&proxy).await;

        let snapshot = vec![0u8; MAX_FRAME_LEN + 1];
        assert!(matches!(
            proxy.restore(&snapshot).await,
            Err(BridgeError::Protocol(_))
        ));
        assert!(proxy.is_connected());
    }

    #[tokio::test]
    async fn test_remote_error_and_disconnect() {
        let proxy = Arc::new(
            SocketProxy::bind("127.0.0.1:0", SocketProxyConfig::default())
                .await
                .unwrap(),
        );
        let (mut frames, mut sink) = connect(&proxy).await;

        let caller = proxy.clone();
        let snapshot = tokio::spawn(async move { caller.get_snapshot(3).await });

        let request = Message::decode(&frames.next().await.unwrap().unwrap()).unwrap();
        let (id, height) = match request {
            Message::SnapshotRequest { id, height } => (id, height),
            other => panic!("expected snapshot request, got {other:?}"),
        };
        assert_eq!(height, 3);
        let reply = Message::SnapshotResponse {
            id,
            result: Err("wrong height".into()),
        };
        sink.send(reply.encode()).await.unwrap();
        assert!(matches!(
            snapshot.await.unwrap(),
            Err(BridgeError::Remote(msg)) if msg == "wrong height"
        ));

        // A request outstanding when the application leaves fails with a transport error.
        let caller = proxy.clone();
        let commit = tokio::spawn(async move { caller.commit_block(Block::new(1, vec![])).await });
        let _ = frames.next().await.unwrap().unwrap();
        drop(frames);
        drop(sink);
        assert!(matches!(
            commit.await.unwrap(),
            Err(BridgeError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn test_request_timeout() {
        let config = SocketProxyConfig {
            request_timeout: Duration::from_millis(50),
            ..Default::default()
        };
        let proxy = SocketProxy::bind("127.0.0.1:0", config).await.unwrap();
        let (_frames, _sink) = connect(&proxy).await;
        assert!(matches!(
            proxy.restore(b"{}").await,
            Err(BridgeError::Timeout(_))
        ));
    }
}
