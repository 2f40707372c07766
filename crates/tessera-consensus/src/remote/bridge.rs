//! Application side of the remote topology.
//!
//! [`RemoteBridge`] connects the local [`CommitProxy`] to an ordering service
//! in another process. One task multiplexes the connection: it forwards client
//! transactions, hands engine requests to a worker and writes the worker's
//! replies back. Requests run one at a time, so a slow commit delays later
//! requests but never transaction forwarding.
//!
//! At most one forwarded transaction is unacknowledged at a time. Its producer
//! stays blocked until the ordering service reports it taken, and it is sent
//! again after a reconnect. A resent transaction may already have been
//! ordered; the second copy then fails deterministically in the state machine.

use super::reconnect::ReconnectPolicy;
use super::wire::{codec, Message, Restored, MAX_FRAME_LEN};
use crate::error::{BridgeError, Result};
use crate::proxy::CommitProxy;
use crate::submission::PendingSubmission;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};

/// Configuration for a [`RemoteBridge`].
#[derive(Debug, Clone)]
pub struct RemoteBridgeConfig {
    /// Address of the ordering service's [`SocketProxy`](super::SocketProxy).
    pub engine_addr: String,
    /// Timeout for a single connection attempt.
    pub connect_timeout: Duration,
    /// Timeout for writing one frame.
    pub write_timeout: Duration,
    /// Backoff between connection attempts.
    pub reconnect: ReconnectPolicy,
}

impl Default for RemoteBridgeConfig {
    fn default() -> Self {
        Self {
            engine_addr: "127.0.0.1:1338".into(),
            connect_timeout: Duration::from_secs(1),
            write_timeout: Duration::from_secs(1),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

type Reader = FramedRead<OwnedReadHalf, LengthDelimitedCodec>;
type Writer = FramedWrite<OwnedWriteHalf, LengthDelimitedCodec>;

/// A reply produced by the request worker.
struct Served {
    reply: Message,
    /// Set when a commit failed; the bridge stops after writing the reply.
    fatal: Option<BridgeError>,
}

/// How a connection ended.
enum Disconnect {
    /// The local producers are gone and nothing is outstanding.
    Finished,
    /// The transport failed.
    Lost(BridgeError),
}

/// Connects a local [`CommitProxy`] to a remote ordering service.
pub struct RemoteBridge {
    config: RemoteBridgeConfig,
    proxy: Arc<dyn CommitProxy>,
}

impl RemoteBridge {
    /// Creates a bridge for `proxy`.
    pub fn new(config: RemoteBridgeConfig, proxy: Arc<dyn CommitProxy>) -> Self {
        Self { config, proxy }
    }

    /// Runs the bridge until a fatal error or until every producer is gone.
    ///
    /// Losing the connection while no request is outstanding is recovered by
    /// reconnecting; losing it while a request is being served returns
    /// [`BridgeError::CommitInterrupted`].
    pub async fn run(&self) -> Result<()> {
        let mut submissions = self.proxy.submission_channel()?;

        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (reply_tx, mut reply_rx) = mpsc::unbounded_channel();
        tokio::spawn(serve_requests(self.proxy.clone(), request_rx, reply_tx));

        let mut outstanding: VecDeque<&'static str> = VecDeque::new();
        let mut in_flight: Option<PendingSubmission> = None;
        let mut producers_open = true;

        loop {
            let (mut frames, mut sink) = self.connect().await?;

            if let Some(pending) = &in_flight {
                let tx = pending.transaction().clone();
                let tx_id = tx.id();
                if let Err(e) = self.write(&mut sink, Message::SubmitTx(tx)).await {
                    tracing::warn!(error = %e, "resend failed, reconnecting");
                    continue;
                }
                tracing::debug!(%tx_id, "resent unacknowledged transaction after reconnect");
            }

            let ended = loop {
                tokio::select! {
                    maybe_pending = submissions.take_pending(), if producers_open && in_flight.is_none() => {
                        let Some(pending) = maybe_pending else {
                            producers_open = false;
                            if outstanding.is_empty() {
                                break Disconnect::Finished;
                            }
                            continue;
                        };
                        let tx = pending.transaction().clone();
                        in_flight = Some(pending);
                        if let Err(e) = self.write(&mut sink, Message::SubmitTx(tx)).await {
                            break Disconnect::Lost(e);
                        }
                    }

                    frame = frames.next() => {
                        let frame = match frame {
                            Some(Ok(frame)) => frame,
                            Some(Err(e)) => break Disconnect::Lost(e.into()),
                            None => break Disconnect::Lost(BridgeError::Transport(
                                "ordering service closed the connection".into(),
                            )),
                        };
                        let message = Message::decode(&frame)?;
                        if message == Message::SubmitAck {
                            match in_flight.take() {
                                Some(pending) => {
                                    pending.acknowledge();
                                }
                                None => {
                                    return Err(BridgeError::Protocol(
                                        "acknowledgement without a forwarded transaction".into(),
                                    ));
                                }
                            }
                            continue;
                        }
                        let kind = match &message {
                            Message::CommitRequest { .. } => "commit",
                            Message::SnapshotRequest { .. } => "snapshot",
                            Message::RestoreRequest { .. } => "restore",
                            other => {
                                return Err(BridgeError::Protocol(format!(
                                    "ordering service sent {:?}",
                                    other.message_type()
                                )));
                            }
                        };
                        outstanding.push_back(kind);
                        if request_tx.send(message).is_err() {
                            return Err(BridgeError::Engine("request worker stopped".into()));
                        }
                    }

                    Some(served) = reply_rx.recv() => {
                        if let Err(e) = self.write(&mut sink, served.reply).await {
                            break Disconnect::Lost(e);
                        }
                        outstanding.pop_front();
                        if let Some(fatal) = served.fatal {
                            return Err(fatal);
                        }
                        if !producers_open && outstanding.is_empty() {
                            break Disconnect::Finished;
                        }
                    }
                }
            };

            match ended {
                Disconnect::Finished => {
                    tracing::info!("submission queue closed, remote bridge stopping");
                    return Ok(());
                }
                Disconnect::Lost(e) => {
                    if let Some(kind) = outstanding.front() {
                        tracing::error!(error = %e, request = *kind, "connection lost mid-request");
                        return Err(BridgeError::CommitInterrupted(*kind));
                    }
                    tracing::warn!(error = %e, "connection to ordering service lost, reconnecting");
                }
            }
        }
    }

    async fn connect(&self) -> Result<(Reader, Writer)> {
        let addr = &self.config.engine_addr;
        let mut failures = 0u32;

        loop {
            let attempt =
                tokio::time::timeout(self.config.connect_timeout, TcpStream::connect(addr)).await;
            let err = match attempt {
                Ok(Ok(stream)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        tracing::debug!(error = %e, "failed to set TCP_NODELAY");
                    }
                    tracing::info!(%addr, "connected to ordering service");
                    let (read, write) = stream.into_split();
                    return Ok((FramedRead::new(read, codec()), FramedWrite::new(write, codec())));
                }
                Ok(Err(e)) => e.to_string(),
                Err(_) => "connect timed out".to_string(),
            };

            failures += 1;
            if !self.config.reconnect.should_retry(failures) {
                return Err(BridgeError::Transport(format!(
                    "cannot reach ordering service at {addr} after {failures} attempts: {err}"
                )));
            }
            let delay = self.config.reconnect.delay_for_attempt(failures);
            tracing::debug!(
                attempt = failures,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "retrying connection"
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn write(&self, sink: &mut Writer, message: Message) -> Result<()> {
        let frame: Bytes = message.encode();
        match tokio::time::timeout(self.config.write_timeout, sink.send(frame)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(BridgeError::Timeout("frame write timed out".into())),
        }
    }
}

async fn serve_requests(
    proxy: Arc<dyn CommitProxy>,
    mut requests: mpsc::UnboundedReceiver<Message>,
    replies: mpsc::UnboundedSender<Served>,
) {
    while let Some(request) = requests.recv().await {
        let served = match request {
            Message::CommitRequest { id, block } => {
                let index = block.index;
                match proxy.commit_block(block).await {
                    Ok(outcome) => Served {
                        reply: Message::CommitResponse {
                            id,
                            result: Ok(outcome),
                        },
                        fatal: None,
                    },
                    Err(e) => {
                        tracing::error!(index, error = %e, "commit failed");
                        Served {
                            reply: Message::CommitResponse {
                                id,
                                result: Err(e.to_string()),
                            },
                            fatal: Some(e),
                        }
                    }
                }
            }
            Message::SnapshotRequest { id, height } => {
                let result = match proxy.get_snapshot(height).await {
                    // Leave room for the type byte, id, status and length prefix.
                    Ok(snapshot) if snapshot.len() > MAX_FRAME_LEN - 32 => {
                        tracing::warn!(height, size = snapshot.len(), "snapshot too large to send");
                        Err(format!(
                            "snapshot of {} bytes exceeds the frame limit",
                            snapshot.len()
                        ))
                    }
                    other => other.map_err(|e| e.to_string()),
                };
                Served {
                    reply: Message::SnapshotResponse { id, result },
                    fatal: None,
                }
            }
            Message::RestoreRequest { id, snapshot } => Served {
                reply: Message::RestoreResponse {
                    id,
                    result: restore_for_engine(proxy.as_ref(), &snapshot)
                        .await
                        .map_err(|e| e.to_string()),
                },
                fatal: None,
            },
            // Filtered by the multiplexer.
            _ => continue,
        };
        if replies.send(served).is_err() {
            break;
        }
    }
}

/// Restores on behalf of the ordering service, which only asks for a restore
/// while the application is catching up.
async fn restore_for_engine(proxy: &dyn CommitProxy, snapshot: &[u8]) -> Result<Restored> {
    proxy.begin_catch_up();
    let restored = proxy.restore(snapshot).await;
    proxy.end_catch_up();
    let state_hash = restored?;
    Ok(Restored {
        height: proxy.height().await?,
        state_hash,
    })
}
