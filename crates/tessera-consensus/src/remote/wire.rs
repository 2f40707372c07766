//! Wire format between a remote application and its ordering service.
//!
//! Every frame is a big-endian `u32` length followed by the body. The body
//! starts with a [`MessageType`] byte; variable-length fields are prefixed with
//! their `u32` length.

use crate::error::{BridgeError, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tessera_types::{Block, CommitOutcome, Hash32, StateHash, Transaction, TxFailure};
use tokio_util::codec::LengthDelimitedCodec;

/// Largest frame either side accepts.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Builds the frame codec used on both ends.
pub fn codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_type::<u32>()
        .max_frame_length(MAX_FRAME_LEN)
        .new_codec()
}

/// Message type discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    /// Client transaction, application to engine.
    SubmitTx = 1,
    /// Block to commit, engine to application.
    CommitRequest = 2,
    /// Result of a commit.
    CommitResponse = 3,
    /// Snapshot request.
    SnapshotRequest = 4,
    /// Snapshot bytes.
    SnapshotResponse = 5,
    /// Restore request.
    RestoreRequest = 6,
    /// Result of a restore.
    RestoreResponse = 7,
    /// The engine has taken the last forwarded transaction.
    SubmitAck = 8,
}

impl MessageType {
    /// Parse a message type from a byte.
    pub fn from_byte(b: u8) -> Result<Self> {
        match b {
            1 => Ok(MessageType::SubmitTx),
            2 => Ok(MessageType::CommitRequest),
            3 => Ok(MessageType::CommitResponse),
            4 => Ok(MessageType::SnapshotRequest),
            5 => Ok(MessageType::SnapshotResponse),
            6 => Ok(MessageType::RestoreRequest),
            7 => Ok(MessageType::RestoreResponse),
            8 => Ok(MessageType::SubmitAck),
            _ => Err(BridgeError::Protocol(format!("unknown message type: {b}"))),
        }
    }
}

/// Outcome of a remote request; the error side is the remote's message.
pub type Reply<T> = std::result::Result<T, String>;

/// Where the application stands after a restore.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Restored {
    /// Height of the restored state.
    pub height: u64,
    /// Hash of the restored state.
    pub state_hash: StateHash,
}

/// A decoded frame body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Client transaction.
    SubmitTx(Transaction),
    /// Commit `block`.
    CommitRequest {
        /// Request id.
        id: u64,
        /// Block to apply.
        block: Block,
    },
    /// Commit result.
    CommitResponse {
        /// Id of the request being answered.
        id: u64,
        /// Outcome or error.
        result: Reply<CommitOutcome>,
    },
    /// Produce a snapshot at `height`.
    SnapshotRequest {
        /// Request id.
        id: u64,
        /// Height the snapshot must be taken at.
        height: u64,
    },
    /// Snapshot result.
    SnapshotResponse {
        /// Id of the request being answered.
        id: u64,
        /// Snapshot bytes or error.
        result: Reply<Bytes>,
    },
    /// Restore from `snapshot`.
    RestoreRequest {
        /// Request id.
        id: u64,
        /// Serialized snapshot.
        snapshot: Bytes,
    },
    /// Restore result.
    RestoreResponse {
        /// Id of the request being answered.
        id: u64,
        /// Restored height and hash, or error.
        result: Reply<Restored>,
    },
    /// The engine took the transaction forwarded last; the next may be sent.
    SubmitAck,
}

impl Message {
    /// Returns the message type.
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::SubmitTx(_) => MessageType::SubmitTx,
            Message::CommitRequest { .. } => MessageType::CommitRequest,
            Message::CommitResponse { .. } => MessageType::CommitResponse,
            Message::SnapshotRequest { .. } => MessageType::SnapshotRequest,
            Message::SnapshotResponse { .. } => MessageType::SnapshotResponse,
            Message::RestoreRequest { .. } => MessageType::RestoreRequest,
            Message::RestoreResponse { .. } => MessageType::RestoreResponse,
            Message::SubmitAck => MessageType::SubmitAck,
        }
    }

    /// Returns the request id, if the message carries one.
    pub fn id(&self) -> Option<u64> {
        match self {
            Message::SubmitTx(_) | Message::SubmitAck => None,
            Message::CommitRequest { id, .. }
            | Message::CommitResponse { id, .. }
            | Message::SnapshotRequest { id, .. }
            | Message::SnapshotResponse { id, .. }
            | Message::RestoreRequest { id, .. }
            | Message::RestoreResponse { id, .. } => Some(*id),
        }
    }

    /// Encode the message to a frame body.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u8(self.message_type() as u8);

        match self {
            Message::SubmitTx(tx) => put_bytes(&mut buf, tx.payload()),
            Message::CommitRequest { id, block } => {
                buf.put_u64(*id);
                buf.put_u64(block.index);
                buf.put_slice(block.hash.as_bytes());
                buf.put_u32(block.transactions.len() as u32);
                for tx in &block.transactions {
                    put_bytes(&mut buf, tx.payload());
                }
            }
            Message::CommitResponse { id, result } => {
                buf.put_u64(*id);
                put_reply(&mut buf, result, |buf, outcome| {
                    buf.put_u64(outcome.height);
                    buf.put_slice(outcome.state_hash.as_bytes());
                    buf.put_u32(outcome.failed.len() as u32);
                    for failure in &outcome.failed {
                        buf.put_u32(failure.index_in_block);
                        buf.put_slice(failure.tx_id.as_bytes());
                        put_bytes(buf, failure.reason.as_bytes());
                    }
                });
            }
            Message::SnapshotRequest { id, height } => {
                buf.put_u64(*id);
                buf.put_u64(*height);
            }
            Message::SnapshotResponse { id, result } => {
                buf.put_u64(*id);
                put_reply(&mut buf, result, |buf, snapshot| put_bytes(buf, snapshot));
            }
            Message::RestoreRequest { id, snapshot } => {
                buf.put_u64(*id);
                put_bytes(&mut buf, snapshot);
            }
            Message::RestoreResponse { id, result } => {
                buf.put_u64(*id);
                put_reply(&mut buf, result, |buf, restored| {
                    buf.put_u64(restored.height);
                    buf.put_slice(restored.state_hash.as_bytes());
                });
            }
            Message::SubmitAck => {}
        }

        buf.freeze()
    }

    /// Decode a frame body.
    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        if buf.is_empty() {
            return Err(BridgeError::Protocol("empty frame".into()));
        }
        let message_type = MessageType::from_byte(buf.get_u8())?;
        let buf = &mut buf;

        let message = match message_type {
            MessageType::SubmitTx => Message::SubmitTx(Transaction::new(get_bytes(buf, "tx")?)),
            MessageType::CommitRequest => {
                let id = get_u64(buf, "request id")?;
                let index = get_u64(buf, "block index")?;
                let hash = get_hash(buf, "block hash")?;
                let count = get_u32(buf, "tx count")? as usize;
                // Each transaction needs at least its length prefix.
                if buf.remaining() < count.saturating_mul(4) {
                    return Err(BridgeError::Protocol("truncated transactions".into()));
                }
                let mut transactions = Vec::with_capacity(count);
                for _ in 0..count {
                    transactions.push(Transaction::new(get_bytes(buf, "tx")?));
                }
                Message::CommitRequest {
                    id,
                    block: Block::with_hash(index, hash, transactions),
                }
            }
            MessageType::CommitResponse => {
                let id = get_u64(buf, "request id")?;
                let result = get_reply(buf, |buf| {
                    let height = get_u64(buf, "height")?;
                    let state_hash = get_hash(buf, "state hash")?;
                    let count = get_u32(buf, "failure count")? as usize;
                    let mut failed = Vec::with_capacity(count.min(1024));
                    for _ in 0..count {
                        let index_in_block = get_u32(buf, "failure index")?;
                        let tx_id = get_hash(buf, "failure tx id")?;
                        let reason = get_string(buf, "failure reason")?;
                        failed.push(TxFailure {
                            index_in_block,
                            tx_id,
                            reason,
                        });
                    }
                    Ok(CommitOutcome {
                        height,
                        state_hash,
                        failed,
                    })
                })?;
                Message::CommitResponse { id, result }
            }
            MessageType::SnapshotRequest => Message::SnapshotRequest {
                id: get_u64(buf, "request id")?,
                height: get_u64(buf, "height")?,
            },
            MessageType::SnapshotResponse => {
                let id = get_u64(buf, "request id")?;
                let result = get_reply(buf, |buf| get_bytes(buf, "snapshot"))?;
                Message::SnapshotResponse { id, result }
            }
            MessageType::RestoreRequest => Message::RestoreRequest {
                id: get_u64(buf, "request id")?,
                snapshot: get_bytes(buf, "snapshot")?,
            },
            MessageType::RestoreResponse => {
                let id = get_u64(buf, "request id")?;
                let result = get_reply(buf, |buf| {
                    Ok(Restored {
                        height: get_u64(buf, "height")?,
                        state_hash: get_hash(buf, "state hash")?,
                    })
                })?;
                Message::RestoreResponse { id, result }
            }
            MessageType::SubmitAck => Message::SubmitAck,
        };

        if buf.has_remaining() {
            return Err(BridgeError::Protocol(format!(
                "{} trailing bytes after {:?}",
                buf.remaining(),
                message_type
            )));
        }
        Ok(message)
    }
}

fn put_bytes(buf: &mut BytesMut, data: &[u8]) {
    buf.put_u32(data.len() as u32);
    buf.put_slice(data);
}

fn put_reply<T>(buf: &mut BytesMut, reply: &Reply<T>, put_ok: impl FnOnce(&mut BytesMut, &T)) {
    match reply {
        Ok(value) => {
            buf.put_u8(0);
            put_ok(buf, value);
        }
        Err(message) => {
            buf.put_u8(1);
            put_bytes(buf, message.as_bytes());
        }
    }
}

fn get_reply<T>(
    buf: &mut &[u8],
    get_ok: impl FnOnce(&mut &[u8]) -> Result<T>,
) -> Result<Reply<T>> {
    if !buf.has_remaining() {
        return Err(BridgeError::Protocol("truncated reply status".into()));
    }
    match buf.get_u8() {
        0 => Ok(Ok(get_ok(buf)?)),
        1 => Ok(Err(get_string(buf, "error message")?)),
        other => Err(BridgeError::Protocol(format!("invalid reply status: {other}"))),
    }
}

fn get_u32(buf: &mut &[u8], what: &str) -> Result<u32> {
    if buf.remaining() < 4 {
        return Err(BridgeError::Protocol(format!("truncated {what}")));
    }
    Ok(buf.get_u32())
}

fn get_u64(buf: &mut &[u8], what: &str) -> Result<u64> {
    if buf.remaining() < 8 {
        return Err(BridgeError::Protocol(format!("truncated {what}")));
    }
    Ok(buf.get_u64())
}

fn get_hash(buf: &mut &[u8], what: &str) -> Result<Hash32> {
    if buf.remaining() < Hash32::LEN {
        return Err(BridgeError::Protocol(format!("truncated {what}")));
    }
    let mut bytes = [0u8; 32];
    buf.copy_to_slice(&mut bytes);
    Ok(Hash32::from_bytes(bytes))
}

fn get_bytes(buf: &mut &[u8], what: &str) -> Result<Bytes> {
    let len = get_u32(buf, what)? as usize;
    if buf.remaining() < len {
        return Err(BridgeError::Protocol(format!("truncated {what}")));
    }
    Ok(buf.copy_to_bytes(len))
}

fn get_string(buf: &mut &[u8], what: &str) -> Result<String> {
    let bytes = get_bytes(buf, what)?;
    String::from_utf8(bytes.to_vec())
        .map_err(|e| BridgeError::Protocol(format!("invalid {what}: {e}")))
}
