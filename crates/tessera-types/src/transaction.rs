//! Opaque transaction payloads.
//!
//! The bridge never looks inside a transaction. It only needs a stable
//! identifier, which is the SHA-256 digest of the payload bytes.

use crate::hash::Hash32;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A unique transaction identifier (SHA-256 of the payload).
pub type TransactionId = Hash32;

/// A serialized transaction as submitted by a client.
///
/// Cloning is cheap: the payload is reference counted.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Transaction(Bytes);

impl Transaction {
    /// Wraps a payload.
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self(payload.into())
    }

    /// Returns the transaction id.
    pub fn id(&self) -> TransactionId {
        Hash32::compute(&self.0)
    }

    /// Returns the raw payload.
    pub fn payload(&self) -> &Bytes {
        &self.0
    }

    /// Returns the payload size in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Consumes the transaction and returns the payload.
    pub fn into_payload(self) -> Bytes {
        self.0
    }
}

impl From<Vec<u8>> for Transaction {
    fn from(payload: Vec<u8>) -> Self {
        Self(Bytes::from(payload))
    }
}

impl From<&'static [u8]> for Transaction {
    fn from(payload: &'static [u8]) -> Self {
        Self(Bytes::from_static(payload))
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id())
            .field("len", &self.0.len())
            .finish()
    }
}
