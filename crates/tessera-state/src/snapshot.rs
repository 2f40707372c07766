//! Serialized full-state exports.

use crate::error::{Result, StateError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tessera_types::{Account, Address, StateHash, TransactionId};

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 2;

/// What the latest state hash was chained from, besides the accounts.
///
/// Carried in snapshots so a restore can recompute the hash it is given.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitLink {
    /// State hash before the last block; zero at genesis.
    pub previous: StateHash,
    /// Id and status byte of each transaction in the last block.
    pub receipts: Vec<(TransactionId, u8)>,
}

/// Full state at a given height.
///
/// Receipts and block history are not part of a snapshot: a replica restored
/// from one answers receipt queries only for blocks it applied itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Format version.
    pub version: u32,
    /// Height the snapshot was taken at.
    pub height: u64,
    /// State hash at that height.
    pub state_hash: StateHash,
    /// Every account, in address order.
    pub accounts: BTreeMap<Address, Account>,
    /// Inputs of `state_hash` other than the accounts and height.
    pub link: CommitLink,
}

impl Snapshot {
    /// Serializes the snapshot.
    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| StateError::Snapshot(e.to_string()))
    }

    /// Deserializes a snapshot and checks its version.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            return Err(StateError::Snapshot("empty snapshot".into()));
        }
        let snapshot: Snapshot =
            serde_json::from_slice(bytes).map_err(|e| StateError::Snapshot(e.to_string()))?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(StateError::Snapshot(format!(
                "unsupported snapshot version {}",
                snapshot.version
            )));
        }
        Ok(snapshot)
    }
}
