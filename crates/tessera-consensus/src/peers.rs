//! Node identity and peer set.
//!
//! Both are loaded from files before any engine starts; every error here is a
//! configuration error and stops the node.
//!
//! The key file holds a hex-encoded 32-byte Ed25519 seed. The peers file is a
//! JSON list:
//!
//! ```json
//! [{ "net_addr": "127.0.0.1:1337", "pub_key_hex": "…", "moniker": "node0" }]
//! ```

use crate::error::{BridgeError, Result};
use ed25519_consensus::{SigningKey, VerificationKey};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// The local node's signing identity.
#[derive(Clone)]
pub struct Identity {
    key: SigningKey,
}

impl Identity {
    /// Creates an identity from a raw seed.
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self {
            key: SigningKey::from(seed),
        }
    }

    /// Generates a fresh random identity.
    pub fn generate() -> Self {
        Self {
            key: SigningKey::new(rand::thread_rng()),
        }
    }

    /// Parses a hex-encoded seed.
    pub fn from_hex(hex_seed: &str) -> Result<Self> {
        let bytes = hex::decode(hex_seed.trim())
            .map_err(|e| BridgeError::Config(format!("invalid private key: {e}")))?;
        let seed: [u8; 32] = bytes.try_into().map_err(|b: Vec<u8>| {
            BridgeError::Config(format!(
                "invalid private key: expected 32 bytes, got {}",
                b.len()
            ))
        })?;
        Ok(Self::from_seed(seed))
    }

    /// Loads the key file at `path`.
    pub fn from_key_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            BridgeError::Config(format!("cannot read key file {}: {e}", path.display()))
        })?;
        Self::from_hex(&contents)
    }

    /// Writes the seed to `path` as hex.
    pub fn write_key_file(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, hex::encode(self.key.to_bytes()))
            .map_err(|e| BridgeError::Config(format!("cannot write key file: {e}")))
    }

    /// Returns the public key.
    pub fn public_key(&self) -> VerificationKey {
        self.key.verification_key()
    }

    /// Returns the public key as lowercase hex.
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key().to_bytes())
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("public_key", &self.public_key_hex())
            .finish_non_exhaustive()
    }
}

/// A member of the peer set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    /// Address the peer's ordering service listens on.
    pub net_addr: String,
    /// Hex-encoded Ed25519 public key.
    pub pub_key_hex: String,
    /// Human-readable name.
    #[serde(default)]
    pub moniker: String,
}

impl Peer {
    /// Decodes the peer's public key.
    pub fn public_key(&self) -> Result<VerificationKey> {
        let bytes = hex::decode(self.pub_key_hex.trim_start_matches("0x"))
            .map_err(|e| BridgeError::Config(format!("peer {}: invalid key: {e}", self.moniker)))?;
        let arr: [u8; 32] = bytes.try_into().map_err(|_| {
            BridgeError::Config(format!("peer {}: key must be 32 bytes", self.moniker))
        })?;
        VerificationKey::try_from(arr)
            .map_err(|e| BridgeError::Config(format!("peer {}: invalid key: {e}", self.moniker)))
    }
}

/// The ordered set of participants.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerSet {
    peers: Vec<Peer>,
}

impl PeerSet {
    /// Creates a peer set, checking every key and rejecting duplicates.
    pub fn new(peers: Vec<Peer>) -> Result<Self> {
        if peers.is_empty() {
            return Err(BridgeError::Config("peer set is empty".into()));
        }
        let mut seen = std::collections::HashSet::new();
        for peer in &peers {
            let key = peer.public_key()?;
            if !seen.insert(key.to_bytes()) {
                return Err(BridgeError::Config(format!(
                    "duplicate peer key {}",
                    peer.pub_key_hex
                )));
            }
        }
        Ok(Self { peers })
    }

    /// Parses a JSON peer list.
    pub fn from_json(json: &str) -> Result<Self> {
        let peers: Vec<Peer> = serde_json::from_str(json)
            .map_err(|e| BridgeError::Config(format!("invalid peers file: {e}")))?;
        Self::new(peers)
    }

    /// Loads the peers file at `path`.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            BridgeError::Config(format!("cannot read peers file {}: {e}", path.display()))
        })?;
        Self::from_json(&contents)
    }

    /// A single-member set containing only `identity`.
    pub fn solo(identity: &Identity, net_addr: impl Into<String>) -> Self {
        Self {
            peers: vec![Peer {
                net_addr: net_addr.into(),
                pub_key_hex: identity.public_key_hex(),
                moniker: "self".into(),
            }],
        }
    }

    /// Returns the peer with the given key.
    pub fn get(&self, pub_key_hex: &str) -> Option<&Peer> {
        self.peers
            .iter()
            .find(|p| p.pub_key_hex.eq_ignore_ascii_case(pub_key_hex))
    }

    /// Returns the position of `identity` in the set, failing if it is absent.
    pub fn position_of(&self, identity: &Identity) -> Result<usize> {
        let own = identity.public_key_hex();
        self.peers
            .iter()
            .position(|p| p.pub_key_hex.trim_start_matches("0x").eq_ignore_ascii_case(&own))
            .ok_or_else(|| BridgeError::Config(format!("own key {own} is not in the peer set")))
    }

    /// Returns the peers in order.
    pub fn peers(&self) -> &[Peer] {
        &self.peers
    }

    /// Returns the number of peers.
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// Returns true if the set has no peers.
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn peer_json(identities: &[&Identity]) -> String {
        let peers: Vec<Peer> = identities
            .iter()
            .enumerate()
            .map(|(i, id)| Peer {
                net_addr: format!("127.0.0.1:{}", 1337 + i),
                pub_key_hex: id.public_key_hex(),
                moniker: format!("node{i}"),
            })
            .collect();
        serde_json::to_string(&peers).unwrap()
    }

    #[test]
    fn test_key_file_roundtrip() {
        let identity = Identity::generate();
        let file = tempfile::NamedTempFile::new().unwrap();
        identity.write_key_file(file.path()).unwrap();

        let loaded = Identity::from_key_file(file.path()).unwrap();
        assert_eq!(loaded.public_key_hex(), identity.public_key_hex());
    }

    #[test]
    fn test_invalid_key_is_config_error() {
        assert!(matches!(Identity::from_hex("zz"), Err(BridgeError::Config(_))));
        assert!(matches!(Identity::from_hex("abcd"), Err(BridgeError::Config(_))));
        assert!(matches!(
            Identity::from_key_file("/nonexistent/tessera/key"),
            Err(BridgeError::Config(_))
        ));
    }

    #[test]
    fn test_peers_file_must_contain_self() {
        let me = Identity::from_seed([1; 32]);
        let other = Identity::from_seed([2; 32]);

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(peer_json(&[&other, &me]).as_bytes()).unwrap();
        let peers = PeerSet::from_file(file.path()).unwrap();
        assert_eq!(peers.len(), 2);
        assert_eq!(peers.position_of(&me).unwrap(), 1);

        let stranger = Identity::from_seed([3; 32]);
        assert!(matches!(
            peers.position_of(&stranger),
            Err(BridgeError::Config(_))
        ));
    }

    #[test]
    fn test_empty_or_duplicate_peers_rejected() {
        assert!(matches!(PeerSet::from_json("[]"), Err(BridgeError::Config(_))));

        let me = Identity::from_seed([1; 32]);
        assert!(matches!(
            PeerSet::from_json(&peer_json(&[&me, &me])),
            Err(BridgeError::Config(_))
        ));
    }
}
