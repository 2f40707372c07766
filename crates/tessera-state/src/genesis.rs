//! Genesis account allocation.
//!
//! The genesis file is a JSON document with an `alloc` map from address to
//! initial balance:
//!
//! ```json
//! { "alloc": { "0x00000000000000000000000000000000000000aa": { "balance": 100 } } }
//! ```

use crate::error::{Result, StateError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tessera_types::Address;

/// Initial allocation for one account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisAccount {
    /// Starting balance.
    pub balance: u64,
}

/// Initial state of the chain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Genesis {
    /// Accounts funded at height 0.
    #[serde(default)]
    pub alloc: BTreeMap<Address, GenesisAccount>,
}

impl Genesis {
    /// Creates an empty genesis.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Adds a funded account.
    pub fn with_account(mut self, address: Address, balance: u64) -> Self {
        self.alloc.insert(address, GenesisAccount { balance });
        self
    }

    /// Parses a genesis document from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| StateError::Genesis(e.to_string()))
    }

    /// Loads a genesis document from a file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    /// Returns the sum of all allocated balances.
    pub fn total_supply(&self) -> Result<u64> {
        self.alloc.values().try_fold(0u64, |acc, a| {
            acc.checked_add(a.balance)
                .ok_or_else(|| StateError::Genesis("total supply overflows u64".into()))
        })
    }
}
