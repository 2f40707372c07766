//! Deterministic account state for Tessera.
//!
//! The executor applies ordered blocks of value transfers and produces a state
//! hash after each commit. Two executors fed the same genesis and the same
//! blocks always agree on every hash.
//!
//! # Example
//!
//! ```
//! use tessera_state::{Genesis, StateExecutor, Transfer};
//! use tessera_types::{Address, Block};
//!
//! let alice: Address = "0x00000000000000000000000000000000000000aa".parse().unwrap();
//! let bob: Address = "0x00000000000000000000000000000000000000bb".parse().unwrap();
//!
//! let mut state = StateExecutor::new();
//! state.bootstrap(&Genesis::empty().with_account(alice, 100)).unwrap();
//!
//! let tx = Transfer { from: alice, to: bob, value: 30, nonce: 0 }.to_transaction();
//! let block = Block::new(1, vec![tx.clone()]);
//! state.begin_block(block.index, block.hash).unwrap();
//! state.apply(&tx, 0).unwrap();
//! state.commit().unwrap();
//!
//! assert_eq!(state.account(&bob).balance, 30);
//! ```

mod error;
mod executor;
mod genesis;
mod shared;
mod snapshot;
mod transfer;

pub use error::{Result, StateError};
pub use executor::{BlockRecord, StateExecutor, DEFAULT_HISTORY_LIMIT};
pub use genesis::{Genesis, GenesisAccount};
pub use shared::{ApplyToken, SharedState};
pub use snapshot::{CommitLink, Snapshot, SNAPSHOT_VERSION};
pub use transfer::Transfer;
