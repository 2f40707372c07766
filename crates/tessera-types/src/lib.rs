//! Common types used throughout `tessera`.
//!
//! These types are shared by the state executor, the commit bridge and the
//! node's HTTP API. None of them know how transactions are ordered or executed.

mod account;
mod block;
mod hash;
mod receipt;
mod transaction;

pub use account::{Account, Address, AddressError};
pub use block::Block;
pub use hash::{BlockHash, Hash32, StateHash};
pub use receipt::{CommitOutcome, Receipt, ReceiptStatus, TxFailure};
pub use transaction::{Transaction, TransactionId};
