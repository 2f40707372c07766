//! Value-transfer transactions.
//!
//! This is the only transaction kind the executor understands. The payload is
//! a JSON object; anything else is a deterministic failure.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tessera_types::{Account, Address, Transaction};

/// A transfer of `value` from one account to another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Transfer {
    /// Sending account.
    pub from: Address,
    /// Receiving account.
    pub to: Address,
    /// Amount moved.
    pub value: u64,
    /// Must equal the sender's current nonce.
    pub nonce: u64,
}

impl Transfer {
    /// Encodes the transfer as a transaction payload.
    pub fn to_transaction(&self) -> Transaction {
        // Infallible for a struct of plain fields.
        Transaction::from(serde_json::to_vec(self).unwrap_or_default())
    }

    /// Decodes a transaction payload.
    pub fn decode(tx: &Transaction) -> Result<Self, String> {
        serde_json::from_slice(tx.payload()).map_err(|e| format!("malformed payload: {e}"))
    }

    /// Applies the transfer, or explains why it cannot be applied.
    ///
    /// All checks run before any mutation so a failure leaves `accounts` untouched.
    pub(crate) fn execute(&self, accounts: &mut BTreeMap<Address, Account>) -> Result<(), String> {
        let sender = accounts.get(&self.from).copied().unwrap_or_default();

        if sender.nonce != self.nonce {
            return Err(format!(
                "invalid nonce: expected {}, got {}",
                sender.nonce, self.nonce
            ));
        }
        if sender.balance < self.value {
            return Err(format!(
                "insufficient balance: have {}, need {}",
                sender.balance, self.value
            ));
        }
        let next_nonce = sender
            .nonce
            .checked_add(1)
            .ok_or_else(|| "sender nonce overflow".to_string())?;

        if self.from == self.to {
            accounts.insert(
                self.from,
                Account {
                    balance: sender.balance,
                    nonce: next_nonce,
                },
            );
            return Ok(());
        }

        let recipient = accounts.get(&self.to).copied().unwrap_or_default();
        let credited = recipient
            .balance
            .checked_add(self.value)
            .ok_or_else(|| "recipient balance overflow".to_string())?;

        accounts.insert(
            self.from,
            Account {
                balance: sender.balance - self.value,
                nonce: next_nonce,
            },
        );
        accounts.insert(
            self.to,
            Account {
                balance: credited,
                nonce: recipient.nonce,
            },
        );
        Ok(())
    }
}
