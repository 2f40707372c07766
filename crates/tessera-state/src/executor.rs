//! Deterministic state executor.
//!
//! The executor owns the canonical account state. It is not thread safe on its
//! own: callers obtain exclusive access through [`SharedState`](crate::SharedState).
//!
//! A block is applied in three steps:
//!
//! 1. [`StateExecutor::begin_block`] checks the index follows the current height;
//! 2. [`StateExecutor::apply`] runs each transaction in order and records a receipt;
//! 3. [`StateExecutor::commit`] advances the height and computes the state hash.

use crate::error::{Result, StateError};
use crate::genesis::Genesis;
use crate::snapshot::{CommitLink, Snapshot, SNAPSHOT_VERSION};
use crate::transfer::Transfer;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use tessera_types::{
    Account, Address, BlockHash, Hash32, Receipt, ReceiptStatus, StateHash, Transaction,
    TransactionId,
};

/// Domain separator for state hashes.
const STATE_HASH_DOMAIN: &[u8] = b"tessera/state/v1";

/// Default number of committed blocks whose records and receipts are retained.
pub const DEFAULT_HISTORY_LIMIT: usize = 10_000;

/// Summary of a committed block kept for queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRecord {
    /// Block index.
    pub index: u64,
    /// Hash assigned by the ordering service.
    pub hash: BlockHash,
    /// Transaction ids in block order.
    pub transactions: Vec<TransactionId>,
    /// Number of transactions that failed.
    pub failed_count: usize,
    /// State hash after the block.
    pub state_hash: StateHash,
}

#[derive(Debug)]
struct OpenBlock {
    index: u64,
    hash: BlockHash,
    receipts: Vec<Receipt>,
}

/// The state machine fed by the commit bridge.
#[derive(Debug)]
pub struct StateExecutor {
    accounts: BTreeMap<Address, Account>,
    height: u64,
    state_hash: StateHash,
    link: CommitLink,
    bootstrapped: bool,
    open: Option<OpenBlock>,
    receipts: HashMap<TransactionId, Receipt>,
    blocks: BTreeMap<u64, BlockRecord>,
    history_limit: usize,
}

impl Default for StateExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl StateExecutor {
    /// Creates an empty, not yet bootstrapped executor.
    pub fn new() -> Self {
        Self::with_history_limit(DEFAULT_HISTORY_LIMIT)
    }

    /// Creates an executor that retains at most `limit` block records.
    pub fn with_history_limit(limit: usize) -> Self {
        Self {
            accounts: BTreeMap::new(),
            height: 0,
            state_hash: StateHash::ZERO,
            link: CommitLink::default(),
            bootstrapped: false,
            open: None,
            receipts: HashMap::new(),
            blocks: BTreeMap::new(),
            history_limit: limit.max(1),
        }
    }

    /// Installs the genesis allocation and computes the height-0 hash.
    ///
    /// Allowed once, before any block.
    pub fn bootstrap(&mut self, genesis: &Genesis) -> Result<StateHash> {
        if self.bootstrapped || self.height > 0 {
            return Err(StateError::AlreadyBootstrapped);
        }
        genesis.total_supply()?;

        self.accounts = genesis
            .alloc
            .iter()
            .map(|(addr, alloc)| (*addr, Account::with_balance(alloc.balance)))
            .collect();
        self.link = CommitLink::default();
        self.state_hash = compute_hash(self.height, &self.accounts, &self.link);
        self.bootstrapped = true;

        tracing::info!(
            accounts = self.accounts.len(),
            state_hash = %self.state_hash,
            "genesis allocation applied"
        );
        Ok(self.state_hash)
    }

    /// Opens block `index`, which must be exactly one past the current height.
    pub fn begin_block(&mut self, index: u64, hash: BlockHash) -> Result<()> {
        if !self.bootstrapped {
            return Err(StateError::NotBootstrapped);
        }
        if let Some(open) = &self.open {
            return Err(StateError::BlockAlreadyOpen(open.index));
        }
        let expected = self.height + 1;
        if index != expected {
            return Err(StateError::OutOfOrder {
                expected,
                got: index,
            });
        }
        self.open = Some(OpenBlock {
            index,
            hash,
            receipts: Vec::new(),
        });
        Ok(())
    }

    /// Executes one transaction of the open block.
    ///
    /// A transaction that cannot be executed yields a failed receipt; only
    /// misuse of the executor returns an error.
    pub fn apply(&mut self, tx: &Transaction, index_in_block: u32) -> Result<Receipt> {
        let open = self.open.as_mut().ok_or(StateError::NoOpenBlock)?;
        let expected = open.receipts.len() as u32;
        if index_in_block != expected {
            return Err(StateError::TxOutOfSequence {
                expected,
                got: index_in_block,
            });
        }

        let outcome = Transfer::decode(tx).and_then(|transfer| transfer.execute(&mut self.accounts));
        let status = match outcome {
            Ok(()) => ReceiptStatus::Success,
            Err(reason) => {
                tracing::debug!(tx_id = %tx.id(), index_in_block, %reason, "transaction failed");
                ReceiptStatus::Failed { reason }
            }
        };

        let receipt = Receipt {
            tx_id: tx.id(),
            block_index: open.index,
            block_hash: open.hash,
            index_in_block,
            status,
        };
        open.receipts.push(receipt.clone());
        Ok(receipt)
    }

    /// Finalizes the open block and returns the new state hash.
    pub fn commit(&mut self) -> Result<StateHash> {
        let open = self.open.take().ok_or(StateError::NoOpenBlock)?;

        self.height = open.index;
        self.link = CommitLink {
            previous: self.state_hash,
            receipts: open
                .receipts
                .iter()
                .map(|r| (r.tx_id, r.status.as_byte()))
                .collect(),
        };
        self.state_hash = compute_hash(self.height, &self.accounts, &self.link);

        let record = BlockRecord {
            index: open.index,
            hash: open.hash,
            transactions: open.receipts.iter().map(|r| r.tx_id).collect(),
            failed_count: open.receipts.iter().filter(|r| !r.is_success()).count(),
            state_hash: self.state_hash,
        };
        for receipt in open.receipts {
            self.receipts.insert(receipt.tx_id, receipt);
        }
        self.blocks.insert(record.index, record);
        self.prune_history();

        Ok(self.state_hash)
    }

    /// Exports the full state. Fails while a block is open.
    pub fn snapshot(&self) -> Result<Snapshot> {
        if let Some(open) = &self.open {
            return Err(StateError::BlockAlreadyOpen(open.index));
        }
        Ok(Snapshot {
            version: SNAPSHOT_VERSION,
            height: self.height,
            state_hash: self.state_hash,
            accounts: self.accounts.clone(),
            link: self.link.clone(),
        })
    }

    /// Replaces the state wholesale and returns the restored hash.
    ///
    /// The snapshot's hash is recomputed from its contents; a mismatch leaves
    /// the current state untouched.
    pub fn restore(&mut self, snapshot: Snapshot) -> Result<StateHash> {
        if let Some(open) = &self.open {
            return Err(StateError::BlockAlreadyOpen(open.index));
        }
        let computed = compute_hash(snapshot.height, &snapshot.accounts, &snapshot.link);
        if computed != snapshot.state_hash {
            return Err(StateError::Snapshot(format!(
                "state hash mismatch: snapshot claims {}, contents hash to {computed}",
                snapshot.state_hash
            )));
        }
        self.accounts = snapshot.accounts;
        self.height = snapshot.height;
        self.state_hash = snapshot.state_hash;
        self.link = snapshot.link;
        self.receipts.clear();
        self.blocks.clear();
        self.bootstrapped = true;

        tracing::info!(height = self.height, state_hash = %self.state_hash, "state restored");
        Ok(self.state_hash)
    }

    /// Returns the number of applied blocks.
    pub fn height(&self) -> u64 {
        self.height
    }

    /// Returns the hash of the last commit (or genesis).
    pub fn state_hash(&self) -> StateHash {
        self.state_hash
    }

    /// Returns true once genesis or a snapshot has been installed.
    pub fn is_bootstrapped(&self) -> bool {
        self.bootstrapped
    }

    /// Returns an account, or the zero account if it was never touched.
    pub fn account(&self, address: &Address) -> Account {
        self.accounts.get(address).copied().unwrap_or_default()
    }

    /// Returns every known account in address order.
    pub fn accounts(&self) -> &BTreeMap<Address, Account> {
        &self.accounts
    }

    /// Returns the receipt of a committed transaction.
    pub fn receipt(&self, tx_id: &TransactionId) -> Option<&Receipt> {
        self.receipts.get(tx_id)
    }

    /// Returns the record of a committed block.
    pub fn block(&self, index: u64) -> Option<&BlockRecord> {
        self.blocks.get(&index)
    }

    fn prune_history(&mut self) {
        while self.blocks.len() > self.history_limit {
            let Some((_, oldest)) = self.blocks.pop_first() else {
                break;
            };
            for tx_id in &oldest.transactions {
                self.receipts.remove(tx_id);
            }
        }
    }
}

fn compute_hash(
    height: u64,
    accounts: &BTreeMap<Address, Account>,
    link: &CommitLink,
) -> StateHash {
    let mut hasher = Sha256::new();
    hasher.update(STATE_HASH_DOMAIN);
    hasher.update(link.previous.as_bytes());
    hasher.update(height.to_be_bytes());
    hasher.update((accounts.len() as u64).to_be_bytes());
    for (address, account) in accounts {
        hasher.update(address.as_bytes());
        hasher.update(account.balance.to_be_bytes());
        hasher.update(account.nonce.to_be_bytes());
    }
    for (tx_id, status) in &link.receipts {
        hasher.update(tx_id.as_bytes());
        hasher.update([*status]);
    }
    Hash32::from_bytes(hasher.finalize().into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tessera_types::Block;

    fn addr(b: u8) -> Address {
        let mut bytes = [0u8; 20];
        bytes[19] = b;
        Address::from_bytes(bytes)
    }

    fn transfer(from: u8, to: u8, value: u64, nonce: u64) -> Transaction {
        Transfer {
            from: addr(from),
            to: addr(to),
            value,
            nonce,
        }
        .to_transaction()
    }

    fn genesis() -> Genesis {
        Genesis::empty().with_account(addr(0xa), 100)
    }

    fn apply_block(executor: &mut StateExecutor, block: &Block) -> StateHash {
        executor.begin_block(block.index, block.hash).unwrap();
        for (i, tx) in block.transactions.iter().enumerate() {
            executor.apply(tx, i as u32).unwrap();
        }
        executor.commit().unwrap()
    }

    #[test]
    fn test_transfer_scenario() {
        let mut executor = StateExecutor::new();
        let genesis_hash = executor.bootstrap(&genesis()).unwrap();

        let block = Block::new(1, vec![transfer(0xa, 0xb, 30, 0)]);
        let hash = apply_block(&mut executor, &block);

        assert_eq!(executor.account(&addr(0xa)).balance, 70);
        assert_eq!(executor.account(&addr(0xb)).balance, 30);
        assert_eq!(executor.height(), 1);
        assert_ne!(hash, genesis_hash);
        assert_ne!(hash, StateHash::ZERO);

        let tx_id = block.transactions[0].id();
        assert!(executor.receipt(&tx_id).unwrap().is_success());
        assert_eq!(executor.block(1).unwrap().state_hash, hash);
    }

    #[test]
    fn test_bootstrap_only_once() {
        let mut executor = StateExecutor::new();
        executor.bootstrap(&genesis()).unwrap();
        assert!(matches!(
            executor.bootstrap(&genesis()),
            Err(StateError::AlreadyBootstrapped)
        ));
    }

    #[test]
    fn test_begin_block_requires_bootstrap() {
        let mut executor = StateExecutor::new();
        assert!(matches!(
            executor.begin_block(1, BlockHash::ZERO),
            Err(StateError::NotBootstrapped)
        ));
    }

    #[test]
    fn test_out_of_order_rejected() {
        let mut executor = StateExecutor::new();
        executor.bootstrap(&genesis()).unwrap();
        assert!(matches!(
            executor.begin_block(2, BlockHash::ZERO),
            Err(StateError::OutOfOrder {
                expected: 1,
                got: 2
            })
        ));

        apply_block(&mut executor, &Block::new(1, vec![]));
        assert!(matches!(
            executor.begin_block(1, BlockHash::ZERO),
            Err(StateError::OutOfOrder {
                expected: 2,
                got: 1
            })
        ));
    }

    #[test]
    fn test_failed_transaction_is_recorded_and_hashed() {
        let mut a = StateExecutor::new();
        let mut b = StateExecutor::new();
        a.bootstrap(&genesis()).unwrap();
        b.bootstrap(&genesis()).unwrap();

        let ok = Block::new(1, vec![transfer(0xa, 0xb, 1, 0)]);
        let bad = Block::new(1, vec![transfer(0xa, 0xb, 1, 0), Transaction::from(vec![1, 2])]);

        let hash_ok = apply_block(&mut a, &ok);
        let hash_bad = apply_block(&mut b, &bad);

        // Same accounts, different receipts.
        assert_eq!(a.accounts(), b.accounts());
        assert_ne!(hash_ok, hash_bad);
        assert_eq!(b.block(1).unwrap().failed_count, 1);
    }

    #[test]
    fn test_apply_sequence_enforced() {
        let mut executor = StateExecutor::new();
        executor.bootstrap(&genesis()).unwrap();
        assert!(matches!(
            executor.apply(&transfer(0xa, 0xb, 1, 0), 0),
            Err(StateError::NoOpenBlock)
        ));

        executor.begin_block(1, BlockHash::ZERO).unwrap();
        assert!(matches!(
            executor.apply(&transfer(0xa, 0xb, 1, 0), 1),
            Err(StateError::TxOutOfSequence {
                expected: 0,
                got: 1
            })
        ));
    }

    #[test]
    fn test_snapshot_restore_roundtrip() {
        let mut source = StateExecutor::new();
        source.bootstrap(&genesis()).unwrap();
        apply_block(&mut source, &Block::new(1, vec![transfer(0xa, 0xb, 10, 0)]));
        apply_block(&mut source, &Block::new(2, vec![transfer(0xa, 0xc, 5, 1)]));

        let bytes = source.snapshot().unwrap().encode().unwrap();

        let mut replica = StateExecutor::new();
        let restored = replica.restore(Snapshot::decode(&bytes).unwrap()).unwrap();
        assert_eq!(restored, source.state_hash());
        assert_eq!(replica.height(), 2);

        // Both continue identically from the restored point.
        let next = Block::new(3, vec![transfer(0xb, 0xc, 2, 0)]);
        assert_eq!(apply_block(&mut source, &next), apply_block(&mut replica, &next));
    }

    #[test]
    fn test_tampered_snapshot_is_rejected() {
        let mut source = StateExecutor::new();
        source.bootstrap(&genesis()).unwrap();
        apply_block(&mut source, &Block::new(1, vec![transfer(0xa, 0xb, 10, 0)]));

        let mut replica = StateExecutor::new();
        replica.bootstrap(&genesis()).unwrap();
        let before = replica.state_hash();

        let mut inflated = source.snapshot().unwrap();
        inflated.accounts.entry(addr(0xb)).or_default().balance = 1_000_000;
        assert!(matches!(
            replica.restore(inflated),
            Err(StateError::Snapshot(msg)) if msg.contains("mismatch")
        ));

        let mut relabelled = source.snapshot().unwrap();
        relabelled.height = 9;
        assert!(replica.restore(relabelled).is_err());

        assert_eq!(replica.height(), 0);
        assert_eq!(replica.state_hash(), before);

        // A restored genesis snapshot verifies too.
        let mut fresh = StateExecutor::new();
        fresh.restore(replica.snapshot().unwrap()).unwrap();
        assert_eq!(fresh.state_hash(), before);
    }

    #[test]
    fn test_history_is_pruned() {
        let mut executor = StateExecutor::with_history_limit(2);
        executor.bootstrap(&genesis()).unwrap();
        let first = Block::new(1, vec![transfer(0xa, 0xb, 1, 0)]);
        apply_block(&mut executor, &first);
        apply_block(&mut executor, &Block::new(2, vec![]));
        apply_block(&mut executor, &Block::new(3, vec![]));

        assert!(executor.block(1).is_none());
        assert!(executor.receipt(&first.transactions[0].id()).is_none());
        assert!(executor.block(3).is_some());
    }

    proptest! {
        #[test]
        fn prop_executors_converge(
            blocks in prop::collection::vec(
                prop::collection::vec((0u8..4, 0u8..4, 0u64..60, 0u64..3), 0..6),
                1..8,
            )
        ) {
            let genesis = Genesis::empty()
                .with_account(addr(0), 100)
                .with_account(addr(1), 50);
            let mut a = StateExecutor::new();
            let mut b = StateExecutor::new();
            prop_assert_eq!(a.bootstrap(&genesis).unwrap(), b.bootstrap(&genesis).unwrap());

            for (i, txs) in blocks.iter().enumerate() {
                let txs = txs
                    .iter()
                    .map(|(from, to, value, nonce)| transfer(*from, *to, *value, *nonce))
                    .collect();
                let block = Block::new(i as u64 + 1, txs);
                prop_assert_eq!(apply_block(&mut a, &block), apply_block(&mut b, &block));
            }
            prop_assert_eq!(a.accounts(), b.accounts());
        }
    }
}
