//! Fuzz target for block execution.
//!
//! Arbitrary payloads must become receipts, never errors or panics, and two
//! executors fed the same block must agree on the state hash.

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use tessera_state::{Genesis, StateExecutor};
use tessera_types::{Address, Block, Transaction};

#[derive(Debug, Arbitrary)]
struct Input {
    balances: Vec<([u8; 20], u64)>,
    payloads: Vec<Vec<u8>>,
}

fn execute(genesis: &Genesis, block: &Block) -> tessera_types::StateHash {
    let mut state = StateExecutor::new();
    state.bootstrap(genesis).expect("fresh executor");
    state.begin_block(block.index, block.hash).expect("first block");
    for (i, tx) in block.transactions.iter().enumerate() {
        state.apply(tx, i as u32).expect("apply never fails on valid sequence");
    }
    state.commit().expect("open block")
}

fuzz_target!(|input: Input| {
    let genesis = input
        .balances
        .iter()
        .take(16)
        .fold(Genesis::empty(), |g, (addr, balance)| {
            g.with_account(Address::from_bytes(*addr), *balance)
        });
    if genesis.total_supply().is_err() {
        return;
    }

    let txs: Vec<Transaction> = input
        .payloads
        .into_iter()
        .take(64)
        .map(Transaction::from)
        .collect();
    let block = Block::new(1, txs);

    assert_eq!(execute(&genesis, &block), execute(&genesis, &block));
});
