//! Fuzz target for snapshot decoding and restore.

#![no_main]

use libfuzzer_sys::fuzz_target;
use tessera_state::{Snapshot, StateExecutor};

fuzz_target!(|data: &[u8]| {
    if let Ok(snapshot) = Snapshot::decode(data) {
        let mut state = StateExecutor::new();
        let _ = state.restore(snapshot);
    }
});
