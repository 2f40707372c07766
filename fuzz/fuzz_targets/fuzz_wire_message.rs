//! Fuzz target for bridge wire message parsing.
//!
//! Decoding arbitrary frames must never panic, and anything that decodes must
//! survive a re-encode unchanged.

#![no_main]

use libfuzzer_sys::fuzz_target;
use tessera_consensus::remote::wire::Message;

fuzz_target!(|data: &[u8]| {
    if let Ok(message) = Message::decode(data) {
        let encoded = message.encode();
        let decoded = Message::decode(&encoded).expect("re-encoded message must decode");
        assert_eq!(decoded, message);
    }
});
