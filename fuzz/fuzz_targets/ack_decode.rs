//! Fuzz target for Ack::decode.

#![no_main]

use libfuzzer_sys::fuzz_target;
use sealink_proto::Ack;

fuzz_target!(|data: &[u8]| {
    if let Ok(ack) = Ack::decode(data) {
        // Acks are pure functions of their fields; the only lossy bit is
        // the success byte normalizing to 0 or 1.
        let encoded = ack.encode();
        assert_eq!(&encoded[..24], &data[..24]);
    }
});
