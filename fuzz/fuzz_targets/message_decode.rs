//! Fuzz target for MessageFrame::decode
//!
//! Decoding arbitrary bytes must never panic: no integer overflows in the
//! length arithmetic, no over-reads past declared fields, no allocation
//! from attacker-controlled lengths before bounds checks.

#![no_main]

use libfuzzer_sys::fuzz_target;
use sealink_proto::MessageFrame;

fuzz_target!(|data: &[u8]| {
    let _ = MessageFrame::decode(data);
    let _ = MessageFrame::peek_sequence(data);
    let _ = MessageFrame::peek_message_id(data);
});
