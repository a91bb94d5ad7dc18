//! Fuzz target for the fixed-size handshake codecs.
//!
//! Both decoders are length-gated; arbitrary input must only ever produce
//! a typed error, never a panic.

#![no_main]

use libfuzzer_sys::fuzz_target;
use sealink_proto::{InitiatorInit, ResponderReply};

fuzz_target!(|data: &[u8]| {
    if let Ok(init) = InitiatorInit::decode(data) {
        // Round-trip must be stable for anything that decodes.
        assert_eq!(init.encode(), data);
    }
    if let Ok(reply) = ResponderReply::decode(data) {
        assert_eq!(reply.encode(), data);
    }
});
