//! Sealink wire protocol.
//!
//! Deterministic, byte-exact codecs for everything that crosses the duplex
//! channel: the two handshake frames, the encrypted-message frame, and the
//! acknowledgment frame. All multi-byte integers are big-endian.
//!
//! This crate is structural only: it validates lengths and layout, never
//! signatures or ciphertext. Cryptographic verification happens in
//! `sealink-core` after decoding, so a relay can route and sequence frames
//! it cannot decrypt.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod ack;
pub mod error;
pub mod handshake;
pub mod message;

pub use ack::Ack;
pub use error::ProtocolError;
pub use handshake::{InitiatorInit, ResponderReply};
pub use message::{MessageFrame, MessageHeader};

/// Protocol version carried in every message frame.
pub const PROTOCOL_VERSION: u32 = 1;

/// AAD bound into the handshake prekey encryption.
pub const HANDSHAKE_PREKEY_AAD: &[u8] = b"handshake-prekey";

/// Smallest frame the relay will look at.
pub const MIN_FRAME_LEN: usize = 16;

/// Close codes emitted over the duplex channel.
///
/// The values are WebSocket-compatible so the canonical transport binding
/// can pass them through unchanged.
pub mod close_code {
    /// Normal closure.
    pub const NORMAL: u16 = 1000;
    /// Protocol error reported by the transport.
    pub const PROTOCOL: u16 = 1002;
    /// Unsupported data.
    pub const UNSUPPORTED: u16 = 1003;
    /// Invalid frame payload (malformed, bad sequence, auth failure).
    pub const INVALID_FRAME: u16 = 1007;
    /// Policy violation (rate limit, replay, handshake failure, capacity).
    pub const POLICY: u16 = 1008;
    /// Frame exceeded the size limit.
    pub const TOO_BIG: u16 = 1009;
    /// Internal error.
    pub const INTERNAL: u16 = 1011;

    /// Close codes after which a client must not reconnect.
    pub fn is_fatal(code: u16) -> bool {
        matches!(
            code,
            NORMAL | PROTOCOL | UNSUPPORTED | INVALID_FRAME | POLICY | TOO_BIG | INTERNAL
        )
    }
}
