//! Acknowledgment frame.
//!
//! Emitted by the relay for every accepted (or well-formed but rejected)
//! message frame. Acks are pure functions of their fields; re-sending one
//! has no effect on session state.

use bytes::BufMut;

use crate::error::ProtocolError;

/// Wire length of an [`Ack`]. Inbound frames of exactly this length are
/// interpreted as acks by the client.
pub const ACK_LEN: usize = 25;

/// Relay acknowledgment for one message frame.
///
/// Layout: `message_id (16) || received_at_ms u64 (8) || success u8 (1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    /// Message id being acknowledged.
    pub message_id: [u8; 16],
    /// Relay wall clock at receipt, unix milliseconds.
    pub received_at_ms: u64,
    /// Whether the relay accepted the frame.
    pub success: bool,
}

impl Ack {
    /// Encode to the 25-byte wire layout.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(ACK_LEN);
        out.put_slice(&self.message_id);
        out.put_u64(self.received_at_ms);
        out.put_u8(u8::from(self.success));

        debug_assert_eq!(out.len(), ACK_LEN);
        out
    }

    /// Decode from wire bytes.
    ///
    /// # Errors
    ///
    /// `ProtocolError::LengthMismatch` unless exactly 25 bytes. Any nonzero
    /// trailing byte counts as success, matching the u8 encoding.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() != ACK_LEN {
            return Err(ProtocolError::LengthMismatch { expected: ACK_LEN, actual: bytes.len() });
        }

        let mut message_id = [0u8; 16];
        message_id.copy_from_slice(&bytes[..16]);

        let mut received = [0u8; 8];
        received.copy_from_slice(&bytes[16..24]);

        Ok(Self {
            message_id,
            received_at_ms: u64::from_be_bytes(received),
            success: bytes[24] != 0,
        })
    }
}
