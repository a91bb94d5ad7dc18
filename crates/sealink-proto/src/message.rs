//! Encrypted-message frame.
//!
//! Variable-length frame carrying one ratcheted ciphertext. The relay reads
//! only the plaintext prefix (`message_id`, `sequence`) and the declared
//! lengths; everything else is opaque to it.
//!
//! ```text
//! message_id (16) || sequence u32 (4) ||
//! hdr_len u32 (4) || encrypted_header (60 = 44 + 16 tag) ||
//! ct_len u32  (4) || ciphertext (body + 16 tag)           ||
//! mac_len u32 (4) || mac (32)                             ||
//! timestamp_ms u64 (8) || version u32 (4)
//! ```
//!
//! The outer MAC is keyed by the message key's MAC subkey over
//! `sequence_be || encrypted_header || ciphertext`, binding the plaintext
//! sequence to the ciphertext even though both AEAD components carry their
//! own tags.

use bytes::BufMut;

use crate::{error::ProtocolError, PROTOCOL_VERSION};

/// Length of the plaintext header before encryption.
pub const MESSAGE_HEADER_LEN: usize = 44;

/// Wire length of the encrypted header: plaintext plus detached GCM tag.
pub const ENCRYPTED_HEADER_LEN: usize = MESSAGE_HEADER_LEN + 16;

/// Length of the outer HMAC-SHA-256 MAC.
pub const MAC_LEN: usize = 32;

/// AEAD tag length appended to the body ciphertext.
pub const BODY_TAG_LEN: usize = 16;

/// Fixed overhead of a message frame around the body ciphertext.
pub const FRAME_OVERHEAD: usize = 16 + 4 + 4 + ENCRYPTED_HEADER_LEN + 4 + 4 + MAC_LEN + 8 + 4;

/// Plaintext ratchet header, sealed inside the frame.
///
/// Layout: `sequence u32 || dh_pub (32) || message_number u32 ||
/// prev_chain_len u32`, all big-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    /// Channel sequence number; must equal the frame's plaintext sequence.
    pub sequence: u32,
    /// Sender's current DH ratchet public key.
    pub dh_pub: [u8; 32],
    /// Message number within the sender's current chain.
    pub message_number: u32,
    /// Length of the sender's previous sending chain.
    pub prev_chain_len: u32,
}

impl MessageHeader {
    /// Encode to the 44-byte plaintext layout.
    pub fn encode(&self) -> [u8; MESSAGE_HEADER_LEN] {
        let mut out = [0u8; MESSAGE_HEADER_LEN];
        out[0..4].copy_from_slice(&self.sequence.to_be_bytes());
        out[4..36].copy_from_slice(&self.dh_pub);
        out[36..40].copy_from_slice(&self.message_number.to_be_bytes());
        out[40..44].copy_from_slice(&self.prev_chain_len.to_be_bytes());
        out
    }

    /// Decode from decrypted header bytes.
    ///
    /// # Errors
    ///
    /// `ProtocolError::BadFieldLength` unless exactly 44 bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() != MESSAGE_HEADER_LEN {
            return Err(ProtocolError::BadFieldLength {
                field: "message_header",
                expected: MESSAGE_HEADER_LEN,
                actual: bytes.len(),
            });
        }

        let mut dh_pub = [0u8; 32];
        dh_pub.copy_from_slice(&bytes[4..36]);

        let word = |range: std::ops::Range<usize>| {
            let mut buf = [0u8; 4];
            buf.copy_from_slice(&bytes[range]);
            u32::from_be_bytes(buf)
        };

        Ok(Self {
            sequence: word(0..4),
            dh_pub,
            message_number: word(36..40),
            prev_chain_len: word(40..44),
        })
    }
}

/// One encrypted message on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageFrame {
    /// Random identifier correlating the frame with its ack.
    pub message_id: [u8; 16],
    /// Plaintext channel sequence, relay-enforced.
    pub sequence: u32,
    /// Sealed 44-byte header plus its 16-byte GCM tag.
    pub encrypted_header: [u8; ENCRYPTED_HEADER_LEN],
    /// Body ciphertext with its 16-byte GCM tag appended.
    pub ciphertext: Vec<u8>,
    /// Outer HMAC-SHA-256 over `sequence_be || encrypted_header ||
    /// ciphertext`.
    pub mac: [u8; MAC_LEN],
    /// Sender wall clock, unix milliseconds.
    pub timestamp_ms: u64,
    /// Protocol version.
    pub version: u32,
}

impl MessageFrame {
    /// The byte string the outer MAC authenticates.
    pub fn mac_input(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + ENCRYPTED_HEADER_LEN + self.ciphertext.len());
        out.put_u32(self.sequence);
        out.put_slice(&self.encrypted_header);
        out.put_slice(&self.ciphertext);
        out
    }

    /// Total encoded length.
    pub fn encoded_len(&self) -> usize {
        FRAME_OVERHEAD + self.ciphertext.len()
    }

    /// Encode to the wire layout.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        out.put_slice(&self.message_id);
        out.put_u32(self.sequence);
        out.put_u32(ENCRYPTED_HEADER_LEN as u32);
        out.put_slice(&self.encrypted_header);
        out.put_u32(self.ciphertext.len() as u32);
        out.put_slice(&self.ciphertext);
        out.put_u32(MAC_LEN as u32);
        out.put_slice(&self.mac);
        out.put_u64(self.timestamp_ms);
        out.put_u32(self.version);

        debug_assert_eq!(out.len(), self.encoded_len());
        out
    }

    /// Decode from wire bytes.
    ///
    /// Validates layout, declared lengths, exact consumption, and the
    /// version field. Does not verify the MAC or decrypt anything.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let mut cursor = Cursor { bytes, pos: 0 };

        let mut message_id = [0u8; 16];
        message_id.copy_from_slice(cursor.take(16)?);

        let sequence = cursor.take_u32()?;

        let hdr_len = cursor.take_u32()? as usize;
        if hdr_len != ENCRYPTED_HEADER_LEN {
            return Err(ProtocolError::BadFieldLength {
                field: "encrypted_header",
                expected: ENCRYPTED_HEADER_LEN,
                actual: hdr_len,
            });
        }
        let mut encrypted_header = [0u8; ENCRYPTED_HEADER_LEN];
        encrypted_header.copy_from_slice(cursor.take(ENCRYPTED_HEADER_LEN)?);

        let ct_len = cursor.take_u32()? as usize;
        if ct_len < BODY_TAG_LEN {
            return Err(ProtocolError::BadFieldLength {
                field: "ciphertext",
                expected: BODY_TAG_LEN,
                actual: ct_len,
            });
        }
        let ciphertext = cursor.take(ct_len)?.to_vec();

        let mac_len = cursor.take_u32()? as usize;
        if mac_len != MAC_LEN {
            return Err(ProtocolError::BadFieldLength {
                field: "mac",
                expected: MAC_LEN,
                actual: mac_len,
            });
        }
        let mut mac = [0u8; MAC_LEN];
        mac.copy_from_slice(cursor.take(MAC_LEN)?);

        let timestamp_ms = cursor.take_u64()?;
        let version = cursor.take_u32()?;
        if version != PROTOCOL_VERSION {
            return Err(ProtocolError::UnsupportedVersion(version));
        }

        cursor.finish()?;

        Ok(Self { message_id, sequence, encrypted_header, ciphertext, mac, timestamp_ms, version })
    }

    /// Read the plaintext sequence without a full decode.
    ///
    /// The relay's hot path touches only the first 20 bytes.
    pub fn peek_sequence(bytes: &[u8]) -> Result<u32, ProtocolError> {
        if bytes.len() < 20 {
            return Err(ProtocolError::Truncated { needed: 20 - bytes.len() });
        }
        let mut buf = [0u8; 4];
        buf.copy_from_slice(&bytes[16..20]);
        Ok(u32::from_be_bytes(buf))
    }

    /// Read the message id without a full decode.
    pub fn peek_message_id(bytes: &[u8]) -> Result<[u8; 16], ProtocolError> {
        if bytes.len() < 16 {
            return Err(ProtocolError::Truncated { needed: 16 - bytes.len() });
        }
        let mut id = [0u8; 16];
        id.copy_from_slice(&bytes[..16]);
        Ok(id)
    }
}

/// Bounds-checked sequential reader.
struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8], ProtocolError> {
        let remaining = self.bytes.len() - self.pos;
        if len > remaining {
            return Err(ProtocolError::FieldTooLong { declared: len, remaining });
        }
        let slice = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn take_u32(&mut self) -> Result<u32, ProtocolError> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(self.take(4)?);
        Ok(u32::from_be_bytes(buf))
    }

    fn take_u64(&mut self) -> Result<u64, ProtocolError> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.take(8)?);
        Ok(u64::from_be_bytes(buf))
    }

    fn finish(&self) -> Result<(), ProtocolError> {
        let remaining = self.bytes.len() - self.pos;
        if remaining > 0 {
            return Err(ProtocolError::TrailingBytes(remaining));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn sample_frame(ciphertext: Vec<u8>) -> MessageFrame {
        MessageFrame {
            message_id: [7u8; 16],
            sequence: 42,
            encrypted_header: [8u8; ENCRYPTED_HEADER_LEN],
            ciphertext,
            mac: [9u8; MAC_LEN],
            timestamp_ms: 1_700_000_000_000,
            version: PROTOCOL_VERSION,
        }
    }

    proptest! {
        #[test]
        fn frame_round_trip(body in proptest::collection::vec(any::<u8>(), 16..4096)) {
            let frame = sample_frame(body);
            let wire = frame.encode();

            prop_assert_eq!(wire.len(), frame.encoded_len());
            let parsed = MessageFrame::decode(&wire).unwrap();
            prop_assert_eq!(parsed, frame);
        }

        #[test]
        fn truncation_never_panics(
            body in proptest::collection::vec(any::<u8>(), 16..256),
            cut in 0usize..256,
        ) {
            let wire = sample_frame(body).encode();
            let cut = cut.min(wire.len().saturating_sub(1));
            prop_assert!(MessageFrame::decode(&wire[..cut]).is_err());
        }
    }

    #[test]
    fn header_round_trip() {
        let header = MessageHeader {
            sequence: 3,
            dh_pub: [0x11; 32],
            message_number: 9,
            prev_chain_len: 4,
        };

        let bytes = header.encode();
        assert_eq!(bytes.len(), MESSAGE_HEADER_LEN);
        assert_eq!(MessageHeader::decode(&bytes).unwrap(), header);
    }

    #[test]
    fn header_rejects_wrong_length() {
        assert!(MessageHeader::decode(&[0u8; 43]).is_err());
        assert!(MessageHeader::decode(&[0u8; 45]).is_err());
    }

    #[test]
    fn peek_sequence_matches_full_decode() {
        let frame = sample_frame(vec![1u8; 64]);
        let wire = frame.encode();

        assert_eq!(MessageFrame::peek_sequence(&wire).unwrap(), 42);
        assert_eq!(MessageFrame::peek_message_id(&wire).unwrap(), [7u8; 16]);
    }

    #[test]
    fn version_mismatch_is_rejected() {
        let mut frame = sample_frame(vec![1u8; 32]);
        frame.version = 2;
        let wire = frame.encode();

        assert_eq!(MessageFrame::decode(&wire), Err(ProtocolError::UnsupportedVersion(2)));
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let mut wire = sample_frame(vec![1u8; 32]).encode();
        wire.push(0);

        assert_eq!(MessageFrame::decode(&wire), Err(ProtocolError::TrailingBytes(1)));
    }

    #[test]
    fn oversized_length_field_is_rejected() {
        let mut wire = sample_frame(vec![1u8; 32]).encode();
        // Corrupt ct_len (offset 16 + 4 + 4 + 60 = 84) to claim more than
        // the frame holds.
        wire[84..88].copy_from_slice(&u32::MAX.to_be_bytes());

        assert!(matches!(
            MessageFrame::decode(&wire),
            Err(ProtocolError::FieldTooLong { .. })
        ));
    }

    #[test]
    fn ciphertext_shorter_than_a_tag_is_rejected() {
        let frame = sample_frame(vec![1u8; 8]);
        let wire = frame.encode();

        assert!(matches!(
            MessageFrame::decode(&wire),
            Err(ProtocolError::BadFieldLength { field: "ciphertext", .. })
        ));
    }

    #[test]
    fn mac_input_binds_sequence_header_and_body() {
        let frame = sample_frame(vec![5u8; 24]);
        let input = frame.mac_input();

        assert_eq!(&input[..4], &42u32.to_be_bytes());
        assert_eq!(&input[4..4 + ENCRYPTED_HEADER_LEN], &frame.encrypted_header);
        assert_eq!(&input[4 + ENCRYPTED_HEADER_LEN..], &frame.ciphertext[..]);
    }
}
