//! Handshake frames.
//!
//! Two fixed-size frames bootstrap a session: the 152-byte `InitiatorInit`
//! and the 116-byte `ResponderReply`. The third exchange is implicit — the
//! responder treats the first sequence-0 message frame as confirmation, so
//! no frame type exists for it.

use bytes::BufMut;

use crate::error::ProtocolError;

/// Wire length of an [`InitiatorInit`].
pub const INITIATOR_INIT_LEN: usize = 152;

/// Wire length of a [`ResponderReply`].
pub const RESPONDER_REPLY_LEN: usize = 116;

/// First handshake frame, initiator → responder.
///
/// Layout (all integers big-endian):
///
/// ```text
/// client_ephemeral_pub (32) || client_identity_pub (32) ||
/// signature            (64) || timestamp_ms u64 (8) || nonce (16)
/// ```
///
/// The signature covers `client_ephemeral_pub || client_identity_pub ||
/// timestamp_ms || nonce` under the initiator's identity key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitiatorInit {
    /// Initiator's X25519 ephemeral public key.
    pub client_ephemeral_pub: [u8; 32],
    /// Initiator's Ed25519 identity public key.
    pub client_identity_pub: [u8; 32],
    /// Ed25519 signature over the signed transcript.
    pub signature: [u8; 64],
    /// Initiator wall clock, unix milliseconds.
    pub timestamp_ms: u64,
    /// Anti-replay nonce.
    pub nonce: [u8; 16],
}

impl InitiatorInit {
    /// The byte string the initiator signs and the responder verifies.
    pub fn signed_transcript(&self) -> [u8; 88] {
        let mut out = [0u8; 88];
        out[..32].copy_from_slice(&self.client_ephemeral_pub);
        out[32..64].copy_from_slice(&self.client_identity_pub);
        out[64..72].copy_from_slice(&self.timestamp_ms.to_be_bytes());
        out[72..].copy_from_slice(&self.nonce);
        out
    }

    /// Encode to the 152-byte wire layout.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(INITIATOR_INIT_LEN);
        out.put_slice(&self.client_ephemeral_pub);
        out.put_slice(&self.client_identity_pub);
        out.put_slice(&self.signature);
        out.put_u64(self.timestamp_ms);
        out.put_slice(&self.nonce);

        debug_assert_eq!(out.len(), INITIATOR_INIT_LEN);
        out
    }

    /// Decode from wire bytes.
    ///
    /// # Errors
    ///
    /// `ProtocolError::LengthMismatch` unless the frame is exactly 152
    /// bytes. No cryptographic checks happen here.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() != INITIATOR_INIT_LEN {
            return Err(ProtocolError::LengthMismatch {
                expected: INITIATOR_INIT_LEN,
                actual: bytes.len(),
            });
        }

        let mut client_ephemeral_pub = [0u8; 32];
        let mut client_identity_pub = [0u8; 32];
        let mut signature = [0u8; 64];
        let mut timestamp = [0u8; 8];
        let mut nonce = [0u8; 16];

        client_ephemeral_pub.copy_from_slice(&bytes[0..32]);
        client_identity_pub.copy_from_slice(&bytes[32..64]);
        signature.copy_from_slice(&bytes[64..128]);
        timestamp.copy_from_slice(&bytes[128..136]);
        nonce.copy_from_slice(&bytes[136..152]);

        Ok(Self {
            client_ephemeral_pub,
            client_identity_pub,
            signature,
            timestamp_ms: u64::from_be_bytes(timestamp),
            nonce,
        })
    }
}

/// Second handshake frame, responder → initiator.
///
/// Layout:
///
/// ```text
/// server_ephemeral_pub (32) || encrypted_prekey (32) || gcm_tag (16) ||
/// gcm_iv               (12) || timestamp_ms u64 (8)  || nonce (16)
/// ```
///
/// The prekey is a 32-byte random value sealed under the handshake-derived
/// root key; decrypting it proves the responder computed the same root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponderReply {
    /// Responder's X25519 ephemeral public key.
    pub server_ephemeral_pub: [u8; 32],
    /// AES-256-GCM ciphertext of the 32-byte prekey.
    pub encrypted_prekey: [u8; 32],
    /// Detached GCM tag for the prekey.
    pub gcm_tag: [u8; 16],
    /// GCM IV used for the prekey.
    pub gcm_iv: [u8; 12],
    /// Responder wall clock, unix milliseconds.
    pub timestamp_ms: u64,
    /// Responder nonce (fresh, not the initiator's).
    pub nonce: [u8; 16],
}

impl ResponderReply {
    /// Encode to the 116-byte wire layout.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(RESPONDER_REPLY_LEN);
        out.put_slice(&self.server_ephemeral_pub);
        out.put_slice(&self.encrypted_prekey);
        out.put_slice(&self.gcm_tag);
        out.put_slice(&self.gcm_iv);
        out.put_u64(self.timestamp_ms);
        out.put_slice(&self.nonce);

        debug_assert_eq!(out.len(), RESPONDER_REPLY_LEN);
        out
    }

    /// Decode from wire bytes.
    ///
    /// # Errors
    ///
    /// `ProtocolError::LengthMismatch` unless the frame is exactly 116
    /// bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() != RESPONDER_REPLY_LEN {
            return Err(ProtocolError::LengthMismatch {
                expected: RESPONDER_REPLY_LEN,
                actual: bytes.len(),
            });
        }

        let mut server_ephemeral_pub = [0u8; 32];
        let mut encrypted_prekey = [0u8; 32];
        let mut gcm_tag = [0u8; 16];
        let mut gcm_iv = [0u8; 12];
        let mut timestamp = [0u8; 8];
        let mut nonce = [0u8; 16];

        server_ephemeral_pub.copy_from_slice(&bytes[0..32]);
        encrypted_prekey.copy_from_slice(&bytes[32..64]);
        gcm_tag.copy_from_slice(&bytes[64..80]);
        gcm_iv.copy_from_slice(&bytes[80..92]);
        timestamp.copy_from_slice(&bytes[92..100]);
        nonce.copy_from_slice(&bytes[100..116]);

        Ok(Self {
            server_ephemeral_pub,
            encrypted_prekey,
            gcm_tag,
            gcm_iv,
            timestamp_ms: u64::from_be_bytes(timestamp),
            nonce,
        })
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn arb_init() -> impl Strategy<Value = InitiatorInit> {
        (
            any::<[u8; 32]>(),
            any::<[u8; 32]>(),
            any::<[u8; 32]>(),
            any::<[u8; 32]>(),
            any::<u64>(),
            any::<[u8; 16]>(),
        )
            .prop_map(|(eph, id, sig_a, sig_b, timestamp_ms, nonce)| {
                let mut signature = [0u8; 64];
                signature[..32].copy_from_slice(&sig_a);
                signature[32..].copy_from_slice(&sig_b);
                InitiatorInit {
                    client_ephemeral_pub: eph,
                    client_identity_pub: id,
                    signature,
                    timestamp_ms,
                    nonce,
                }
            })
    }

    proptest! {
        #[test]
        fn initiator_init_round_trip(frame in arb_init()) {
            let wire = frame.encode();
            prop_assert_eq!(wire.len(), INITIATOR_INIT_LEN);

            let parsed = InitiatorInit::decode(&wire).unwrap();
            prop_assert_eq!(parsed, frame);
        }

        #[test]
        fn initiator_init_rejects_wrong_length(len in 0usize..512) {
            prop_assume!(len != INITIATOR_INIT_LEN);
            let bytes = vec![0u8; len];
            prop_assert!(InitiatorInit::decode(&bytes).is_err());
        }
    }

    #[test]
    fn responder_reply_round_trip() {
        let reply = ResponderReply {
            server_ephemeral_pub: [1u8; 32],
            encrypted_prekey: [2u8; 32],
            gcm_tag: [3u8; 16],
            gcm_iv: [4u8; 12],
            timestamp_ms: 1_700_000_000_000,
            nonce: [5u8; 16],
        };

        let wire = reply.encode();
        assert_eq!(wire.len(), RESPONDER_REPLY_LEN);
        assert_eq!(ResponderReply::decode(&wire).unwrap(), reply);
    }

    #[test]
    fn field_offsets_match_the_wire_contract() {
        let init = InitiatorInit {
            client_ephemeral_pub: [0xAA; 32],
            client_identity_pub: [0xBB; 32],
            signature: [0xCC; 64],
            timestamp_ms: 0x0102_0304_0506_0708,
            nonce: [0xDD; 16],
        };
        let wire = init.encode();

        assert_eq!(&wire[0..32], &[0xAA; 32]);
        assert_eq!(&wire[32..64], &[0xBB; 32]);
        assert_eq!(&wire[64..128], &[0xCC; 64]);
        assert_eq!(&wire[128..136], &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(&wire[136..152], &[0xDD; 16]);
    }

    #[test]
    fn signed_transcript_layout() {
        let init = InitiatorInit {
            client_ephemeral_pub: [1; 32],
            client_identity_pub: [2; 32],
            signature: [0; 64],
            timestamp_ms: 7,
            nonce: [3; 16],
        };
        let transcript = init.signed_transcript();

        assert_eq!(&transcript[..32], &[1; 32]);
        assert_eq!(&transcript[32..64], &[2; 32]);
        assert_eq!(&transcript[64..72], &7u64.to_be_bytes());
        assert_eq!(&transcript[72..], &[3; 16]);
    }

    #[test]
    fn nonce_occupies_the_trailing_sixteen_bytes() {
        // The relay extracts the nonce without a full decode.
        let init = InitiatorInit {
            client_ephemeral_pub: [0; 32],
            client_identity_pub: [0; 32],
            signature: [0; 64],
            timestamp_ms: 0,
            nonce: [0x42; 16],
        };
        let wire = init.encode();
        assert_eq!(&wire[INITIATOR_INIT_LEN - 16..], &[0x42; 16]);
    }
}
