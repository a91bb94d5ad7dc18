//! Message sealing and opening.
//!
//! Turns a plaintext payload plus ratchet state into a wire
//! [`MessageFrame`] and back. Three layers of protection per frame:
//!
//! 1. body: AES-256-GCM under the single-use message key, IV derived from
//!    that key;
//! 2. header: AES-256-GCM under the chain's header key, IV taken from the
//!    random message id, with the body ciphertext as AAD;
//! 3. outer MAC: HMAC-SHA-256 under the message key's MAC subkey, binding
//!    the plaintext sequence to both ciphertexts.

use sealink_crypto::{
    keys::Iv,
    primitives::{aes_gcm_decrypt, aes_gcm_encrypt, hmac_sha256, hmac_sha256_verify},
    EphemeralPublic, Ratchet, Tag,
};
use sealink_proto::{
    message::{ENCRYPTED_HEADER_LEN, MESSAGE_HEADER_LEN},
    MessageFrame, MessageHeader, PROTOCOL_VERSION,
};

use crate::{env::Environment, error::SessionError};

/// Seal `plaintext` as the next outbound message on `ratchet`.
///
/// `sequence` is the channel sequence the relay will enforce; it is written
/// both in the clear and inside the encrypted header.
pub fn seal_message<E: Environment>(
    env: &E,
    ratchet: &mut Ratchet,
    sequence: u32,
    plaintext: &[u8],
) -> Result<MessageFrame, SessionError> {
    let message_id: [u8; 16] = env.random_array();

    let (key, ratchet_header) = ratchet.send()?;

    let header = MessageHeader {
        sequence,
        dh_pub: ratchet_header.dh_public.to_bytes(),
        message_number: ratchet_header.message_number,
        prev_chain_len: ratchet_header.previous_chain_length,
    };

    // Body first: its ciphertext is the header's AAD.
    let (mut ciphertext, body_tag) = aes_gcm_encrypt(key.enc_key(), &key.iv(), plaintext, b"")?;
    ciphertext.extend_from_slice(&body_tag.0);

    let header_key = ratchet
        .send_header_key()
        .ok_or_else(|| SessionError::Internal("sending chain without header key".to_string()))?
        .clone();

    let header_iv = header_iv_from(&message_id);
    let (header_ct, header_tag) =
        aes_gcm_encrypt(header_key.as_bytes(), &header_iv, &header.encode(), &ciphertext)?;

    let mut encrypted_header = [0u8; ENCRYPTED_HEADER_LEN];
    encrypted_header[..MESSAGE_HEADER_LEN].copy_from_slice(&header_ct);
    encrypted_header[MESSAGE_HEADER_LEN..].copy_from_slice(&header_tag.0);

    let mut frame = MessageFrame {
        message_id,
        sequence,
        encrypted_header,
        ciphertext,
        mac: [0u8; 32],
        timestamp_ms: env.now_unix_ms(),
        version: PROTOCOL_VERSION,
    };
    frame.mac = hmac_sha256(key.mac_key(), &frame.mac_input());

    Ok(frame)
}

/// Open an inbound message frame against `ratchet`.
///
/// Returns the decrypted header and plaintext.
///
/// # Errors
///
/// - `AuthFailure` if no candidate header key opens the header, the outer
///   MAC fails, or the body tag fails.
/// - `SequenceError` if the plaintext sequence disagrees with the sealed
///   one.
/// - Ratchet errors for replayed, over-skipped, or exhausted positions.
pub fn open_message(
    ratchet: &mut Ratchet,
    frame: &MessageFrame,
) -> Result<(MessageHeader, Vec<u8>), SessionError> {
    // The codec guarantees this for decoded frames; hand-built ones get
    // the same check.
    if frame.ciphertext.len() < 16 {
        return Err(SessionError::AuthFailure);
    }

    let header_iv = header_iv_from(&frame.message_id);

    let header_ct = &frame.encrypted_header[..MESSAGE_HEADER_LEN];
    let mut header_tag = [0u8; 16];
    header_tag.copy_from_slice(&frame.encrypted_header[MESSAGE_HEADER_LEN..]);
    let header_tag = Tag(header_tag);

    // Try the bounded candidate set: current chain, next chain (a match
    // signals a DH step), superseded chain.
    let candidates = ratchet.header_key_candidates();
    let ordered = [
        candidates.current.as_ref(),
        Some(&candidates.next),
        candidates.previous.as_ref(),
    ];

    let mut header_bytes = None;
    for header_key in ordered.into_iter().flatten() {
        if let Ok(bytes) = aes_gcm_decrypt(
            header_key.as_bytes(),
            &header_iv,
            header_ct,
            &header_tag,
            &frame.ciphertext,
        ) {
            header_bytes = Some(bytes);
            break;
        }
    }

    let header_bytes = header_bytes.ok_or(SessionError::AuthFailure)?;
    let header = MessageHeader::decode(&header_bytes)?;

    // Outer and sealed sequence must agree before anything advances.
    if header.sequence != frame.sequence {
        return Err(SessionError::SequenceError {
            expected: header.sequence,
            got: frame.sequence,
        });
    }

    let remote = EphemeralPublic(header.dh_pub);
    let key = ratchet.recv(&remote, header.message_number, header.prev_chain_len)?;

    debug_assert_eq!(key.index(), header.message_number);

    hmac_sha256_verify(key.mac_key(), &frame.mac_input(), &frame.mac)?;

    let body_len = frame.ciphertext.len() - 16;
    let (body_ct, body_tag) = frame.ciphertext.split_at(body_len);
    let mut tag = [0u8; 16];
    tag.copy_from_slice(body_tag);

    let plaintext = aes_gcm_decrypt(key.enc_key(), &key.iv(), body_ct, &Tag(tag), b"")?;

    Ok((header, plaintext))
}

fn header_iv_from(message_id: &[u8; 16]) -> Iv {
    let mut iv = [0u8; 12];
    iv.copy_from_slice(&message_id[..12]);
    Iv(iv)
}
