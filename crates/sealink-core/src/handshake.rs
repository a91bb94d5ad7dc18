//! Three-message handshake logic.
//!
//! Pure functions over [`Environment`]: build and verify the 152-byte
//! `InitiatorInit`, produce and process the 116-byte `ResponderReply`, and
//! hand back an initialized [`Ratchet`]. The third message is implicit —
//! the responder treats the first sequence-0 encrypted frame as
//! confirmation, so nothing here emits one.
//!
//! Nonce replay tracking is the relay's concern and happens *before*
//! [`respond`] is called; this module only enforces signature validity and
//! timestamp freshness.

use zeroize::Zeroizing;

use sealink_crypto::{
    kdf,
    keys::Iv,
    primitives::{aes_gcm_decrypt, aes_gcm_encrypt},
    EphemeralKeyPair, EphemeralPublic, IdentityKeyPair, IdentityPublic, Ratchet, Signature, Tag,
};
use sealink_proto::{InitiatorInit, ResponderReply, HANDSHAKE_PREKEY_AAD};

use crate::{env::Environment, error::SessionError, MAX_CLOCK_SKEW_MS};

/// Absolute clock-skew check shared by both directions.
fn check_skew(timestamp_ms: u64, now_ms: u64) -> Result<(), SessionError> {
    if now_ms.abs_diff(timestamp_ms) > MAX_CLOCK_SKEW_MS {
        return Err(SessionError::TimestampOutOfRange { timestamp_ms, now_ms });
    }
    Ok(())
}

/// Initiator-side handshake state between the two frames.
pub struct InitiatorHandshake {
    ephemeral: EphemeralKeyPair,
    started_at_ms: u64,
}

impl InitiatorHandshake {
    /// Generate the ephemeral key and build the signed `InitiatorInit`.
    pub fn initiate<E: Environment>(
        env: &E,
        identity: &IdentityKeyPair,
    ) -> (Self, InitiatorInit) {
        let ephemeral = EphemeralKeyPair::from_seed(env.random_array());
        let timestamp_ms = env.now_unix_ms();

        let mut init = InitiatorInit {
            client_ephemeral_pub: ephemeral.public().to_bytes(),
            client_identity_pub: identity.public().to_bytes(),
            signature: [0u8; 64],
            timestamp_ms,
            nonce: env.random_array(),
        };
        init.signature = identity.sign(&init.signed_transcript()).0;

        (Self { ephemeral, started_at_ms: timestamp_ms }, init)
    }

    /// When the handshake started, for deadline enforcement.
    pub fn started_at_ms(&self) -> u64 {
        self.started_at_ms
    }

    /// Process the responder's reply and produce the session material.
    ///
    /// # Errors
    ///
    /// - `HandshakeTimeout` past the 10-second deadline.
    /// - `TimestampOutOfRange` for a stale or future-dated reply.
    /// - `AuthFailure` if the prekey does not decrypt — the responder did
    ///   not derive the same root key.
    pub fn complete<E: Environment>(
        self,
        env: &E,
        reply: &ResponderReply,
    ) -> Result<HandshakeOutcome, SessionError> {
        let now_ms = env.now_unix_ms();
        let elapsed_ms = now_ms.saturating_sub(self.started_at_ms);
        if elapsed_ms > crate::HANDSHAKE_DEADLINE_MS {
            return Err(SessionError::HandshakeTimeout { elapsed_ms });
        }

        check_skew(reply.timestamp_ms, now_ms)?;

        let server_ephemeral = EphemeralPublic(reply.server_ephemeral_pub);
        let shared = self.ephemeral.diffie_hellman(&server_ephemeral);
        let root_key = kdf::derive_root(&shared);
        drop(shared);

        let prekey = aes_gcm_decrypt(
            root_key.as_bytes(),
            &Iv(reply.gcm_iv),
            &reply.encrypted_prekey,
            &Tag(reply.gcm_tag),
            HANDSHAKE_PREKEY_AAD,
        )?;

        let prekey: [u8; 32] = prekey
            .try_into()
            .map_err(|_| SessionError::Internal("prekey length changed in flight".to_string()))?;

        let ratchet = Ratchet::initialize(root_key, self.ephemeral, Some(server_ephemeral));

        Ok(HandshakeOutcome { ratchet, server_ephemeral, prekey: Zeroizing::new(prekey) })
    }
}

/// What a completed initiator handshake yields.
pub struct HandshakeOutcome {
    /// Ratchet keyed to the responder, ready to send.
    pub ratchet: Ratchet,
    /// Responder's ephemeral public key.
    pub server_ephemeral: EphemeralPublic,
    /// Decrypted 32-byte prekey; proof the responder holds the same root.
    pub prekey: Zeroizing<[u8; 32]>,
}

/// What the responder produces for an accepted `InitiatorInit`.
pub struct ResponderOutcome {
    /// Reply frame to send back.
    pub reply: ResponderReply,
    /// Authenticated initiator identity.
    pub client_identity: IdentityPublic,
    /// Initiator's handshake ephemeral.
    pub client_ephemeral: EphemeralPublic,
    /// Ratchet keyed to the initiator. A relay that never decrypts traffic
    /// drops this immediately; a true message peer keeps it.
    pub ratchet: Ratchet,
}

/// Run the responder side of the handshake.
///
/// Verification order follows the wire contract: signature, then timestamp.
/// Length is the codec's job and nonce uniqueness is the caller's.
///
/// # Errors
///
/// - `SignatureInvalid` for a bad identity key or signature.
/// - `TimestampOutOfRange` outside the ±5 minute window.
pub fn respond<E: Environment>(
    env: &E,
    init: &InitiatorInit,
) -> Result<ResponderOutcome, SessionError> {
    let client_identity = IdentityPublic::from_bytes(&init.client_identity_pub)
        .map_err(|_| SessionError::SignatureInvalid)?;
    client_identity.verify(&init.signed_transcript(), &Signature(init.signature))?;

    let now_ms = env.now_unix_ms();
    check_skew(init.timestamp_ms, now_ms)?;

    let server_ephemeral = EphemeralKeyPair::from_seed(env.random_array());
    let client_ephemeral = EphemeralPublic(init.client_ephemeral_pub);

    let shared = server_ephemeral.diffie_hellman(&client_ephemeral);
    let root_key = kdf::derive_root(&shared);
    drop(shared);

    let prekey: Zeroizing<[u8; 32]> = Zeroizing::new(env.random_array());
    let iv = Iv(env.random_array());
    let (ciphertext, tag) =
        aes_gcm_encrypt(root_key.as_bytes(), &iv, prekey.as_ref(), HANDSHAKE_PREKEY_AAD)?;

    let encrypted_prekey: [u8; 32] = ciphertext
        .try_into()
        .map_err(|_| SessionError::Internal("prekey ciphertext length".to_string()))?;

    let reply = ResponderReply {
        server_ephemeral_pub: server_ephemeral.public().to_bytes(),
        encrypted_prekey,
        gcm_tag: tag.0,
        gcm_iv: iv.0,
        timestamp_ms: now_ms,
        nonce: env.random_array(),
    };

    let ratchet = Ratchet::initialize(root_key, server_ephemeral, Some(client_ephemeral));

    Ok(ResponderOutcome { reply, client_identity, client_ephemeral, ratchet })
}
