//! Strongly typed key material.
//!
//! Every secret lives behind a newtype that zeroizes on drop and compares in
//! constant time. Raw byte access exists only at the wire boundary; nothing
//! in the rest of the workspace handles bare key arrays.

use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use subtle::ConstantTimeEq;
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;

/// Length of an Ed25519 or X25519 public key.
pub const PUBLIC_KEY_LEN: usize = 32;

/// Length of a persisted identity private component: seed || public key.
pub const IDENTITY_PRIVATE_LEN: usize = 64;

/// Length of an Ed25519 signature.
pub const SIGNATURE_LEN: usize = 64;

/// Length of the anti-replay handshake nonce.
pub const HANDSHAKE_NONCE_LEN: usize = 16;

/// Length of an AES-GCM IV.
pub const IV_LEN: usize = 12;

/// Length of an AES-GCM authentication tag.
pub const TAG_LEN: usize = 16;

/// Long-lived Ed25519 identity keypair.
///
/// The hex encoding of the public component is the stable party identifier.
/// An identity is created once per party and never rotates.
#[derive(Clone)]
pub struct IdentityKeyPair {
    signing: SigningKey,
}

impl IdentityKeyPair {
    /// Build an identity from a 32-byte seed.
    ///
    /// The caller provides the seed from a CSPRNG; keeping randomness out of
    /// this type keeps key generation deterministic under test environments.
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self { signing: SigningKey::from_bytes(&seed) }
    }

    /// Restore an identity from its persisted 64-byte layout (seed || pub).
    ///
    /// # Errors
    ///
    /// `CryptoError::InvalidKey` if the trailing public half does not match
    /// the key derived from the seed (a corrupted or spliced identity file).
    pub fn from_keypair_bytes(bytes: &[u8; IDENTITY_PRIVATE_LEN]) -> Result<Self, CryptoError> {
        let mut seed = [0u8; 32];
        seed.copy_from_slice(&bytes[..32]);
        let signing = SigningKey::from_bytes(&seed);
        seed.zeroize();

        let derived_public = signing.verifying_key().to_bytes();
        if !bool::from(derived_public.ct_eq(&bytes[32..])) {
            return Err(CryptoError::InvalidKey("identity public half does not match seed"));
        }

        Ok(Self { signing })
    }

    /// Serialize as the persisted 64-byte layout (seed || pub).
    pub fn to_keypair_bytes(&self) -> [u8; IDENTITY_PRIVATE_LEN] {
        self.signing.to_keypair_bytes()
    }

    /// Public half of the identity.
    pub fn public(&self) -> IdentityPublic {
        IdentityPublic { key: self.signing.verifying_key() }
    }

    /// Sign `message` with the identity key.
    pub fn sign(&self, message: &[u8]) -> Signature {
        Signature(self.signing.sign(message).to_bytes())
    }
}

impl std::fmt::Debug for IdentityKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityKeyPair").field("party_id", &self.public().party_id()).finish()
    }
}

/// Public half of an identity key.
#[derive(Clone, Copy)]
pub struct IdentityPublic {
    key: VerifyingKey,
}

impl IdentityPublic {
    /// Parse from wire bytes.
    ///
    /// # Errors
    ///
    /// `CryptoError::InvalidKey` if the bytes are not a valid curve point.
    pub fn from_bytes(bytes: &[u8; PUBLIC_KEY_LEN]) -> Result<Self, CryptoError> {
        let key = VerifyingKey::from_bytes(bytes)
            .map_err(|_| CryptoError::InvalidKey("malformed Ed25519 public key"))?;
        Ok(Self { key })
    }

    /// Raw wire bytes.
    pub fn to_bytes(&self) -> [u8; PUBLIC_KEY_LEN] {
        self.key.to_bytes()
    }

    /// Stable party identifier: lowercase hex of the public key.
    pub fn party_id(&self) -> String {
        hex::encode(self.key.to_bytes())
    }

    /// Verify an Ed25519 signature over `message`.
    ///
    /// # Errors
    ///
    /// `CryptoError::SignatureInvalid` on any verification failure.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> Result<(), CryptoError> {
        let sig = ed25519_dalek::Signature::from_bytes(&signature.0);
        self.key.verify(message, &sig).map_err(|_| CryptoError::SignatureInvalid)
    }
}

impl PartialEq for IdentityPublic {
    fn eq(&self, other: &Self) -> bool {
        bool::from(self.key.to_bytes().ct_eq(&other.key.to_bytes()))
    }
}

impl Eq for IdentityPublic {}

impl std::fmt::Debug for IdentityPublic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "IdentityPublic({})", &self.party_id()[..8])
    }
}

/// Detached Ed25519 signature.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature(pub [u8; SIGNATURE_LEN]);

impl std::fmt::Debug for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Signature(..)")
    }
}

/// Short-lived X25519 keypair, created per handshake and per ratchet step.
///
/// The secret half zeroizes on drop (via `x25519_dalek::StaticSecret`);
/// callers drop the pair as soon as a DH step supersedes it.
pub struct EphemeralKeyPair {
    secret: StaticSecret,
    public: EphemeralPublic,
}

impl EphemeralKeyPair {
    /// Build an ephemeral keypair from 32 CSPRNG bytes.
    pub fn from_seed(seed: [u8; 32]) -> Self {
        let secret = StaticSecret::from(seed);
        let public = EphemeralPublic(X25519Public::from(&secret).to_bytes());
        Self { secret, public }
    }

    /// Public half.
    pub fn public(&self) -> EphemeralPublic {
        self.public
    }

    /// X25519 shared secret with a remote public key.
    pub fn diffie_hellman(&self, remote: &EphemeralPublic) -> SharedSecret {
        let shared = self.secret.diffie_hellman(&X25519Public::from(remote.0));
        SharedSecret(shared.to_bytes())
    }
}

impl std::fmt::Debug for EphemeralKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EphemeralKeyPair({})", hex::encode(&self.public.0[..4]))
    }
}

/// Public half of an ephemeral X25519 key, as carried in message headers.
#[derive(Clone, Copy)]
pub struct EphemeralPublic(pub [u8; PUBLIC_KEY_LEN]);

impl EphemeralPublic {
    /// Raw wire bytes.
    pub fn to_bytes(&self) -> [u8; PUBLIC_KEY_LEN] {
        self.0
    }
}

impl PartialEq for EphemeralPublic {
    fn eq(&self, other: &Self) -> bool {
        bool::from(self.0.ct_eq(&other.0))
    }
}

impl Eq for EphemeralPublic {}

impl std::fmt::Debug for EphemeralPublic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EphemeralPublic({})", hex::encode(&self.0[..4]))
    }
}

/// X25519 shared secret; exists only long enough to feed HKDF.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SharedSecret(pub(crate) [u8; 32]);

impl SharedSecret {
    /// Wrap secret bytes agreed outside this crate (tests, out-of-band
    /// key agreement).
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Raw bytes for key derivation input.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

/// 32-byte root key; evolves only on a DH ratchet step.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct RootKey(pub(crate) [u8; 32]);

impl RootKey {
    /// Wrap raw derived bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Raw bytes for key derivation input.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl PartialEq for RootKey {
    fn eq(&self, other: &Self) -> bool {
        bool::from(self.0.ct_eq(&other.0))
    }
}

impl Eq for RootKey {}

impl std::fmt::Debug for RootKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RootKey(..)")
    }
}

/// Single-use message key: encryption key, MAC subkey, and derived body IV,
/// tagged with the chain index it was derived at.
///
/// Used for exactly one seal/open and zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MessageKey {
    enc: [u8; 32],
    mac: [u8; 32],
    iv: [u8; IV_LEN],
    #[zeroize(skip)]
    index: u32,
}

impl MessageKey {
    pub(crate) fn new(enc: [u8; 32], mac: [u8; 32], iv: [u8; IV_LEN], index: u32) -> Self {
        Self { enc, mac, iv, index }
    }

    /// AES-256-GCM encryption key.
    pub fn enc_key(&self) -> &[u8; 32] {
        &self.enc
    }

    /// HMAC-SHA-256 subkey for the outer frame MAC.
    pub fn mac_key(&self) -> &[u8; 32] {
        &self.mac
    }

    /// Derived IV for the message body.
    pub fn iv(&self) -> Iv {
        Iv(self.iv)
    }

    /// Chain index this key was derived at (equals the wire message number).
    pub fn index(&self) -> u32 {
        self.index
    }
}

impl std::fmt::Debug for MessageKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageKey").field("index", &self.index).finish_non_exhaustive()
    }
}

/// Chain-level header-encryption key.
///
/// One per chain, derived from the pre-advance root key. Encrypts the
/// 44-byte ratchet header so the relay (and any observer) learns nothing
/// about chain positions or DH steps.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct HeaderKey(pub(crate) [u8; 32]);

impl HeaderKey {
    /// Raw key bytes for the AEAD.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl PartialEq for HeaderKey {
    fn eq(&self, other: &Self) -> bool {
        bool::from(self.0.ct_eq(&other.0))
    }
}

impl Eq for HeaderKey {}

impl std::fmt::Debug for HeaderKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "HeaderKey(..)")
    }
}

/// 16-byte anti-replay handshake nonce. Distinct from AEAD IVs.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandshakeNonce(pub [u8; HANDSHAKE_NONCE_LEN]);

impl std::fmt::Debug for HandshakeNonce {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "HandshakeNonce({})", hex::encode(self.0))
    }
}

/// 12-byte AES-GCM IV.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Iv(pub [u8; IV_LEN]);

/// 16-byte AES-GCM authentication tag. Compared in constant time.
#[derive(Clone, Copy)]
pub struct Tag(pub [u8; TAG_LEN]);

impl PartialEq for Tag {
    fn eq(&self, other: &Self) -> bool {
        bool::from(self.0.ct_eq(&other.0))
    }
}

impl Eq for Tag {}

impl std::fmt::Debug for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Tag(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_round_trips_through_keypair_bytes() {
        let identity = IdentityKeyPair::from_seed([7u8; 32]);
        let bytes = identity.to_keypair_bytes();

        let restored = IdentityKeyPair::from_keypair_bytes(&bytes).unwrap();
        assert_eq!(identity.public(), restored.public());
    }

    #[test]
    fn keypair_bytes_layout_is_seed_then_public() {
        let identity = IdentityKeyPair::from_seed([9u8; 32]);
        let bytes = identity.to_keypair_bytes();

        assert_eq!(&bytes[..32], &[9u8; 32]);
        assert_eq!(&bytes[32..], &identity.public().to_bytes());
    }

    #[test]
    fn spliced_keypair_bytes_are_rejected() {
        let a = IdentityKeyPair::from_seed([1u8; 32]);
        let b = IdentityKeyPair::from_seed([2u8; 32]);

        let mut spliced = a.to_keypair_bytes();
        spliced[32..].copy_from_slice(&b.public().to_bytes());

        assert!(matches!(
            IdentityKeyPair::from_keypair_bytes(&spliced),
            Err(CryptoError::InvalidKey(_))
        ));
    }

    #[test]
    fn party_id_is_hex_of_public() {
        let identity = IdentityKeyPair::from_seed([3u8; 32]);
        assert_eq!(identity.public().party_id(), hex::encode(identity.public().to_bytes()));
    }

    #[test]
    fn sign_verify_round_trip() {
        let identity = IdentityKeyPair::from_seed([5u8; 32]);
        let sig = identity.sign(b"payload");

        identity.public().verify(b"payload", &sig).unwrap();
        assert_eq!(
            identity.public().verify(b"tampered", &sig),
            Err(CryptoError::SignatureInvalid)
        );
    }

    #[test]
    fn diffie_hellman_commutes() {
        let a = EphemeralKeyPair::from_seed([11u8; 32]);
        let b = EphemeralKeyPair::from_seed([13u8; 32]);

        let ab = a.diffie_hellman(&b.public());
        let ba = b.diffie_hellman(&a.public());
        assert_eq!(ab.as_bytes(), ba.as_bytes());
    }

    #[test]
    fn ephemeral_publics_compare_by_value() {
        let a = EphemeralKeyPair::from_seed([17u8; 32]);
        let b = EphemeralKeyPair::from_seed([19u8; 32]);

        assert_eq!(a.public(), a.public());
        assert_ne!(a.public(), b.public());
    }
}
