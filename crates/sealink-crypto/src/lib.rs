//! Sealink cryptographic primitives.
//!
//! Building blocks for the Sealink session engine: identity and ephemeral
//! keys, AEAD sealing, named HKDF derivations, and the Double-Ratchet state
//! machine that turns one handshake-derived root key into a forward-secret
//! stream of single-use message keys.
//!
//! # Key Lifecycle
//!
//! ```text
//! Handshake (X25519 + Ed25519 auth)
//!        │
//!        ▼
//! HKDF → Root Key (advanced on every DH ratchet step)
//!        │
//!        ▼
//! HKDF → Chain Key (one sending chain, one receiving chain)
//!        │
//!        ▼
//! HKDF → Message Key (enc + MAC subkey + derived IVs, used exactly once)
//!        │
//!        ▼
//! AES-256-GCM + HMAC-SHA-256 → Framed ciphertext
//! ```
//!
//! Message keys are consumed by a single seal/open operation and zeroized.
//! Chain keys are overwritten as they advance. Root keys survive only until
//! the next DH step. Compromise of current state does not reveal the keys of
//! previously delivered messages.
//!
//! # Security
//!
//! - Forward Secrecy: chain advance overwrites the old chain key; DH steps
//!   replace the root key and retire the superseded ephemeral secret.
//! - Out-of-order delivery: skipped message keys are cached (bounded at
//!   [`ratchet::MAX_SKIPPED_KEYS`]) and zeroized on eviction or use.
//! - Constant-time comparison for all MAC and public-key equality checks.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod chain;
pub mod error;
pub mod kdf;
pub mod keys;
pub mod primitives;
pub mod ratchet;

pub use chain::ChainKey;
pub use error::CryptoError;
pub use keys::{
    EphemeralKeyPair, EphemeralPublic, HandshakeNonce, HeaderKey, IdentityKeyPair, IdentityPublic,
    Iv, MessageKey, RootKey, SharedSecret, Signature, Tag,
};
pub use ratchet::{HeaderKeyCandidates, Ratchet, RatchetHeader, MAX_SKIPPED_KEYS};
