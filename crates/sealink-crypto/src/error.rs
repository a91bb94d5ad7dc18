//! Error types for cryptographic operations.

use thiserror::Error;

/// Errors produced by primitives and the ratchet.
///
/// Cryptographic failures are never recovered in place; callers collapse the
/// session that produced them.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// AEAD tag or HMAC verification failed.
    #[error("authentication failure")]
    AuthFailure,

    /// Ed25519 signature did not verify.
    #[error("invalid signature")]
    SignatureInvalid,

    /// Key material had the wrong length or was structurally invalid.
    #[error("invalid key material: {0}")]
    InvalidKey(&'static str),

    /// A sending or receiving chain reached its 2^32 - 1 message limit.
    ///
    /// The session must run a fresh handshake; no further keys can be
    /// derived from this chain.
    #[error("chain exhausted after {index} messages")]
    ChainExhausted {
        /// Index at which the chain ran out.
        index: u32,
    },

    /// A receive would require skipping more message keys than the cache
    /// allows.
    #[error("refusing to skip {requested} message keys (cap {cap})")]
    TooManySkipped {
        /// Number of keys the skip would have derived.
        requested: u32,
        /// Configured cache cap.
        cap: u32,
    },

    /// A message from a superseded chain arrived and its key was no longer
    /// cached.
    #[error("no cached key for superseded-chain message {index}")]
    OldChainKeyMissing {
        /// Message number the sender assigned within its old chain.
        index: u32,
    },

    /// The ratchet was asked to operate before it had the material to do so.
    #[error("ratchet not initialized: {0}")]
    NotInitialized(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_coarse() {
        // Error text must not leak key material or internal offsets beyond
        // the counters that are already wire-visible.
        let err = CryptoError::TooManySkipped { requested: 5000, cap: 1000 };
        assert_eq!(err.to_string(), "refusing to skip 5000 message keys (cap 1000)");

        assert_eq!(CryptoError::AuthFailure.to_string(), "authentication failure");
    }
}
