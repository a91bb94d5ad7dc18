//! Symmetric chain: a chain key plus the index of the next message key.
//!
//! Advancing the chain derives a single-use [`MessageKey`] and overwrites
//! the chain key with its successor, so a captured chain key can never
//! recover keys already handed out.

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{error::CryptoError, kdf, keys::MessageKey};

/// A sending or receiving chain.
///
/// `index` is the message number the next [`advance`](Self::advance) will
/// produce; it mirrors the session's send/receive counter.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct ChainKey {
    key: [u8; 32],
    #[zeroize(skip)]
    index: u32,
}

impl ChainKey {
    /// Highest index a chain may reach before it must be abandoned.
    ///
    /// Reaching it means 2^32 - 1 messages on one chain; the session owner
    /// runs a fresh handshake instead of wrapping.
    pub const MAX_INDEX: u32 = u32::MAX - 1;

    /// Start a chain at index 0 from a just-derived chain key.
    pub fn new(key: [u8; 32]) -> Self {
        Self { key, index: 0 }
    }

    /// Next message number this chain will emit or consume.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Derive the message key for the current index and step the chain.
    ///
    /// # Errors
    ///
    /// `CryptoError::ChainExhausted` once the index reaches
    /// [`Self::MAX_INDEX`].
    pub fn advance(&mut self) -> Result<MessageKey, CryptoError> {
        if self.index >= Self::MAX_INDEX {
            return Err(CryptoError::ChainExhausted { index: self.index });
        }

        let (message_key, next_chain) = kdf::derive_message(&self.key, self.index);

        self.key.zeroize();
        self.key = next_chain;
        self.index += 1;

        Ok(message_key)
    }
}

impl std::fmt::Debug for ChainKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainKey").field("index", &self.index).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_increments_index() {
        let mut chain = ChainKey::new([1u8; 32]);

        let k0 = chain.advance().unwrap();
        assert_eq!(k0.index(), 0);
        assert_eq!(chain.index(), 1);

        let k1 = chain.advance().unwrap();
        assert_eq!(k1.index(), 1);
        assert_eq!(chain.index(), 2);
    }

    #[test]
    fn advance_produces_unique_keys() {
        let mut chain = ChainKey::new([1u8; 32]);

        let k0 = chain.advance().unwrap();
        let k1 = chain.advance().unwrap();
        assert_ne!(k0.enc_key(), k1.enc_key());
        assert_ne!(k0.iv(), k1.iv());
    }

    #[test]
    fn same_seed_produces_same_sequence() {
        let mut a = ChainKey::new([2u8; 32]);
        let mut b = ChainKey::new([2u8; 32]);

        for _ in 0..16 {
            let ka = a.advance().unwrap();
            let kb = b.advance().unwrap();
            assert_eq!(ka.enc_key(), kb.enc_key());
            assert_eq!(ka.index(), kb.index());
        }
    }

    #[test]
    fn exhausted_chain_refuses_to_advance() {
        let mut chain = ChainKey::new([3u8; 32]);
        chain.index = ChainKey::MAX_INDEX;

        assert!(matches!(chain.advance(), Err(CryptoError::ChainExhausted { .. })));
    }
}
