//! Named HKDF-SHA-256 derivations.
//!
//! Every key role has its own fixed ASCII info string so no two roles can
//! ever collide on output, and every derivation uses extract-then-expand
//! with a 32-byte zero salt. The info strings are part of the wire-visible
//! agreement between endpoints.

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroize;

use crate::keys::{MessageKey, RootKey, SharedSecret, IV_LEN};

/// Info string for root-key derivation.
pub const ROOT_INFO: &[u8] = b"SecureMessenger-RootKey";

/// Info string for chain-key derivation.
pub const CHAIN_INFO: &[u8] = b"SecureMessenger-ChainKey";

/// Info string for message-key derivation (64-byte output).
pub const MESSAGE_INFO: &[u8] = b"SecureMessenger-MessageKey";

/// Info string for the outer-MAC subkey, derived from the encryption key.
pub const MAC_INFO: &[u8] = b"mac-key";

/// Info string for the body IV, derived from the encryption key.
pub const IV_INFO: &[u8] = b"iv";

/// Info string for chain-level header-encryption keys, derived from the
/// pre-advance root key.
pub const HEADER_KEY_INFO: &[u8] = b"SecureMessenger-HeaderKey";

/// Salt used by every derivation: a 32-byte zero block.
const ZERO_SALT: [u8; 32] = [0u8; 32];

fn expand(ikm: &[u8], info: &[u8], out: &mut [u8]) {
    let hk = Hkdf::<Sha256>::new(Some(&ZERO_SALT), ikm);
    let Ok(()) = hk.expand(info, out) else {
        unreachable!("output length is far below the HKDF-SHA256 limit");
    };
}

/// Derive the initial root key from a handshake shared secret.
pub fn derive_root(shared: &SharedSecret) -> RootKey {
    let mut out = [0u8; 32];
    expand(shared.as_bytes(), ROOT_INFO, &mut out);
    RootKey::from_bytes(out)
}

/// Advance a root key with a DH-step shared secret.
///
/// The extract input is `root_key || shared_secret`; both endpoints of a DH
/// step compute the same advanced root.
pub fn advance_root(root: &RootKey, shared: &SharedSecret) -> RootKey {
    let mut ikm = [0u8; 64];
    ikm[..32].copy_from_slice(root.as_bytes());
    ikm[32..].copy_from_slice(shared.as_bytes());

    let mut out = [0u8; 32];
    expand(&ikm, ROOT_INFO, &mut out);
    ikm.zeroize();

    RootKey::from_bytes(out)
}

/// Derive a fresh chain key from a just-advanced root key.
pub fn derive_chain(root: &RootKey) -> [u8; 32] {
    let mut out = [0u8; 32];
    expand(root.as_bytes(), CHAIN_INFO, &mut out);
    out
}

/// Derive the header-encryption key for the chain a root advance is about
/// to create.
///
/// Header keys come from the *pre-advance* root: both peers can compute the
/// key for the next chain before learning the DH public that will create
/// it, which is what lets a receiver recognize a DH-step message from its
/// encrypted header alone.
pub fn derive_header_key(root: &RootKey) -> [u8; 32] {
    let mut out = [0u8; 32];
    expand(root.as_bytes(), HEADER_KEY_INFO, &mut out);
    out
}

/// Derive the per-message material from a chain key.
///
/// Returns the assembled single-use [`MessageKey`] (encryption key, MAC
/// subkey, body IV) and the next chain key.
pub fn derive_message(chain_key: &[u8; 32], index: u32) -> (MessageKey, [u8; 32]) {
    let mut out = [0u8; 64];
    expand(chain_key, MESSAGE_INFO, &mut out);

    let mut enc = [0u8; 32];
    let mut next_chain = [0u8; 32];
    enc.copy_from_slice(&out[..32]);
    next_chain.copy_from_slice(&out[32..]);
    out.zeroize();

    let mut mac = [0u8; 32];
    expand(&enc, MAC_INFO, &mut mac);

    let mut iv = [0u8; IV_LEN];
    expand(&enc, IV_INFO, &mut iv);

    let key = MessageKey::new(enc, mac, iv, index);
    (key, next_chain)
}
