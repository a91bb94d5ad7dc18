//! AEAD, MAC, and randomness primitives.
//!
//! Thin, typed wrappers over the RustCrypto crates. All tags are detached,
//! all comparisons over secret-derived material are constant-time, and
//! every function returns a typed error instead of panicking on misuse.

use aes_gcm::{
    aead::{AeadInPlace, KeyInit},
    Aes256Gcm, Nonce,
};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

use crate::{
    error::CryptoError,
    keys::{Iv, Tag, TAG_LEN},
};

type HmacSha256 = Hmac<Sha256>;

/// AES-256-GCM encryption with a detached 16-byte tag.
///
/// Returns `(ciphertext, tag)`. The ciphertext has the same length as the
/// plaintext.
pub fn aes_gcm_encrypt(
    key: &[u8; 32],
    iv: &Iv,
    plaintext: &[u8],
    aad: &[u8],
) -> Result<(Vec<u8>, Tag), CryptoError> {
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|_| CryptoError::InvalidKey("AES-256-GCM key must be 32 bytes"))?;

    let mut buffer = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(Nonce::from_slice(&iv.0), aad, &mut buffer)
        .map_err(|_| CryptoError::AuthFailure)?;

    let mut tag_bytes = [0u8; TAG_LEN];
    tag_bytes.copy_from_slice(&tag);

    Ok((buffer, Tag(tag_bytes)))
}

/// AES-256-GCM decryption with a detached tag.
///
/// # Errors
///
/// `CryptoError::AuthFailure` if the tag does not verify; the ciphertext is
/// not returned in any form on failure.
pub fn aes_gcm_decrypt(
    key: &[u8; 32],
    iv: &Iv,
    ciphertext: &[u8],
    tag: &Tag,
    aad: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|_| CryptoError::InvalidKey("AES-256-GCM key must be 32 bytes"))?;

    let mut buffer = ciphertext.to_vec();
    match cipher.decrypt_in_place_detached(
        Nonce::from_slice(&iv.0),
        aad,
        &mut buffer,
        aes_gcm::Tag::from_slice(&tag.0),
    ) {
        Ok(()) => Ok(buffer),
        Err(_) => {
            buffer.zeroize();
            Err(CryptoError::AuthFailure)
        },
    }
}

/// HMAC-SHA-256 over `data`.
pub fn hmac_sha256(key: &[u8], data: &[u8]) -> [u8; 32] {
    let Ok(mut mac) = <HmacSha256 as aes_gcm::aead::KeyInit>::new_from_slice(key) else {
        unreachable!("HMAC-SHA256 accepts any key size");
    };
    mac.update(data);

    let digest = mac.finalize().into_bytes();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

/// Constant-time HMAC verification.
///
/// # Errors
///
/// `CryptoError::AuthFailure` on mismatch.
pub fn hmac_sha256_verify(key: &[u8], data: &[u8], expected: &[u8]) -> Result<(), CryptoError> {
    let computed = hmac_sha256(key, data);
    if bool::from(computed.ct_eq(expected)) {
        Ok(())
    } else {
        Err(CryptoError::AuthFailure)
    }
}

/// Constant-time byte equality.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && bool::from(a.ct_eq(b))
}

/// Fill `buf` from the operating-system CSPRNG.
///
/// Only runtime edges call this; protocol drivers take randomness through
/// their environment so tests stay deterministic.
pub fn os_random_bytes(buf: &mut [u8]) {
    rand::rngs::OsRng.fill_bytes(buf);
}

/// Best-effort in-place zeroization: overwrite with random bytes, then zero.
pub fn wipe(buf: &mut [u8]) {
    rand::rngs::OsRng.fill_bytes(buf);
    buf.zeroize();
}
