//! Cryptographic operations using ChaCha20-Poly1305.

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Nonce,
};
use rand::{rngs::OsRng, RngCore};

use crate::error::{RatchetError, Result};
use crate::secret::SecretKey;
use crate::types::NONCE_LEN;

/// Generates a fresh random nonce
pub fn generate_nonce() -> [u8; NONCE_LEN] {
    let mut n = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut n);
    n
}

/// Encrypts plaintext under a one-time message key
///
/// # Arguments
/// * `mk` - Message key
/// * `nonce` - Nonce, unique per key
/// * `ad` - Associated data (canonical header plus caller data)
/// * `pt` - Plaintext
///
/// # Returns
/// Ciphertext with authentication tag appended
pub fn seal(mk: &SecretKey, nonce: &[u8; NONCE_LEN], ad: &[u8], pt: &[u8]) -> Result<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new(mk.as_bytes().into());
    cipher
        .encrypt(Nonce::from_slice(nonce), Payload { msg: pt, aad: ad })
        .map_err(|_| RatchetError::EncryptionFailed)
}

/// Verifies and decrypts ciphertext
///
/// Note: the caller owns `mk` and drops (wipes) it after use.
pub fn open(mk: &SecretKey, nonce: &[u8; NONCE_LEN], ad: &[u8], ct: &[u8]) -> Result<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new(mk.as_bytes().into());
    cipher
        .decrypt(Nonce::from_slice(nonce), Payload { msg: ct, aad: ad })
        .map_err(|_| RatchetError::DecryptionFailed("authentication tag mismatch".into()))
}
