//! # Symmetric Encryption
//!
//! XChaCha20-Poly1305 authenticated encryption plus an ASCII armor so that
//! ciphertext can travel inside text frames.
//!
//! ## Armor Layout
//!
//! ```text
//! base64( nonce[24] ‖ ciphertext ‖ tag[16] )
//! ```
//!
//! The armored form is always valid UTF-8, which lets the channel send an
//! uncompressed encrypted envelope as a text frame and a compressed one as the
//! deflate of those same armored bytes.

use crate::CryptoError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use sha2::{Digest, Sha256};
use std::fmt;
use zeroize::Zeroize;

/// Key length in bytes.
pub const KEY_LEN: usize = 32;

/// Nonce length in bytes (XChaCha20).
pub const NONCE_LEN: usize = 24;

/// Poly1305 tag length in bytes.
pub const TAG_LEN: usize = 16;

/// Secret key (256-bit).
#[derive(Clone, Zeroize)]
#[zeroize(drop)]
pub struct SecretKey([u8; KEY_LEN]);

impl SecretKey {
    /// Derive a key from a pre-shared passphrase (SHA-256).
    pub fn from_passphrase(passphrase: &str) -> Result<Self, CryptoError> {
        if passphrase.is_empty() {
            return Err(CryptoError::InvalidInput("empty passphrase".into()));
        }
        let digest: [u8; KEY_LEN] = Sha256::digest(passphrase.as_bytes()).into();
        Ok(Self(digest))
    }

    /// Generate random key.
    #[cfg(test)]
    fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut bytes);
        Self(bytes)
    }

    /// Get inner bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey(<redacted>)")
    }
}

/// Nonce for encryption.
#[derive(Clone)]
pub struct Nonce([u8; NONCE_LEN]);

impl Nonce {
    /// Create from bytes.
    pub fn from_bytes(bytes: [u8; NONCE_LEN]) -> Self {
        Self(bytes)
    }

    /// Generate random nonce (safe with XChaCha20's 192-bit nonce).
    pub fn generate() -> Self {
        let mut bytes = [0u8; NONCE_LEN];
        rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut bytes);
        Self(bytes)
    }

    /// Get inner bytes.
    pub fn as_bytes(&self) -> &[u8; NONCE_LEN] {
        &self.0
    }
}

/// Encrypt plaintext with XChaCha20-Poly1305.
///
/// Returns (ciphertext, nonce).
///
/// # Errors
///
/// Returns `CryptoError::EncryptionFailed` if encryption fails.
pub fn encrypt(key: &SecretKey, plaintext: &[u8]) -> Result<(Vec<u8>, Nonce), CryptoError> {
    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());
    let nonce = Nonce::generate();

    let ciphertext = cipher
        .encrypt(XNonce::from_slice(nonce.as_bytes()), plaintext)
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    Ok((ciphertext, nonce))
}

/// Decrypt ciphertext with XChaCha20-Poly1305.
///
/// # Errors
///
/// Returns `CryptoError::DecryptionFailed` if decryption fails.
pub fn decrypt(key: &SecretKey, ciphertext: &[u8], nonce: &Nonce) -> Result<Vec<u8>, CryptoError> {
    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());

    cipher
        .decrypt(XNonce::from_slice(nonce.as_bytes()), ciphertext)
        .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))
}

/// Encrypt and armor: `base64(nonce ‖ ciphertext)`.
pub fn seal_armored(key: &SecretKey, plaintext: &[u8]) -> Result<String, CryptoError> {
    let (ciphertext, nonce) = encrypt(key, plaintext)?;

    let mut raw = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    raw.extend_from_slice(nonce.as_bytes());
    raw.extend_from_slice(&ciphertext);

    Ok(STANDARD.encode(raw))
}

/// Remove the armor produced by [`seal_armored`] and decrypt.
///
/// # Errors
///
/// - `CryptoError::MalformedArmor` if the input is not base64 or too short
/// - `CryptoError::DecryptionFailed` if authentication fails
pub fn open_armored(key: &SecretKey, armored: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let raw = STANDARD
        .decode(armored)
        .map_err(|e| CryptoError::MalformedArmor(e.to_string()))?;

    if raw.len() < NONCE_LEN + TAG_LEN {
        return Err(CryptoError::MalformedArmor(format!(
            "armored payload is {} bytes, need at least {}",
            raw.len(),
            NONCE_LEN + TAG_LEN
        )));
    }

    let (nonce_bytes, ciphertext) = raw.split_at(NONCE_LEN);
    let mut nonce = [0u8; NONCE_LEN];
    nonce.copy_from_slice(nonce_bytes);

    decrypt(key, ciphertext, &Nonce::from_bytes(nonce))
}
