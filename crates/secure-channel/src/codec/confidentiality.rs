//! Confidentiality providers.
//!
//! The codec treats confidentiality as an injected, synchronous and
//! side-effect-free transform. Ciphertext must be ASCII so that an
//! uncompressed envelope fits in a text frame.

use shared_crypto::{open_armored, seal_armored, CryptoError, SecretKey};

/// Symmetric encrypt/decrypt pair applied to serialized envelopes.
pub trait ConfidentialityProvider: Send + Sync + 'static {
    /// Protect `plaintext`
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError>;

    /// Remove protection from `ciphertext`
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError>;
}

/// XChaCha20-Poly1305 with a pre-shared key, base64 armored.
pub struct XChaChaProvider {
    key: SecretKey,
}

impl XChaChaProvider {
    /// Provider using `key`
    pub fn new(key: SecretKey) -> Self {
        Self { key }
    }

    /// Provider keyed by SHA-256 of `passphrase`
    pub fn from_passphrase(passphrase: &str) -> Result<Self, CryptoError> {
        SecretKey::from_passphrase(passphrase).map(Self::new)
    }
}

impl ConfidentialityProvider for XChaChaProvider {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        seal_armored(&self.key, plaintext).map(String::into_bytes)
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        open_armored(&self.key, ciphertext)
    }
}
