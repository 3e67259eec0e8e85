//! Crypto error types.

use thiserror::Error;

/// Cryptographic operation errors.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Encryption failed
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    /// Decryption failed (wrong key, tampered data)
    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    /// Armored ciphertext could not be decoded
    #[error("Malformed ciphertext armor: {0}")]
    MalformedArmor(String),

    /// Invalid input for cryptographic operation
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
