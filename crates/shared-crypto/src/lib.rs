//! # Shared Crypto - Channel Confidentiality Primitives
//!
//! ## Components
//!
//! | Module | Algorithm | Use Case |
//! |--------|-----------|----------|
//! | `symmetric` | XChaCha20-Poly1305 | Envelope encryption |
//! | `symmetric` (armor) | Base64 over `nonce ‖ ciphertext` | Text-frame safe ciphertext |
//!
//! ## Security Properties
//!
//! - **XChaCha20**: 192-bit random nonce per message, constant-time ARX design
//! - **Poly1305**: authenticated, so tampering surfaces as a decryption failure
//! - **Key derivation**: SHA-256 of a shared passphrase (pre-shared secret model)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod errors;
pub mod symmetric;

// Re-exports
pub use errors::CryptoError;
pub use symmetric::{decrypt, encrypt, open_armored, seal_armored, Nonce, SecretKey};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    #[test]
    fn test_version() {
        assert!(!super::VERSION.is_empty());
    }
}
