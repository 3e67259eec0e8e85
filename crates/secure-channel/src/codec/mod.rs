//! Envelope wire codec.
//!
//! ```text
//! encode: Envelope ─json─▶ bytes ─encrypt─▶ armored ─(compress? deflate)─▶ frame
//! decode: frame ─(binary? inflate)─▶ armored ─decrypt─▶ bytes ─json─▶ Envelope
//! ```
//!
//! Compression is applied to the already confidential bytes. Uncompressed
//! output travels as a text frame, compressed output as a binary frame, and a
//! binary frame that does not inflate is rejected outright.

pub mod confidentiality;

pub use confidentiality::{ConfidentialityProvider, XChaChaProvider};

use crate::domain::envelope::codes;
use crate::domain::Envelope;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use shared_crypto::CryptoError;
use std::io::{Read, Write};
use std::sync::Arc;

/// Encoded envelope, tagged with the frame kind it must travel in
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireFrame {
    /// Armored ciphertext
    Text(String),
    /// zlib-deflated armored ciphertext
    Binary(Vec<u8>),
}

impl WireFrame {
    /// Whether this is a binary frame
    pub fn is_binary(&self) -> bool {
        matches!(self, Self::Binary(_))
    }

    /// Raw frame bytes
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Binary(bytes) => bytes,
        }
    }
}

/// Outbound encoding failures
#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    /// Envelope could not be serialized
    #[error("serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
    /// Confidentiality provider failed
    #[error("encryption failed: {0}")]
    Encryption(#[source] CryptoError),
    /// Provider produced bytes that cannot travel in a text frame
    #[error("ciphertext is not valid UTF-8")]
    NonTextCiphertext,
    /// zlib stream could not be written
    #[error("compression failed: {0}")]
    Compression(#[from] std::io::Error),
}

/// Inbound decoding failures, one per pipeline stage
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// Binary frame did not inflate, or inflated past the size bound
    #[error("decompression failed: {0}")]
    Decompression(String),
    /// Confidentiality could not be removed
    #[error("decryption failed: {0}")]
    Decryption(#[from] CryptoError),
    /// Plaintext is not a valid envelope
    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl DecodeError {
    /// Error code reported to the peer
    pub fn code(&self) -> &'static str {
        match self {
            Self::Decompression(_) => codes::DECOMPRESSION_FAILED,
            Self::Decryption(_) => codes::DECRYPTION_FAILED,
            Self::Malformed(_) => codes::MALFORMED_ENVELOPE,
        }
    }

    /// Human readable summary reported to the peer
    pub fn summary(&self) -> &'static str {
        match self {
            Self::Decompression(_) => "Failed to decompress message",
            Self::Decryption(_) => "Failed to decrypt message",
            Self::Malformed(_) => "Failed to parse message",
        }
    }
}

/// Envelope codec bound to one confidentiality provider.
#[derive(Clone)]
pub struct FrameCodec {
    provider: Arc<dyn ConfidentialityProvider>,
    max_inflated_bytes: usize,
}

impl FrameCodec {
    /// Codec over `provider` with an inflate bound of `max_inflated_bytes`
    pub fn new(provider: Arc<dyn ConfidentialityProvider>, max_inflated_bytes: usize) -> Self {
        Self {
            provider,
            max_inflated_bytes,
        }
    }

    /// Same provider, different inflate bound
    pub fn with_inflate_limit(&self, max_inflated_bytes: usize) -> Self {
        Self {
            provider: Arc::clone(&self.provider),
            max_inflated_bytes,
        }
    }

    /// Encode `envelope`; `compress` selects a binary frame.
    pub fn encode(&self, envelope: &Envelope, compress: bool) -> Result<WireFrame, EncodeError> {
        let json = serde_json::to_vec(envelope)?;
        let sealed = self
            .provider
            .encrypt(&json)
            .map_err(EncodeError::Encryption)?;

        if compress {
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&sealed)?;
            Ok(WireFrame::Binary(encoder.finish()?))
        } else {
            String::from_utf8(sealed)
                .map(WireFrame::Text)
                .map_err(|_| EncodeError::NonTextCiphertext)
        }
    }

    /// Decode frame bytes. `was_binary` selects the inflate stage.
    pub fn decode(&self, bytes: &[u8], was_binary: bool) -> Result<Envelope, DecodeError> {
        let sealed = if was_binary {
            self.inflate(bytes)?
        } else {
            bytes.to_vec()
        };

        let plaintext = self.provider.decrypt(&sealed)?;
        Ok(serde_json::from_slice(&plaintext)?)
    }

    /// Decode a [`WireFrame`]
    pub fn decode_frame(&self, frame: &WireFrame) -> Result<Envelope, DecodeError> {
        self.decode(frame.as_bytes(), frame.is_binary())
    }

    fn inflate(&self, bytes: &[u8]) -> Result<Vec<u8>, DecodeError> {
        let limit = self.max_inflated_bytes;
        let mut inflated = Vec::new();
        ZlibDecoder::new(bytes)
            .take((limit as u64).saturating_add(1))
            .read_to_end(&mut inflated)
            .map_err(|e| DecodeError::Decompression(e.to_string()))?;

        if inflated.len() > limit {
            return Err(DecodeError::Decompression(format!(
                "inflated size exceeds {limit} bytes"
            )));
        }
        Ok(inflated)
    }
}

impl std::fmt::Debug for FrameCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameCodec")
            .field("max_inflated_bytes", &self.max_inflated_bytes)
            .finish_non_exhaustive()
    }
}
