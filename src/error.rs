//! Error types for the chat service
//!
//! One enum per layer: envelope crypto, frame codec, application.
//! Uses thiserror for ergonomic error definitions.

use thiserror::Error;

/// Envelope verification and decryption failures
///
/// Produced only by [`crate::crypto::CryptoContext::open`]; sealing cannot
/// fail. Every variant is connection-fatal: the stream cannot be trusted or
/// resynchronized after any of these.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    /// Envelope shorter than the fixed seq + IV + tag overhead
    #[error("envelope too short: {0} bytes")]
    TooShort(usize),

    /// Envelope carries no ciphertext at all
    #[error("envelope has empty ciphertext")]
    EmptyCiphertext,

    /// Authentication tag mismatch (tampering or wrong shared secret)
    #[error("authentication tag mismatch")]
    BadTag,

    /// Sequence number below the replay window (replay or stale reorder)
    #[error("stale sequence number {received}, expected at least {expected}")]
    StaleSequence { received: u64, expected: u64 },

    /// Ciphertext failed CBC block or PKCS#7 padding rules
    #[error("invalid ciphertext padding")]
    Padding,
}

/// Frame codec failures
#[derive(Debug, Error)]
pub enum FrameError {
    /// Header version byte is not the supported protocol version
    #[error("unsupported protocol version {0}")]
    BadVersion(u8),

    /// Encrypted payload exceeds the per-frame limit
    #[error("encrypted payload too large: {0} bytes")]
    PayloadTooLarge(usize),

    /// The envelope inside the frame failed verification
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// Application-level errors for connection drivers and the client
#[derive(Debug, Error)]
pub enum AppError {
    /// IO error (fatal for the affected connection)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Wire protocol violation
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// Channel send error (fatal - internal channel broken)
    #[error("channel send error")]
    ChannelSend,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_error_from_crypto() {
        let err: FrameError = CryptoError::BadTag.into();
        assert!(matches!(err, FrameError::Crypto(CryptoError::BadTag)));
    }

    #[test]
    fn test_app_error_from_frame() {
        let err: AppError = FrameError::BadVersion(9).into();
        assert_eq!(err.to_string(), "frame error: unsupported protocol version 9");
    }
}
