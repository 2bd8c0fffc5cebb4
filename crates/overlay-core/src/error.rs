//! Error types for overlay-core

use thiserror::Error;

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, Error>;

/// overlay-core error types
#[derive(Debug, Error)]
pub enum Error {
    /// Canonical JSON encoding failed
    #[error("canonical encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    /// A key did not decode to the expected fixed-size representation
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    /// A signature did not decode to the expected fixed-size representation
    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    /// Signature verification failed
    #[error("signature verification failed")]
    VerificationFailed,

    /// Operation is not supported by this Crypto implementation
    #[error("unsupported crypto operation: {0}")]
    Unsupported(&'static str),
}
