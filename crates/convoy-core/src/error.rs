//! Error types for convoy-core operations

use thiserror::Error;

/// Errors that can occur while handling key material, identifiers, or
/// canonical serialization.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("Invalid private key: {0}")]
    InvalidPrivateKey(String),

    #[error("Invalid hex encoding: {0}")]
    InvalidHex(String),

    #[error("Invalid agent identifier: {0}")]
    InvalidAid(String),

    #[error("Canonicalization failed: {0}")]
    Canonical(String),

    #[error("JSON error: {0}")]
    Json(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Json(e.to_string())
    }
}

/// Result type for convoy-core operations
pub type Result<T> = std::result::Result<T, Error>;
