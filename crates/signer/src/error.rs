//! Signer error types.

use thiserror::Error;

/// Signing configuration errors.
#[derive(Debug, Error)]
pub enum SignerError {
    #[error("empty signing key")]
    EmptyKey,

    #[error("no attribute sets configured")]
    NoAttributeSets,

    #[error("unknown optional operation: {0}")]
    UnknownOperation(String),
}

/// Result type for signing operations.
pub type SignerResult<T> = std::result::Result<T, SignerError>;
