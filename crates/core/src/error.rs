//! Error types for the transformation grammar.

use thiserror::Error;

/// Core error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid geometry \"{0}\"")]
    InvalidGeometry(String),

    #[error("Invalid padding \"{0}\"")]
    InvalidPadding(String),

    #[error("Invalid watermark \"{0}\"")]
    InvalidWatermark(String),

    #[error("Invalid {name} \"{value}\"")]
    InvalidValue { name: &'static str, value: String },

    #[error("invalid hash: {0}")]
    InvalidHash(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether the error reflects a malformed client-supplied transformation.
    pub fn is_invalid_transformation(&self) -> bool {
        matches!(
            self,
            Self::InvalidGeometry(_)
                | Self::InvalidPadding(_)
                | Self::InvalidWatermark(_)
                | Self::InvalidValue { .. }
        )
    }
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
