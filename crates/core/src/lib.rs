//! Core types for the pigment image proxy.
//!
//! This crate defines the pieces shared by clients and the server:
//! - Geometry strings (`200x100+10-5se`)
//! - Operations and the canonical transform string codec
//! - Output image formats
//! - Blob hashes and HTTP dates
//! - Configuration

pub mod config;
pub mod error;
pub mod format;
pub mod geometry;
pub mod hash;
pub mod http_date;
pub mod token;
pub mod transform;

pub use error::{Error, Result};
pub use format::ImageFormat;
pub use geometry::{Geometry, Gravity, Modifier};
pub use hash::BlobHash;
pub use token::{Token, tokenize};
pub use transform::{
    Operation, OutputOptions, Padding, Transformations, Watermark, WatermarkPosition,
};
