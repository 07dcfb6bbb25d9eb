//! Request signing for pigment image URLs.
//!
//! This crate provides:
//! - HMAC-SHA1 signatures over selected request attributes
//! - Verification with optional (removable) operations
//! - A URL builder that encodes and signs transformations

pub mod error;
pub mod key;
pub mod signer;
pub mod url;

pub use error::{SignerError, SignerResult};
pub use key::HmacKey;
pub use signer::{HmacSigner, RequestData};
pub use url::{ImageRequest, UrlBuilder};
