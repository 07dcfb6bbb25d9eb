//! Image backends.
//!
//! A [`Backend`] inspects source images and renders operation lists into
//! output files. Calls are blocking; the pipeline runs them on the blocking
//! thread pool.

pub mod imagemagick;

pub use imagemagick::ImageMagickBackend;

use pigment_core::{ImageFormat, Operation, OutputOptions};
use std::path::{Path, PathBuf};
use tempfile::TempPath;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{program} failed ({status}): {stderr}")]
    Command {
        program: &'static str,
        status: String,
        stderr: String,
    },

    #[error("unexpected output from {program}: {output}")]
    UnexpectedOutput {
        program: &'static str,
        output: String,
    },

    /// The operation list cannot be applied to this image.
    #[error("{0}")]
    InvalidTransformation(String),
}

pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Result of inspecting an image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub mime: String,
    pub opaque: bool,
    /// EXIF orientation, when recorded.
    pub orientation: Option<u8>,
    pub width: u32,
    pub height: u32,
}

impl Identity {
    pub fn transparent(&self) -> bool {
        !self.opaque
    }

    /// Whether the pixels are stored upright.
    pub fn upright(&self) -> bool {
        matches!(self.orientation, None | Some(1))
    }
}

/// An identified image on local disk.
#[derive(Debug, Clone)]
pub struct SourceImage {
    pub path: PathBuf,
    pub identity: Identity,
}

/// Target encoding of a render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderOptions {
    pub format: &'static ImageFormat,
    pub output: OutputOptions,
}

/// A watermark image, identified once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatermarkImage {
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
}

/// Image inspection and rendering.
pub trait Backend: Send + Sync + 'static {
    fn identify(&self, path: &Path) -> BackendResult<Identity>;

    /// Render `operations` (rendering operations only, in order) from
    /// `source` into a new temporary file.
    fn transform(
        &self,
        source: &SourceImage,
        operations: &[Operation],
        options: &RenderOptions,
    ) -> BackendResult<TempPath>;

    /// Whether the backend can write `mime`.
    fn supports(&self, mime: &str) -> bool;
}
