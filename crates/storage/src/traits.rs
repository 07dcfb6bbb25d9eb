//! Storage trait definitions.

use crate::error::StorageResult;
use async_trait::async_trait;
use pigment_core::BlobHash;
use std::path::{Path, PathBuf};
use tempfile::TempPath;
use time::OffsetDateTime;

/// A source blob available on the local filesystem.
#[derive(Debug)]
pub enum LocalBlob {
    /// The store's own file; must not be modified or removed.
    Stored(PathBuf),
    /// A downloaded copy, removed when dropped.
    Temporary(TempPath),
}

impl LocalBlob {
    pub fn path(&self) -> &Path {
        match self {
            Self::Stored(path) => path,
            Self::Temporary(path) => path,
        }
    }

    pub fn is_temporary(&self) -> bool {
        matches!(self, Self::Temporary(_))
    }
}

/// Read access to original blobs, addressed by hash.
#[async_trait]
pub trait SourceStore: Send + Sync + 'static {
    /// Whether blobs are served straight from local disk.
    fn is_local(&self) -> bool;

    /// Make the blob available as a local file.
    async fn fetch_to_local(&self, hash: &BlobHash) -> StorageResult<LocalBlob>;

    /// Last modification time of the blob.
    async fn last_modified(&self, hash: &BlobHash) -> StorageResult<OffsetDateTime>;

    /// Mime type recorded for the blob, if the store knows it.
    async fn mime_type(&self, hash: &BlobHash) -> StorageResult<Option<String>>;
}
