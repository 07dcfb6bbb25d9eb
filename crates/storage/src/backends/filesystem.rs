//! Local filesystem source store.

use crate::error::{StorageError, StorageResult};
use crate::sniff::{SNIFF_LEN, sniff};
use crate::traits::{LocalBlob, SourceStore};
use async_trait::async_trait;
use pigment_core::BlobHash;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use tokio::fs;
use tokio::io::AsyncReadExt;
use tracing::instrument;

/// Blobs stored as plain files under a root directory.
///
/// With partitioning on, a hash is split into four-character groups; the
/// first `depth` groups become directories and the remaining characters the
/// file name (`912e/c803/b2ce/49e4a541...`).
#[derive(Debug, Clone)]
pub struct FilesystemStore {
    root: PathBuf,
    partition_depth: Option<usize>,
}

impl FilesystemStore {
    /// Create a store rooted at `root`, creating the directory if needed.
    pub async fn new(root: impl AsRef<Path>, partition_depth: Option<usize>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self {
            root,
            partition_depth,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Relative location of a blob.
    pub fn relative_path(&self, hash: &BlobHash) -> String {
        let Some(depth) = self.partition_depth else {
            return hash.to_string();
        };
        let groups: Vec<&str> = hash.groups().collect();
        // Keep at least one group for the file name.
        let split = depth.min(groups.len().saturating_sub(1));
        let mut parts: Vec<&str> = groups[..split].to_vec();
        let name = groups[split..].concat();
        parts.push(&name);
        parts.join("/")
    }

    /// Resolve the absolute path, refusing paths that escape the root
    /// through symlinks.
    async fn blob_path(&self, hash: &BlobHash) -> StorageResult<PathBuf> {
        let root = self.root.clone();
        let path = self.root.join(self.relative_path(hash));
        let key = hash.to_string();
        tokio::task::spawn_blocking(move || Self::check_within_root(&root, path, &key))
            .await
            .map_err(|e| {
                StorageError::Io(std::io::Error::other(format!("spawn_blocking failed: {e}")))
            })?
    }

    fn check_within_root(root: &Path, path: PathBuf, key: &str) -> StorageResult<PathBuf> {
        let root_canonical = root.canonicalize()?;
        match path.canonicalize() {
            Ok(canonical) if canonical.starts_with(&root_canonical) => Ok(path),
            Ok(_) => Err(StorageError::InvalidKey(format!(
                "resolved path escapes storage root: {key}"
            ))),
            Err(e) => Err(StorageError::from_io(key, e)),
        }
    }
}

#[async_trait]
impl SourceStore for FilesystemStore {
    fn is_local(&self) -> bool {
        true
    }

    #[instrument(skip(self), fields(store = "filesystem"))]
    async fn fetch_to_local(&self, hash: &BlobHash) -> StorageResult<LocalBlob> {
        let path = self.blob_path(hash).await?;
        let metadata = fs::metadata(&path)
            .await
            .map_err(|e| StorageError::from_io(hash.as_str(), e))?;
        if !metadata.is_file() {
            return Err(StorageError::NotFound(hash.to_string()));
        }
        Ok(LocalBlob::Stored(path))
    }

    #[instrument(skip(self), fields(store = "filesystem"))]
    async fn last_modified(&self, hash: &BlobHash) -> StorageResult<OffsetDateTime> {
        let path = self.blob_path(hash).await?;
        let metadata = fs::metadata(&path)
            .await
            .map_err(|e| StorageError::from_io(hash.as_str(), e))?;
        Ok(metadata.modified()?.into())
    }

    #[instrument(skip(self), fields(store = "filesystem"))]
    async fn mime_type(&self, hash: &BlobHash) -> StorageResult<Option<String>> {
        let path = self.blob_path(hash).await?;
        let mut file = fs::File::open(&path)
            .await
            .map_err(|e| StorageError::from_io(hash.as_str(), e))?;
        let mut head = Vec::with_capacity(SNIFF_LEN);
        (&mut file).take(SNIFF_LEN as u64).read_to_end(&mut head).await?;
        Ok(sniff(&head).map(str::to_string))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn hash(s: &str) -> BlobHash {
        BlobHash::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_relative_path_partitioning() {
        let temp = TempDir::new().unwrap();
        let flat = FilesystemStore::new(temp.path(), None).await.unwrap();
        let h = hash("912ec803b2ce49e4a541068d495ab570");
        assert_eq!(flat.relative_path(&h), "912ec803b2ce49e4a541068d495ab570");

        let nested = FilesystemStore::new(temp.path(), Some(3)).await.unwrap();
        assert_eq!(
            nested.relative_path(&h),
            "912e/c803/b2ce/49e4a541068d495ab570"
        );
        assert_eq!(nested.relative_path(&hash("abc")), "abc");
    }

    #[tokio::test]
    async fn test_fetch_and_sniff() {
        let temp = TempDir::new().unwrap();
        let store = FilesystemStore::new(temp.path(), None).await.unwrap();
        std::fs::write(temp.path().join("opaque"), b"\xff\xd8\xff\xe0rest").unwrap();

        let blob = store.fetch_to_local(&hash("opaque")).await.unwrap();
        assert!(!blob.is_temporary());
        assert_eq!(blob.path(), temp.path().join("opaque"));
        assert_eq!(
            store.mime_type(&hash("opaque")).await.unwrap().as_deref(),
            Some("image/jpeg")
        );
        assert!(store.last_modified(&hash("opaque")).await.is_ok());
    }

    #[tokio::test]
    async fn test_missing_blob_is_not_found() {
        let temp = TempDir::new().unwrap();
        let store = FilesystemStore::new(temp.path(), Some(2)).await.unwrap();
        let err = store.fetch_to_local(&hash("missing")).await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
        let err = store.last_modified(&hash("missing")).await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_escape_rejected() {
        let temp = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        std::fs::write(outside.path().join("secret"), b"data").unwrap();
        let root = temp.path().join("root");
        let store = FilesystemStore::new(&root, None).await.unwrap();
        std::os::unix::fs::symlink(outside.path().join("secret"), root.join("leak")).unwrap();

        let err = store.fetch_to_local(&hash("leak")).await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidKey(_)));
    }
}
