//! Source blob stores for pigment.
//!
//! This crate provides:
//! - The [`SourceStore`] trait the request pipeline reads originals through
//! - A local filesystem store with optional hash partitioning
//! - An HTTP object store with a bounded fetch time
//! - Magic-byte mime sniffing

pub mod backends;
pub mod error;
pub mod sniff;
pub mod traits;

pub use backends::{filesystem::FilesystemStore, http::HttpStore};
pub use error::{StorageError, StorageResult};
pub use traits::{LocalBlob, SourceStore};

use pigment_core::config::StorageConfig;
use std::sync::Arc;
use std::time::Duration;

/// Create a source store from configuration.
pub async fn from_config(config: &StorageConfig) -> StorageResult<Arc<dyn SourceStore>> {
    config.validate().map_err(StorageError::Config)?;

    match config {
        StorageConfig::Filesystem {
            path,
            partition,
            partition_depth,
        } => {
            let depth = partition.then_some(*partition_depth);
            Ok(Arc::new(FilesystemStore::new(path, depth).await?))
        }
        StorageConfig::Http {
            base_url,
            timeout_secs,
        } => Ok(Arc::new(HttpStore::new(
            base_url,
            Duration::from_secs(*timeout_secs),
        )?)),
    }
}
