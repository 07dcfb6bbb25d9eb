//! Disk cache for transformed images.
//!
//! Entries are keyed by `(hash, transform key, mime)`. An SQLite index tracks
//! entry sizes and recency so the cache can stay within a byte budget by
//! evicting the least recently used entries first.

pub mod error;
pub mod layout;
pub mod models;
pub mod size;
pub mod store;

pub use error::{CacheError, CacheResult};
pub use models::CacheEntry;
pub use store::{CacheStore, SetOutcome};

use pigment_core::config::CacheConfig;
use std::sync::Arc;

/// Open the cache described by `config`, if any.
pub async fn from_config(config: Option<&CacheConfig>) -> CacheResult<Option<Arc<CacheStore>>> {
    match config {
        Some(config) => Ok(Some(Arc::new(CacheStore::open(config).await?))),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_from_config_creates_index() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config = CacheConfig::new(temp_dir.path().join("cache"));

        let cache = from_config(Some(&config)).await.unwrap().unwrap();
        assert!(config.index_path().exists());
        assert_eq!(cache.total_size().await.unwrap(), 0);
        assert_eq!(cache.max_size(), 1_073_741_824);

        assert!(from_config(None).await.unwrap().is_none());
    }
}
