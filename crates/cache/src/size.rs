//! Cache budget resolution.

use crate::error::{CacheError, CacheResult};
use pigment_core::config::CacheSize;
use std::path::Path;

/// Resolve the configured budget to a byte count. Percentages are taken of
/// the device hosting `root`, which must already exist.
pub fn resolve_max_size(size: CacheSize, root: &Path) -> CacheResult<u64> {
    match size {
        CacheSize::Bytes(0) => Err(CacheError::Config(
            "cache size must be positive".to_string(),
        )),
        CacheSize::Bytes(bytes) => Ok(bytes),
        CacheSize::Percent(p) if p == 0 || p > 100 => Err(CacheError::Config(format!(
            "cache size percentage must be 1-100, got {p}"
        ))),
        CacheSize::Percent(p) => {
            let total = fs2::total_space(root)?;
            Ok(total / 100 * u64::from(p))
        }
    }
}
