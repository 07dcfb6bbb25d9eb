//! Index rows.

use sqlx::FromRow;
use time::OffsetDateTime;

/// One cached rendition of a blob.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct CacheEntry {
    pub hash: String,
    pub transform_key: String,
    pub mime: String,
    pub size_bytes: i64,
    /// Whether the source image had an alpha channel.
    pub transparent: bool,
    /// Unix milliseconds.
    pub created_at: i64,
    /// Unix milliseconds.
    pub last_used_at: i64,
}

impl CacheEntry {
    pub fn created(&self) -> OffsetDateTime {
        from_millis(self.created_at)
    }

    pub fn last_used(&self) -> OffsetDateTime {
        from_millis(self.last_used_at)
    }
}

pub(crate) fn to_millis(at: OffsetDateTime) -> i64 {
    (at.unix_timestamp_nanos() / 1_000_000) as i64
}

fn from_millis(ms: i64) -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000)
        .unwrap_or(OffsetDateTime::UNIX_EPOCH)
}
