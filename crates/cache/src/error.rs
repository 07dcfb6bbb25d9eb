//! Cache error types.

use thiserror::Error;

/// Cache operation errors.
///
/// None of these are fatal to a request: the pipeline logs them and carries
/// on without the cache.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The index stayed locked for longer than the configured busy timeout.
    #[error("cache index is busy")]
    Busy,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Database(sqlx::Error),

    #[error("configuration error: {0}")]
    Config(String),

    /// A transformation key or mime that does not map to a single path component.
    #[error("invalid cache key: {0}")]
    InvalidKey(String),
}

impl From<sqlx::Error> for CacheError {
    fn from(err: sqlx::Error) -> Self {
        if is_busy(&err) {
            Self::Busy
        } else {
            Self::Database(err)
        }
    }
}

impl From<tokio::task::JoinError> for CacheError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Io(std::io::Error::other(err))
    }
}

/// Result type for cache operations.
pub type CacheResult<T> = std::result::Result<T, CacheError>;

/// SQLITE_BUSY and SQLITE_LOCKED, including their extended codes.
fn is_busy(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::PoolTimedOut => true,
        sqlx::Error::Database(db_err) => {
            let primary = db_err
                .code()
                .and_then(|code| code.parse::<i32>().ok())
                .map(|code| code & 0xff);
            matches!(primary, Some(5 | 6)) || db_err.message().contains("database is locked")
        }
        _ => false,
    }
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}
