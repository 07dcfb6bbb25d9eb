//! SQLite-indexed cache store.

use crate::error::{CacheError, CacheResult, is_unique_violation};
use crate::layout;
use crate::models::{CacheEntry, to_millis};
use crate::size::resolve_max_size;
use pigment_core::BlobHash;
use pigment_core::config::CacheConfig;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use time::OffsetDateTime;
use tracing::{debug, instrument, warn};

const ENTRY_COLUMNS: &str =
    "hash, transform_key, mime, size_bytes, transparent, created_at, last_used_at";

/// Result of a [`CacheStore::set`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetOutcome {
    /// False when the entry already existed or could never fit.
    pub stored: bool,
    /// Entries removed to make room.
    pub evicted: u64,
}

/// Size-bounded LRU cache of transformed images.
///
/// Files live under `root` at [`layout::destination`]; the SQLite index is
/// authoritative for what exists and how large the cache is.
pub struct CacheStore {
    root: PathBuf,
    max_size: u64,
    pool: SqlitePool,
}

impl CacheStore {
    /// Open (creating if needed) the cache described by `config`.
    pub async fn open(config: &CacheConfig) -> CacheResult<Self> {
        config.validate().map_err(CacheError::Config)?;
        tokio::fs::create_dir_all(&config.path).await?;
        let root = tokio::fs::canonicalize(&config.path).await?;
        let max_size = resolve_max_size(config.size, &root)?;

        let index = config.index_path();
        if let Some(parent) = index.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let busy_timeout = Duration::from_millis(config.busy_timeout_ms);
        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", index.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(busy_timeout);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .acquire_timeout(busy_timeout.max(Duration::from_secs(1)))
            .connect_with(opts)
            .await?;

        let store = Self {
            root,
            max_size,
            pool,
        };
        store.migrate().await?;
        debug!(root = %store.root.display(), max_size, "opened cache");
        Ok(store)
    }

    async fn migrate(&self) -> CacheResult<()> {
        sqlx::raw_sql(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn max_size(&self) -> u64 {
        self.max_size
    }

    /// Running total of cached bytes.
    pub async fn total_size(&self) -> CacheResult<u64> {
        let total: i64 =
            sqlx::query_scalar("SELECT value FROM cache_stats WHERE name = 'total_size'")
                .fetch_optional(&self.pool)
                .await?
                .unwrap_or(0);
        Ok(total.max(0) as u64)
    }

    /// Every mime variant cached for `(hash, key)`.
    pub async fn get(&self, hash: &BlobHash, key: &str) -> CacheResult<Vec<CacheEntry>> {
        let entries = sqlx::query_as::<_, CacheEntry>(&format!(
            "SELECT {ENTRY_COLUMNS} FROM transformations \
             WHERE hash = ? AND transform_key = ? ORDER BY rowid"
        ))
        .bind(hash.as_str())
        .bind(key)
        .fetch_all(&self.pool)
        .await?;
        Ok(entries)
    }

    /// Mark an entry as used and return its file.
    ///
    /// A row whose file has disappeared is treated as a miss, and every row
    /// of that hash is dropped so the index matches the disk again.
    #[instrument(skip(self, hash, now), fields(hash = %hash))]
    pub async fn use_entry(
        &self,
        hash: &BlobHash,
        key: &str,
        mime: &str,
        now: OffsetDateTime,
    ) -> CacheResult<Option<PathBuf>> {
        let updated = sqlx::query(
            "UPDATE transformations SET last_used_at = ? \
             WHERE hash = ? AND transform_key = ? AND mime = ?",
        )
        .bind(to_millis(now))
        .bind(hash.as_str())
        .bind(key)
        .bind(mime)
        .execute(&self.pool)
        .await?
        .rows_affected();
        if updated == 0 {
            return Ok(None);
        }

        let path = layout::destination(&self.root, hash, key, mime)?;
        if !tokio::fs::try_exists(&path).await? {
            warn!(path = %path.display(), "cached file missing, dropping index rows");
            self.delete(hash).await?;
            return Ok(None);
        }
        Ok(Some(path))
    }

    /// Copy `source` into the cache.
    ///
    /// Room is made before the copy so the budget holds at every point. An
    /// entry that already exists, or that is larger than the whole budget, is
    /// left alone.
    #[instrument(skip(self, hash, source, now), fields(hash = %hash))]
    pub async fn set(
        &self,
        hash: &BlobHash,
        transparent: bool,
        key: &str,
        mime: &str,
        source: &Path,
        now: OffsetDateTime,
    ) -> CacheResult<SetOutcome> {
        let destination = layout::destination(&self.root, hash, key, mime)?;
        let size = tokio::fs::metadata(source).await?.len();
        if size > self.max_size {
            debug!(size, max_size = self.max_size, "entry larger than cache, skipping");
            return Ok(SetOutcome::default());
        }
        if self.contains(hash, key, mime).await? {
            return Ok(SetOutcome::default());
        }

        let evicted = self.purge(size).await?;

        let dir = destination
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());
        tokio::fs::create_dir_all(&dir).await?;
        let source = source.to_path_buf();
        let staged = tokio::task::spawn_blocking(move || {
            let staged = tempfile::NamedTempFile::new_in(&dir)?;
            std::fs::copy(&source, staged.path())?;
            Ok::<_, std::io::Error>(staged.into_temp_path())
        })
        .await??;

        let millis = to_millis(now);
        let mut tx = self.pool.begin().await?;
        let inserted = sqlx::query(
            "INSERT INTO transformations \
             (hash, transform_key, mime, size_bytes, transparent, created_at, last_used_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(hash.as_str())
        .bind(key)
        .bind(mime)
        .bind(size as i64)
        .bind(transparent)
        .bind(millis)
        .bind(millis)
        .execute(&mut *tx)
        .await;
        match inserted {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => {
                debug!("entry inserted concurrently, discarding copy");
                return Ok(SetOutcome {
                    stored: false,
                    evicted,
                });
            }
            Err(e) => return Err(e.into()),
        }
        sqlx::query("UPDATE cache_stats SET value = value + ? WHERE name = 'total_size'")
            .bind(size as i64)
            .execute(&mut *tx)
            .await?;

        staged
            .persist(&destination)
            .map_err(|e| CacheError::Io(e.error))?;
        if let Err(e) = tx.commit().await {
            let _ = tokio::fs::remove_file(&destination).await;
            return Err(e.into());
        }

        Ok(SetOutcome {
            stored: true,
            evicted,
        })
    }

    /// Evict least recently used entries until `extra` more bytes fit.
    /// Returns the number of entries removed.
    #[instrument(skip(self))]
    pub async fn purge(&self, extra: u64) -> CacheResult<u64> {
        let mut evicted = 0;
        while self.total_size().await?.saturating_add(extra) > self.max_size {
            let mut tx = self.pool.begin().await?;
            let victim = sqlx::query_as::<_, CacheEntry>(&format!(
                "DELETE FROM transformations WHERE rowid = \
                 (SELECT rowid FROM transformations ORDER BY last_used_at, rowid LIMIT 1) \
                 RETURNING {ENTRY_COLUMNS}"
            ))
            .fetch_optional(&mut *tx)
            .await?;
            let Some(victim) = victim else {
                break;
            };
            sqlx::query("UPDATE cache_stats SET value = value - ? WHERE name = 'total_size'")
                .bind(victim.size_bytes)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;

            self.remove_entry_file(&victim).await;
            evicted += 1;
        }
        if evicted > 0 {
            debug!(evicted, "purged cache entries");
        }
        Ok(evicted)
    }

    /// Drop every entry of `hash`. Returns the number of entries removed.
    #[instrument(skip(self, hash), fields(hash = %hash))]
    pub async fn delete(&self, hash: &BlobHash) -> CacheResult<u64> {
        let mut tx = self.pool.begin().await?;
        let removed = sqlx::query_as::<_, CacheEntry>(&format!(
            "DELETE FROM transformations WHERE hash = ? RETURNING {ENTRY_COLUMNS}"
        ))
        .bind(hash.as_str())
        .fetch_all(&mut *tx)
        .await?;
        let bytes: i64 = removed.iter().map(|e| e.size_bytes).sum();
        sqlx::query("UPDATE cache_stats SET value = value - ? WHERE name = 'total_size'")
            .bind(bytes)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        for entry in &removed {
            self.remove_entry_file(entry).await;
        }
        Ok(removed.len() as u64)
    }

    async fn contains(&self, hash: &BlobHash, key: &str, mime: &str) -> CacheResult<bool> {
        let found: Option<i64> = sqlx::query_scalar(
            "SELECT 1 FROM transformations WHERE hash = ? AND transform_key = ? AND mime = ?",
        )
        .bind(hash.as_str())
        .bind(key)
        .bind(mime)
        .fetch_optional(&self.pool)
        .await?;
        Ok(found.is_some())
    }

    async fn remove_entry_file(&self, entry: &CacheEntry) {
        let Ok(hash) = BlobHash::parse(&entry.hash) else {
            warn!(hash = %entry.hash, "index row with invalid hash");
            return;
        };
        let destination =
            layout::destination(&self.root, &hash, &entry.transform_key, &entry.mime);
        let path = match destination {
            Ok(path) => path,
            Err(e) => {
                warn!(error = %e, "index row with unusable key");
                return;
            }
        };
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to remove cached file");
                return;
            }
        }
        self.prune_empty_dirs(&path).await;
    }

    /// Remove now-empty parent directories of `path`, stopping at the root.
    async fn prune_empty_dirs(&self, path: &Path) {
        let mut dir = path.parent();
        while let Some(current) = dir {
            if current == self.root || !current.starts_with(&self.root) {
                break;
            }
            if tokio::fs::remove_dir(current).await.is_err() {
                break;
            }
            dir = current.parent();
        }
    }
}

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS transformations (
    hash TEXT NOT NULL,
    transform_key TEXT NOT NULL,
    mime TEXT NOT NULL,
    size_bytes INTEGER NOT NULL,
    transparent INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    last_used_at INTEGER NOT NULL,
    UNIQUE (hash, transform_key, mime)
);
CREATE INDEX IF NOT EXISTS idx_transformations_last_used ON transformations(last_used_at);

CREATE TABLE IF NOT EXISTS cache_stats (
    name TEXT PRIMARY KEY,
    value INTEGER NOT NULL
);
INSERT OR IGNORE INTO cache_stats (name, value) VALUES ('total_size', 0);
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use pigment_core::config::CacheSize;
    use tempfile::TempDir;
    use time::Duration as TimeDuration;
    use time::macros::datetime;

    const T0: OffsetDateTime = datetime!(2024-01-01 00:00 UTC);

    fn at(secs: i64) -> OffsetDateTime {
        T0 + TimeDuration::seconds(secs)
    }

    fn hash(s: &str) -> BlobHash {
        BlobHash::parse(s).unwrap()
    }

    async fn open(dir: &TempDir, max: u64) -> CacheStore {
        let mut config = CacheConfig::new(dir.path().join("cache"));
        config.size = CacheSize::Bytes(max);
        CacheStore::open(&config).await.unwrap()
    }

    fn source(dir: &TempDir, name: &str, len: usize) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, vec![b'x'; len]).unwrap();
        path
    }

    async fn computed_size(store: &CacheStore) -> i64 {
        sqlx::query_scalar("SELECT COALESCE(SUM(size_bytes), 0) FROM transformations")
            .fetch_one(&store.pool)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_set_get_and_use() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir, 1024).await;
        let h = hash("912ec803b2ce49e4a541068d495ab570");
        let src = dir.path().join("src.png");
        std::fs::write(&src, b"rendered bytes").unwrap();

        let outcome = store
            .set(&h, true, "S100x100", "image/png", &src, at(0))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            SetOutcome {
                stored: true,
                evicted: 0
            }
        );

        let entries = store.get(&h, "S100x100").await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].mime, "image/png");
        assert_eq!(entries[0].size_bytes, 14);
        assert!(entries[0].transparent);
        assert_eq!(entries[0].created(), at(0));

        let path = store
            .use_entry(&h, "S100x100", "image/png", at(5))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"rendered bytes");
        assert!(path.ends_with("49e4/a541068d495ab570/S100x100/png"));

        let entries = store.get(&h, "S100x100").await.unwrap();
        assert_eq!(entries[0].last_used(), at(5));
        assert_eq!(store.total_size().await.unwrap(), 14);
    }

    #[tokio::test]
    async fn test_get_returns_every_mime() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir, 1024).await;
        let h = hash("abc123");
        let src = source(&dir, "a", 10);

        store.set(&h, false, "G", "image/jpeg", &src, at(0)).await.unwrap();
        store.set(&h, false, "G", "image/webp", &src, at(1)).await.unwrap();
        store.set(&h, false, "S10", "image/webp", &src, at(2)).await.unwrap();

        let mimes: Vec<_> = store
            .get(&h, "G")
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.mime)
            .collect();
        assert_eq!(mimes, vec!["image/jpeg", "image/webp"]);
        assert!(
            store
                .use_entry(&h, "G", "image/png", at(3))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_set_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir, 1024).await;
        let h = hash("abc123");
        let src = source(&dir, "a", 100);

        let first = store.set(&h, false, "S1", "image/png", &src, at(0)).await.unwrap();
        let second = store.set(&h, false, "S1", "image/png", &src, at(1)).await.unwrap();
        assert!(first.stored);
        assert!(!second.stored);
        assert_eq!(store.total_size().await.unwrap(), 100);
        assert_eq!(computed_size(&store).await, 100);
    }

    #[tokio::test]
    async fn test_purge_evicts_least_recently_used() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir, 30).await;
        let src = source(&dir, "a", 10);
        let (a, b, c, d) = (hash("aaaa"), hash("bbbb"), hash("cccc"), hash("dddd"));

        store.set(&a, false, "G", "image/png", &src, at(0)).await.unwrap();
        store.set(&b, false, "G", "image/png", &src, at(1)).await.unwrap();
        store.set(&c, false, "G", "image/png", &src, at(2)).await.unwrap();
        assert_eq!(store.total_size().await.unwrap(), 30);

        // `a` is the oldest insert but was used most recently.
        store.use_entry(&a, "G", "image/png", at(3)).await.unwrap();

        let outcome = store.set(&d, false, "G", "image/png", &src, at(4)).await.unwrap();
        assert_eq!(
            outcome,
            SetOutcome {
                stored: true,
                evicted: 1
            }
        );
        assert_eq!(store.get(&a, "G").await.unwrap().len(), 1);
        assert!(store.get(&b, "G").await.unwrap().is_empty());
        assert_eq!(store.get(&c, "G").await.unwrap().len(), 1);
        assert_eq!(store.get(&d, "G").await.unwrap().len(), 1);
        assert_eq!(store.total_size().await.unwrap(), 30);
    }

    #[tokio::test]
    async fn test_purge_evicts_enough_for_large_entry() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir, 30).await;
        let small = source(&dir, "small", 10);
        let large = source(&dir, "large", 25);

        for (i, h) in ["aaaa", "bbbb", "cccc"].into_iter().enumerate() {
            store
                .set(&hash(h), false, "G", "image/png", &small, at(i as i64))
                .await
                .unwrap();
        }
        let outcome = store
            .set(&hash("dddd"), false, "G", "image/png", &large, at(10))
            .await
            .unwrap();
        assert_eq!(outcome.evicted, 3);
        assert_eq!(store.total_size().await.unwrap(), 25);
        assert_eq!(computed_size(&store).await, 25);
    }

    #[tokio::test]
    async fn test_purge_removes_files_and_empty_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir, 10).await;
        let src = source(&dir, "a", 10);
        let first = hash("aaaa1111bbbb2222cccc3333dddd4444");
        let second = hash("eeee5555ffff6666");

        store.set(&first, false, "S1", "image/png", &src, at(0)).await.unwrap();
        let first_path = layout::destination(store.root(), &first, "S1", "image/png").unwrap();
        assert!(first_path.exists());

        store.set(&second, false, "S1", "image/png", &src, at(1)).await.unwrap();
        assert!(!first_path.exists());
        assert!(!store.root().join("aaaa").exists());
        assert!(store.root().join("eeee").exists());
        assert!(store.root().exists());
    }

    #[tokio::test]
    async fn test_entry_larger_than_cache_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir, 10).await;
        let small = source(&dir, "small", 5);
        let huge = source(&dir, "huge", 11);
        let h = hash("abc123");

        store.set(&h, false, "A", "image/png", &small, at(0)).await.unwrap();
        let outcome = store.set(&h, false, "B", "image/png", &huge, at(1)).await.unwrap();
        assert_eq!(outcome, SetOutcome::default());
        assert_eq!(store.get(&h, "A").await.unwrap().len(), 1);
        assert_eq!(store.total_size().await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_missing_file_heals_index() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir, 1024).await;
        let src = source(&dir, "a", 10);
        let h = hash("abc123");

        store.set(&h, false, "G", "image/png", &src, at(0)).await.unwrap();
        store.set(&h, false, "G", "image/jpeg", &src, at(0)).await.unwrap();
        let png = layout::destination(store.root(), &h, "G", "image/png").unwrap();
        std::fs::remove_file(png).unwrap();

        let hit = store.use_entry(&h, "G", "image/png", at(1)).await.unwrap();
        assert!(hit.is_none());
        assert!(store.get(&h, "G").await.unwrap().is_empty());
        assert_eq!(store.total_size().await.unwrap(), 0);
        assert!(!store.root().join("abc1").exists());
    }

    #[tokio::test]
    async fn test_set_refuses_keys_leaving_the_root() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir, 1024).await;
        let src = source(&dir, "a", 10);
        let h = hash("abc123");

        for key in ["R../../../../../escaped", "R2/../../escaped"] {
            let err = store
                .set(&h, false, key, "image/png", &src, at(0))
                .await
                .unwrap_err();
            assert!(matches!(err, CacheError::InvalidKey(_)), "{key}");
        }
        assert!(!dir.path().join("escaped").exists());
        assert_eq!(store.total_size().await.unwrap(), 0);
        assert!(store.use_entry(&h, "..", "image/png", at(1)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_hash() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir, 1024).await;
        let src = source(&dir, "a", 10);
        let h = hash("abc123");
        let other = hash("def456");

        store.set(&h, false, "G", "image/png", &src, at(0)).await.unwrap();
        store.set(&h, false, "S5", "image/png", &src, at(0)).await.unwrap();
        store.set(&other, false, "G", "image/png", &src, at(0)).await.unwrap();

        assert_eq!(store.delete(&h).await.unwrap(), 2);
        assert!(store.get(&h, "G").await.unwrap().is_empty());
        assert_eq!(store.get(&other, "G").await.unwrap().len(), 1);
        assert_eq!(store.total_size().await.unwrap(), 10);
        assert!(!store.root().join("abc1").exists());
        assert_eq!(store.delete(&h).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_size_accounting_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let src = source(&dir, "a", 7);
        {
            let store = open(&dir, 1024).await;
            for (i, h) in ["aaaa", "bbbb", "cccc"].into_iter().enumerate() {
                store
                    .set(&hash(h), false, "G", "image/png", &src, at(i as i64))
                    .await
                    .unwrap();
            }
            store.delete(&hash("bbbb")).await.unwrap();
            store.pool.close().await;
        }

        let store = open(&dir, 1024).await;
        assert_eq!(store.total_size().await.unwrap(), 14);
        assert_eq!(computed_size(&store).await, 14);
    }

    #[tokio::test]
    async fn test_concurrent_sets_of_same_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = std::sync::Arc::new(open(&dir, 1024).await);
        let src = source(&dir, "a", 10);
        let h = hash("abc123");

        let mut handles = Vec::new();
        for _ in 0..4 {
            let store = store.clone();
            let src = src.clone();
            let h = h.clone();
            handles.push(tokio::spawn(async move {
                store.set(&h, false, "G", "image/png", &src, at(0)).await
            }));
        }
        let mut stored = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(outcome) if outcome.stored => stored += 1,
                Ok(_) | Err(CacheError::Busy) => {}
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert!(stored <= 1);
        assert_eq!(computed_size(&store).await as u64, store.total_size().await.unwrap());
    }
}
