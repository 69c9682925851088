//! SQLite-backed response cache.
//!
//! Uses a small connection pool with WAL mode so concurrent workers can read
//! while another stores. The schema lives in `migrations/` and is applied on
//! open.

use std::path::Path;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use sqlx::FromRow;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use tracing::{instrument, warn};

use super::{CacheError, CacheRecord, CacheStore, Validators};

/// Kept low for SQLite since it uses file-level locking.
const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Connections wait this long before returning SQLITE_BUSY.
const BUSY_TIMEOUT_MS: u32 = 5000;

#[derive(Debug, FromRow)]
struct CacheRow {
    cache_key: String,
    status: i64,
    headers: String,
    body: Vec<u8>,
    etag: Option<String>,
    last_modified: Option<String>,
    stored_at: i64,
}

impl CacheRow {
    fn into_record(self) -> Result<CacheRecord, CacheError> {
        let pairs: Vec<(String, String)> = serde_json::from_str(&self.headers)?;
        Ok(CacheRecord {
            key: self.cache_key,
            status: u16::try_from(self.status).unwrap_or(200),
            headers: pairs_to_headers(pairs),
            body: Bytes::from(self.body),
            validators: Validators {
                etag: self.etag,
                last_modified: self.last_modified,
            },
            stored_at_ms: self.stored_at,
        })
    }
}

/// Persistent cache in a SQLite database file.
#[derive(Debug, Clone)]
pub struct SqliteCacheStore {
    pool: SqlitePool,
}

impl SqliteCacheStore {
    /// Opens (creating if needed) the cache database at `db_path`.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Database`] if the connection fails, or
    /// [`CacheError::Migration`] if the schema cannot be applied.
    #[instrument(skip(db_path), fields(path = %db_path.display()))]
    pub async fn open(db_path: &Path) -> Result<Self, CacheError> {
        let db_url = format!("sqlite:{}?mode=rwc", db_path.display());

        let pool = SqlitePoolOptions::new()
            .max_connections(DEFAULT_MAX_CONNECTIONS)
            .connect(&db_url)
            .await?;

        sqlx::query("PRAGMA journal_mode=WAL")
            .execute(&pool)
            .await?;
        sqlx::query(&format!("PRAGMA busy_timeout={BUSY_TIMEOUT_MS}"))
            .execute(&pool)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    /// Opens a private in-memory cache. Contents vanish with the store.
    ///
    /// # Errors
    ///
    /// Same as [`open`](Self::open).
    #[instrument]
    pub async fn open_in_memory() -> Result<Self, CacheError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    /// Number of stored records.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Database`] if the query fails.
    pub async fn count(&self) -> Result<i64, CacheError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM http_cache")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn try_get(&self, key: &str) -> Result<Option<CacheRecord>, CacheError> {
        let row = sqlx::query_as::<_, CacheRow>(
            r"SELECT cache_key, status, headers, body, etag, last_modified, stored_at
              FROM http_cache WHERE cache_key = ?",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        row.map(CacheRow::into_record).transpose()
    }

    async fn try_replace(&self, key: &str, record: &CacheRecord) -> Result<(), CacheError> {
        let headers = serde_json::to_string(&headers_to_pairs(&record.headers))?;
        sqlx::query(
            r"INSERT OR REPLACE INTO http_cache
              (cache_key, status, headers, body, etag, last_modified, stored_at)
              VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(key)
        .bind(i64::from(record.status))
        .bind(headers)
        .bind(record.body.as_ref())
        .bind(record.validators.etag.as_deref())
        .bind(record.validators.last_modified.as_deref())
        .bind(record.stored_at_ms)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl CacheStore for SqliteCacheStore {
    async fn get(&self, key: &str) -> Option<CacheRecord> {
        match self.try_get(key).await {
            Ok(record) => record,
            Err(error) => {
                warn!(key, error = %error, "cache read failed; treating as miss");
                None
            }
        }
    }

    async fn replace(&self, key: &str, record: CacheRecord) -> CacheRecord {
        if let Err(error) = self.try_replace(key, &record).await {
            warn!(key, error = %error, "cache write failed");
        }
        record
    }

    async fn remove(&self, key: &str) -> bool {
        match sqlx::query("DELETE FROM http_cache WHERE cache_key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
        {
            Ok(result) => result.rows_affected() > 0,
            Err(error) => {
                warn!(key, error = %error, "cache remove failed");
                false
            }
        }
    }

    async fn clear(&self) -> bool {
        match sqlx::query("DELETE FROM http_cache").execute(&self.pool).await {
            Ok(_) => true,
            Err(error) => {
                warn!(error = %error, "cache clear failed");
                false
            }
        }
    }
}

fn headers_to_pairs(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect()
}

fn pairs_to_headers(pairs: Vec<(String, String)>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in pairs {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(&value),
        ) {
            headers.append(name, value);
        }
    }
    headers
}
