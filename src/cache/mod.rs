//! Response cache: modes, records and storage backends.
//!
//! The cache stores raw response bodies with their headers and validators.
//! Decoding happens after retrieval, so one record can feed any parser.
//!
//! - [`CacheMode`] selects how cache and network are combined per request
//! - [`CacheStore`] is the storage seam, with [`MemoryCacheStore`] and
//!   [`SqliteCacheStore`] implementations
//! - [`policy`] holds the decision logic, independent of storage and transport

mod memory;
pub mod policy;
mod sqlite;

use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{
    ETAG, HeaderMap, HeaderName, HeaderValue, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED,
};
use thiserror::Error;

pub use memory::MemoryCacheStore;
pub use sqlite::SqliteCacheStore;

/// How a request combines the cache and the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CacheMode {
    /// Network with conditional headers; a 304 serves the cached body.
    #[default]
    Default,
    /// Network first; any failure falls back to the cached body.
    RequestNetworkFailedReadCache,
    /// Cached body if present, otherwise network.
    NoneCacheRequestNetwork,
    /// Cache only; a miss fails without touching the network.
    OnlyReadCache,
    /// Network only; the cache is neither read nor written.
    OnlyRequestNetwork,
}

impl CacheMode {
    /// Returns the kebab-case name accepted by [`FromStr`].
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::RequestNetworkFailedReadCache => "network-failed-read-cache",
            Self::NoneCacheRequestNetwork => "none-cache-request-network",
            Self::OnlyReadCache => "only-read-cache",
            Self::OnlyRequestNetwork => "only-request-network",
        }
    }

    /// Whether a successful network response in this mode is written to the cache.
    #[must_use]
    pub fn writes_cache(self) -> bool {
        matches!(
            self,
            Self::Default | Self::RequestNetworkFailedReadCache | Self::NoneCacheRequestNetwork
        )
    }
}

impl fmt::Display for CacheMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CacheMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "default" => Ok(Self::Default),
            "network-failed-read-cache" | "request-network-failed-read-cache" => {
                Ok(Self::RequestNetworkFailedReadCache)
            }
            "none-cache-request-network" => Ok(Self::NoneCacheRequestNetwork),
            "only-read-cache" => Ok(Self::OnlyReadCache),
            "only-request-network" => Ok(Self::OnlyRequestNetwork),
            other => Err(format!("unknown cache mode '{other}'")),
        }
    }
}

/// Revalidation tokens captured from a cached response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Validators {
    /// `ETag` of the cached response.
    pub etag: Option<String>,
    /// `Last-Modified` of the cached response.
    pub last_modified: Option<String>,
}

impl Validators {
    /// Reads validators from response headers.
    #[must_use]
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let text = |name: HeaderName| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        Self {
            etag: text(ETAG),
            last_modified: text(LAST_MODIFIED),
        }
    }

    /// True when neither validator is known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.etag.is_none() && self.last_modified.is_none()
    }

    /// Adds `If-None-Match` / `If-Modified-Since` to outgoing headers.
    pub fn apply(&self, headers: &mut HeaderMap) {
        if let Some(value) = self.etag.as_deref().and_then(|v| HeaderValue::from_str(v).ok()) {
            headers.insert(IF_NONE_MATCH, value);
        }
        if let Some(value) = self
            .last_modified
            .as_deref()
            .and_then(|v| HeaderValue::from_str(v).ok())
        {
            headers.insert(IF_MODIFIED_SINCE, value);
        }
    }
}

/// A stored response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheRecord {
    /// Cache key.
    pub key: String,
    /// HTTP status the body was served with.
    pub status: u16,
    /// Response headers.
    pub headers: HeaderMap,
    /// Raw response body.
    pub body: Bytes,
    /// Revalidation tokens.
    pub validators: Validators,
    /// When the record was stored, in milliseconds since the Unix epoch.
    pub stored_at_ms: i64,
}

impl CacheRecord {
    /// Builds a record from a network response, stamping the current time.
    #[must_use]
    pub fn new(key: impl Into<String>, status: u16, headers: HeaderMap, body: Bytes) -> Self {
        let validators = Validators::from_headers(&headers);
        Self {
            key: key.into(),
            status,
            headers,
            body,
            validators,
            stored_at_ms: now_millis(),
        }
    }
}

/// Errors raised by persistent cache backends.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Database failure.
    #[error("cache database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Migration failure when opening the database.
    #[error("failed to run cache migrations: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Stored headers could not be encoded or decoded.
    #[error("cache header encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Keyed response storage.
///
/// Operations never fail from the caller's point of view: a backend error
/// is logged and reported as a miss or `false`.
#[async_trait]
pub trait CacheStore: Send + Sync + fmt::Debug {
    /// Returns the record stored under `key`.
    async fn get(&self, key: &str) -> Option<CacheRecord>;

    /// Stores `record` under `key`, replacing any previous record.
    async fn replace(&self, key: &str, record: CacheRecord) -> CacheRecord;

    /// Removes the record under `key`. Returns true if one existed.
    async fn remove(&self, key: &str) -> bool;

    /// Removes every record. Returns true on success.
    async fn clear(&self) -> bool;
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_mode_round_trips_names() {
        for mode in [
            CacheMode::Default,
            CacheMode::RequestNetworkFailedReadCache,
            CacheMode::NoneCacheRequestNetwork,
            CacheMode::OnlyReadCache,
            CacheMode::OnlyRequestNetwork,
        ] {
            assert_eq!(mode.as_str().parse::<CacheMode>(), Ok(mode));
        }
        assert_eq!(
            "ONLY_READ_CACHE".parse::<CacheMode>(),
            Ok(CacheMode::OnlyReadCache)
        );
        assert!("sometimes".parse::<CacheMode>().is_err());
    }

    #[test]
    fn test_only_network_and_only_cache_do_not_write() {
        assert!(CacheMode::Default.writes_cache());
        assert!(!CacheMode::OnlyRequestNetwork.writes_cache());
        assert!(!CacheMode::OnlyReadCache.writes_cache());
    }

    #[test]
    fn test_validators_from_headers_and_apply() {
        let mut response = HeaderMap::new();
        response.insert(ETAG, HeaderValue::from_static("\"v1\""));
        response.insert(
            LAST_MODIFIED,
            HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"),
        );
        let validators = Validators::from_headers(&response);
        assert!(!validators.is_empty());

        let mut outgoing = HeaderMap::new();
        validators.apply(&mut outgoing);
        assert_eq!(outgoing.get(IF_NONE_MATCH).map(HeaderValue::as_bytes), Some(&b"\"v1\""[..]));
        assert!(outgoing.contains_key(IF_MODIFIED_SINCE));
    }

    #[test]
    fn test_empty_validators_add_nothing() {
        let validators = Validators::from_headers(&HeaderMap::new());
        assert!(validators.is_empty());
        let mut outgoing = HeaderMap::new();
        validators.apply(&mut outgoing);
        assert!(outgoing.is_empty());
    }
}
