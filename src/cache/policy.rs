//! Cache policy evaluation.
//!
//! [`resolve`] decides, for one request, whether the body comes from the
//! cache or the network and whether a network response should be stored.
//! It does no I/O of its own: the cache lookup result and the network
//! attempt are passed in.

use std::future::Future;

use bytes::Bytes;
use reqwest::header::HeaderMap;
use tracing::debug;

use super::{CacheMode, CacheRecord, Validators};
use crate::error::RequestError;

/// A network response with its body read.
#[derive(Debug, Clone)]
pub struct Fetched {
    /// HTTP status.
    pub status: u16,
    /// Response headers.
    pub headers: HeaderMap,
    /// Response body.
    pub body: Bytes,
}

impl Fetched {
    fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Where the response body comes from.
#[derive(Debug)]
pub enum Resolution {
    /// Serve the cached record.
    Cached(CacheRecord),
    /// Serve the network response; store it under the key when `store` is set.
    Network {
        /// The network response.
        fetched: Fetched,
        /// Whether the response must be written to the cache.
        store: bool,
    },
}

/// Mode actually applied for a request.
///
/// Without a cache key nothing can be read or stored, so every mode behaves
/// as [`CacheMode::OnlyRequestNetwork`].
#[must_use]
pub fn effective_mode(mode: CacheMode, key: Option<&str>) -> CacheMode {
    if key.is_none() {
        CacheMode::OnlyRequestNetwork
    } else {
        mode
    }
}

/// Combines a cache lookup result with at most one network attempt.
///
/// `network` receives the validators to send as conditional headers, if any,
/// and is called at most once. It is never called in
/// [`CacheMode::OnlyReadCache`], nor in [`CacheMode::NoneCacheRequestNetwork`]
/// when `cached` is present.
///
/// # Errors
///
/// Returns [`RequestError::CacheMiss`] for a cache-only miss, or the network
/// error when no cached fallback applies.
pub async fn resolve<F, Fut>(
    mode: CacheMode,
    key: Option<&str>,
    cached: Option<CacheRecord>,
    network: F,
) -> Result<Resolution, RequestError>
where
    F: FnOnce(Option<Validators>) -> Fut,
    Fut: Future<Output = Result<Fetched, RequestError>>,
{
    let mode = effective_mode(mode, key);
    let cached = if mode == CacheMode::OnlyRequestNetwork {
        None
    } else {
        cached
    };

    match mode {
        CacheMode::Default => {
            let validators = cached
                .as_ref()
                .map(|record| record.validators.clone())
                .filter(|v| !v.is_empty());
            let fetched = network(validators).await?;
            match cached {
                Some(record) if fetched.status == 304 => {
                    debug!(key = ?key, "not modified; serving cached body");
                    Ok(Resolution::Cached(record))
                }
                _ => Ok(network_resolution(fetched)),
            }
        }
        CacheMode::RequestNetworkFailedReadCache => match (network(None).await, cached) {
            (Err(error), Some(record)) if !error.is_cancelled() => {
                debug!(key = ?key, error = %error, "network failed; serving cached body");
                Ok(Resolution::Cached(record))
            }
            (Ok(fetched), Some(record)) if fetched.status >= 400 => {
                debug!(key = ?key, status = fetched.status, "server error; serving cached body");
                Ok(Resolution::Cached(record))
            }
            (Ok(fetched), _) => Ok(network_resolution(fetched)),
            (Err(error), _) => Err(error),
        },
        CacheMode::NoneCacheRequestNetwork => match cached {
            Some(record) => Ok(Resolution::Cached(record)),
            None => Ok(network_resolution(network(None).await?)),
        },
        CacheMode::OnlyReadCache => {
            cached
                .map(Resolution::Cached)
                .ok_or_else(|| RequestError::cache_miss(key.unwrap_or_default()))
        }
        CacheMode::OnlyRequestNetwork => {
            let fetched = network(None).await?;
            Ok(Resolution::Network {
                fetched,
                store: false,
            })
        }
    }
}

fn network_resolution(fetched: Fetched) -> Resolution {
    let store = fetched.is_success();
    Resolution::Network { fetched, store }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use reqwest::header::{ETAG, HeaderValue};

    fn record(body: &'static str) -> CacheRecord {
        let mut headers = HeaderMap::new();
        headers.insert(ETAG, HeaderValue::from_static("\"abc\""));
        CacheRecord::new("k", 200, headers, Bytes::from_static(body.as_bytes()))
    }

    fn fetched(status: u16, body: &'static str) -> Fetched {
        Fetched {
            status,
            headers: HeaderMap::new(),
            body: Bytes::from_static(body.as_bytes()),
        }
    }

    struct FakeFetch {
        calls: AtomicUsize,
        validators: Mutex<Option<Option<Validators>>>,
    }

    impl FakeFetch {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                validators: Mutex::new(None),
            }
        }

        async fn answer(
            &self,
            validators: Option<Validators>,
            result: Result<Fetched, RequestError>,
        ) -> Result<Fetched, RequestError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.validators.lock().unwrap() = Some(validators);
            result
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[tokio::test]
    async fn test_only_read_cache_miss_never_touches_network() {
        let fetch = FakeFetch::new();
        let result = resolve(CacheMode::OnlyReadCache, Some("k"), None, |v| {
            fetch.answer(v, Ok(fetched(200, "net")))
        })
        .await;
        assert!(matches!(result, Err(RequestError::CacheMiss { ref key }) if key == "k"));
        assert_eq!(fetch.calls(), 0);
    }

    #[tokio::test]
    async fn test_only_read_cache_hit() {
        let fetch = FakeFetch::new();
        let result = resolve(CacheMode::OnlyReadCache, Some("k"), Some(record("c")), |v| {
            fetch.answer(v, Ok(fetched(200, "net")))
        })
        .await
        .unwrap();
        assert!(matches!(result, Resolution::Cached(r) if r.body == "c"));
        assert_eq!(fetch.calls(), 0);
    }

    #[tokio::test]
    async fn test_none_cache_request_network_prefers_cache() {
        let fetch = FakeFetch::new();
        let result = resolve(
            CacheMode::NoneCacheRequestNetwork,
            Some("k"),
            Some(record("c")),
            |v| fetch.answer(v, Ok(fetched(200, "net"))),
        )
        .await
        .unwrap();
        assert!(matches!(result, Resolution::Cached(_)));
        assert_eq!(fetch.calls(), 0);
    }

    #[tokio::test]
    async fn test_none_cache_request_network_miss_fetches_and_stores() {
        let fetch = FakeFetch::new();
        let result = resolve(CacheMode::NoneCacheRequestNetwork, Some("k"), None, |v| {
            fetch.answer(v, Ok(fetched(200, "net")))
        })
        .await
        .unwrap();
        assert!(matches!(result, Resolution::Network { store: true, .. }));
        assert_eq!(fetch.calls(), 1);
    }

    #[tokio::test]
    async fn test_default_sends_validators_and_serves_cache_on_304() {
        let fetch = FakeFetch::new();
        let result = resolve(CacheMode::Default, Some("k"), Some(record("cached")), |v| {
            fetch.answer(v, Ok(fetched(304, "")))
        })
        .await
        .unwrap();
        assert!(matches!(result, Resolution::Cached(r) if r.body == "cached"));
        let sent = fetch.validators.lock().unwrap().clone().unwrap().unwrap();
        assert_eq!(sent.etag.as_deref(), Some("\"abc\""));
    }

    #[tokio::test]
    async fn test_default_does_not_store_error_status() {
        let fetch = FakeFetch::new();
        let result = resolve(CacheMode::Default, Some("k"), None, |v| {
            fetch.answer(v, Ok(fetched(500, "oops")))
        })
        .await
        .unwrap();
        assert!(matches!(result, Resolution::Network { store: false, .. }));
    }

    #[tokio::test]
    async fn test_failed_read_cache_falls_back_on_network_error() {
        let fetch = FakeFetch::new();
        let result = resolve(
            CacheMode::RequestNetworkFailedReadCache,
            Some("k"),
            Some(record("stale")),
            |v| fetch.answer(v, Err(RequestError::timeout("u"))),
        )
        .await
        .unwrap();
        assert!(matches!(result, Resolution::Cached(r) if r.body == "stale"));
        assert_eq!(fetch.calls(), 1);
    }

    #[tokio::test]
    async fn test_failed_read_cache_falls_back_on_server_error() {
        let fetch = FakeFetch::new();
        let result = resolve(
            CacheMode::RequestNetworkFailedReadCache,
            Some("k"),
            Some(record("stale")),
            |v| fetch.answer(v, Ok(fetched(503, "busy"))),
        )
        .await
        .unwrap();
        assert!(matches!(result, Resolution::Cached(_)));
    }

    #[tokio::test]
    async fn test_failed_read_cache_without_record_surfaces_error() {
        let fetch = FakeFetch::new();
        let result = resolve(CacheMode::RequestNetworkFailedReadCache, Some("k"), None, |v| {
            fetch.answer(v, Err(RequestError::timeout("u")))
        })
        .await;
        assert!(matches!(result, Err(RequestError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_only_request_network_ignores_cache() {
        let fetch = FakeFetch::new();
        let result = resolve(
            CacheMode::OnlyRequestNetwork,
            Some("k"),
            Some(record("c")),
            |v| fetch.answer(v, Ok(fetched(200, "net"))),
        )
        .await
        .unwrap();
        assert!(matches!(
            result,
            Resolution::Network { store: false, ref fetched } if fetched.body == "net"
        ));
        assert_eq!(fetch.validators.lock().unwrap().clone(), Some(None));
    }

    #[tokio::test]
    async fn test_missing_key_always_goes_to_network() {
        let fetch = FakeFetch::new();
        let result = resolve(CacheMode::OnlyReadCache, None, None, |v| {
            fetch.answer(v, Ok(fetched(200, "net")))
        })
        .await
        .unwrap();
        assert!(matches!(result, Resolution::Network { store: false, .. }));
        assert_eq!(fetch.calls(), 1);
    }
}
