//! Executes one [`Request`] against the cache and the network.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use reqwest::header::{IF_MODIFIED_SINCE, IF_NONE_MATCH};
use tracing::{debug, instrument};
use url::Url;

use crate::cache::policy::{self, Fetched, Resolution};
use crate::cache::{CacheMode, CacheRecord, CacheStore, Validators};
use crate::error::RequestError;
use crate::net::{HttpRequest, NetworkExecutor};
use crate::request::{Request, Response, ResponseParser};

/// Runs requests synchronously from the caller's point of view: one call,
/// one [`Response`]. The engine calls it from worker tasks.
#[derive(Clone)]
pub struct RequestExecutor {
    network: Arc<dyn NetworkExecutor>,
    cache: Arc<dyn CacheStore>,
}

impl RequestExecutor {
    /// Creates an executor over a network capability and a cache store.
    #[must_use]
    pub fn new(network: Arc<dyn NetworkExecutor>, cache: Arc<dyn CacheStore>) -> Self {
        Self { network, cache }
    }

    /// The cache store used by this executor.
    #[must_use]
    pub fn cache(&self) -> &Arc<dyn CacheStore> {
        &self.cache
    }

    /// Executes `request`, applying its cache mode.
    ///
    /// Never panics and never returns early: every failure is folded into the
    /// returned [`Response`].
    #[instrument(
        skip(self, request),
        fields(url = %request.url, mode = %request.options.cache_mode)
    )]
    pub async fn execute<P: ResponseParser>(&self, request: &Request<P>) -> Response<P::Output> {
        let started = Instant::now();
        if request.is_cancelled() {
            return Response::failed(
                &request.url,
                RequestError::cancelled(&request.url),
                started.elapsed(),
            );
        }

        let key = request.options.cache_key.as_deref();
        let mode = policy::effective_mode(request.options.cache_mode, key);
        let cached = match key {
            Some(key) if mode != CacheMode::OnlyRequestNetwork => self.cache.get(key).await,
            _ => None,
        };

        let resolution = policy::resolve(mode, key, cached, |validators| {
            self.fetch(request, mode, validators)
        })
        .await;

        match resolution {
            Ok(Resolution::Cached(record)) => {
                debug!(status = record.status, "served from cache");
                let result = parse_body(request, &record.headers, &record.body);
                Response {
                    url: request.url.clone(),
                    status: Some(record.status),
                    headers: record.headers,
                    from_cache: true,
                    elapsed: started.elapsed(),
                    result,
                }
            }
            Ok(Resolution::Network { fetched, store }) => {
                let result = if fetched.status >= 400 {
                    Err(RequestError::server(
                        &request.url,
                        fetched.status,
                        String::from_utf8_lossy(&fetched.body),
                    ))
                } else {
                    if let (true, Some(key)) = (store, key) {
                        let record = CacheRecord::new(
                            key,
                            fetched.status,
                            fetched.headers.clone(),
                            fetched.body.clone(),
                        );
                        self.cache.replace(key, record).await;
                        debug!(key, "stored response in cache");
                    }
                    parse_body(request, &fetched.headers, &fetched.body)
                };
                Response {
                    url: request.url.clone(),
                    status: Some(fetched.status),
                    headers: fetched.headers,
                    from_cache: false,
                    elapsed: started.elapsed(),
                    result,
                }
            }
            Err(error) => {
                debug!(error = %error, kind = %error.kind(), "request failed");
                Response::failed(&request.url, error, started.elapsed())
            }
        }
    }

    async fn fetch<P: ResponseParser>(
        &self,
        request: &Request<P>,
        mode: CacheMode,
        validators: Option<Validators>,
    ) -> Result<Fetched, RequestError> {
        let url =
            Url::parse(&request.url).map_err(|_| RequestError::malformed_url(&request.url))?;
        if request.is_cancelled() {
            return Err(RequestError::cancelled(&request.url));
        }

        let mut headers = request.headers.clone();
        if mode == CacheMode::OnlyRequestNetwork {
            headers.remove(IF_NONE_MATCH);
            headers.remove(IF_MODIFIED_SINCE);
        }
        if let Some(validators) = validators {
            validators.apply(&mut headers);
        }

        let http = HttpRequest {
            method: request.method.clone(),
            url,
            headers,
            body: request.body.clone(),
        };
        let connection = self
            .network
            .connect(&http)
            .await
            .map_err(|e| e.into_request_error(&request.url))?;
        let status = connection.status();
        let headers = connection.response_headers().clone();
        let body = connection
            .read_body()
            .await
            .map_err(|e| e.into_request_error(&request.url))?;
        debug!(status, bytes = body.len(), "network response read");
        Ok(Fetched {
            status,
            headers,
            body,
        })
    }
}

impl fmt::Debug for RequestExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestExecutor")
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

fn parse_body<P: ResponseParser>(
    request: &Request<P>,
    headers: &reqwest::header::HeaderMap,
    body: &bytes::Bytes,
) -> Result<P::Output, RequestError> {
    let parsed = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        request.parser().parse(headers, body)
    }));
    match parsed {
        Ok(result) => result.map_err(|e| RequestError::parse(&request.url, e.to_string())),
        Err(_) => Err(RequestError::parse(&request.url, "response parser panicked")),
    }
}
