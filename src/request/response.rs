use std::time::Duration;

use reqwest::header::HeaderMap;

use crate::error::RequestError;

/// Outcome of one executed request, delivered to the listener.
#[derive(Debug)]
pub struct Response<T> {
    /// The requested URL.
    pub url: String,
    /// HTTP status of the response that produced `result`, if any.
    pub status: Option<u16>,
    /// Response headers (cached headers when served from cache).
    pub headers: HeaderMap,
    /// True when the body came from the cache rather than the network.
    pub from_cache: bool,
    /// Time spent executing the request.
    pub elapsed: Duration,
    /// Parsed body or the classified failure.
    pub result: Result<T, RequestError>,
}

impl<T> Response<T> {
    pub(crate) fn failed(url: impl Into<String>, error: RequestError, elapsed: Duration) -> Self {
        Self {
            url: url.into(),
            status: error.status(),
            headers: HeaderMap::new(),
            from_cache: false,
            elapsed,
            result: Err(error),
        }
    }

    /// Returns true when `result` holds a parsed body.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    /// Returns the parsed body, if any.
    #[must_use]
    pub fn get(&self) -> Option<&T> {
        self.result.as_ref().ok()
    }

    /// Returns the error, if any.
    #[must_use]
    pub fn error(&self) -> Option<&RequestError> {
        self.result.as_ref().err()
    }

    /// Consumes the response, returning the parsed body or the error.
    ///
    /// # Errors
    ///
    /// Returns the [`RequestError`] the request failed with.
    pub fn into_result(self) -> Result<T, RequestError> {
        self.result
    }
}
