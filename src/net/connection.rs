//! The connection capability: one request in, one streamed response out.

use std::fmt;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};
use reqwest::Method;
use reqwest::header::{CONTENT_LENGTH, HeaderMap, HeaderName};
use thiserror::Error;
use url::Url;

use crate::error::RequestError;

/// Response body as a stream of chunks.
pub type BodyStream = BoxStream<'static, Result<Bytes, TransportError>>;

/// Failure to establish a connection or read from it.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The URL cannot be used for an HTTP request.
    #[error("malformed URL")]
    MalformedUrl,

    /// The host name did not resolve.
    #[error("unknown host: {0}")]
    UnknownHost(String),

    /// Connect or read timeout elapsed.
    #[error("timed out")]
    Timeout,

    /// Any other I/O failure.
    #[error("{0}")]
    Io(String),
}

impl TransportError {
    /// Attaches the request URL, producing the caller-facing error.
    pub fn into_request_error(self, url: &str) -> RequestError {
        match self {
            Self::MalformedUrl => RequestError::malformed_url(url),
            Self::UnknownHost(message) => RequestError::unknown_host(url, message),
            Self::Timeout => RequestError::timeout(url),
            Self::Io(message) => RequestError::io(url, message),
        }
    }
}

/// A fully described outgoing request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// HTTP method.
    pub method: Method,
    /// Parsed target URL.
    pub url: Url,
    /// Headers to send.
    pub headers: HeaderMap,
    /// Optional request body.
    pub body: Option<Bytes>,
}

impl HttpRequest {
    /// Creates a GET request with no headers.
    #[must_use]
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
            headers: HeaderMap::new(),
            body: None,
        }
    }
}

/// An open response: status, headers and the unread body stream.
pub struct Connection {
    status: u16,
    headers: HeaderMap,
    stream: BodyStream,
}

impl Connection {
    /// Wraps an already-open response.
    #[must_use]
    pub fn new(status: u16, headers: HeaderMap, stream: BodyStream) -> Self {
        Self {
            status,
            headers,
            stream,
        }
    }

    /// Builds a connection whose body is a single in-memory chunk.
    pub fn from_bytes(status: u16, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        let body = body.into();
        let chunks: Vec<Result<Bytes, TransportError>> = if body.is_empty() {
            Vec::new()
        } else {
            vec![Ok(body)]
        };
        Self::new(status, headers, stream::iter(chunks).boxed())
    }

    /// HTTP status code.
    #[must_use]
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Response headers.
    #[must_use]
    pub fn response_headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Returns a header value as text, if present and valid.
    #[must_use]
    pub fn header_str(&self, name: &HeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Declared Content-Length, if any.
    #[must_use]
    pub fn content_length(&self) -> Option<u64> {
        self.header_str(&CONTENT_LENGTH)
            .and_then(|v| v.trim().parse().ok())
    }

    /// Takes the body stream.
    #[must_use]
    pub fn into_stream(self) -> BodyStream {
        self.stream
    }

    /// Reads the whole body into memory.
    ///
    /// # Errors
    ///
    /// Returns the first [`TransportError`] produced by the stream.
    pub async fn read_body(self) -> Result<Bytes, TransportError> {
        let mut stream = self.stream;
        let mut buf = BytesMut::new();
        while let Some(chunk) = stream.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Opens connections. Implemented by [`ReqwestExecutor`](super::ReqwestExecutor)
/// and by test doubles.
#[async_trait]
pub trait NetworkExecutor: Send + Sync {
    /// Sends `request` and returns the response without reading its body.
    ///
    /// Error statuses are not failures at this layer; callers inspect
    /// [`Connection::status`].
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] when no response could be obtained.
    async fn connect(&self, request: &HttpRequest) -> Result<Connection, TransportError>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[tokio::test]
    async fn test_read_body_concatenates_chunks() {
        let chunks = vec![
            Ok(Bytes::from_static(b"hello ")),
            Ok(Bytes::from_static(b"world")),
        ];
        let connection = Connection::new(200, HeaderMap::new(), stream::iter(chunks).boxed());
        assert_eq!(connection.read_body().await.unwrap(), "hello world");
    }

    #[tokio::test]
    async fn test_read_body_propagates_stream_error() {
        let chunks = vec![
            Ok(Bytes::from_static(b"partial")),
            Err(TransportError::Io("connection reset".to_string())),
        ];
        let connection = Connection::new(200, HeaderMap::new(), stream::iter(chunks).boxed());
        let err = connection.read_body().await.unwrap_err();
        assert!(matches!(err, TransportError::Io(_)));
    }

    #[test]
    fn test_content_length_parsing() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("1024"));
        let connection = Connection::from_bytes(200, headers, Bytes::new());
        assert_eq!(connection.content_length(), Some(1024));
        assert_eq!(
            Connection::from_bytes(200, HeaderMap::new(), "x").content_length(),
            None
        );
    }

    #[test]
    fn test_transport_error_attaches_url() {
        let err = TransportError::UnknownHost("no such host".into())
            .into_request_error("https://nowhere.invalid/");
        assert_eq!(err.kind(), crate::ErrorKind::UnknownHost);
        assert!(err.to_string().contains("nowhere.invalid"));
    }
}
