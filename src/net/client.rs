//! reqwest-backed [`NetworkExecutor`].
//!
//! One client is built per executor and shared by every worker, so
//! connections are pooled across tasks.

use std::error::Error as StdError;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::cookie::Jar;
use reqwest::{Client, ClientBuilder};
use tracing::{debug, instrument};

use super::connection::{Connection, HttpRequest, NetworkExecutor, TransportError};
use crate::config::EngineConfig;

/// [`NetworkExecutor`] that sends requests with a shared [`reqwest::Client`].
#[derive(Debug, Clone)]
pub struct ReqwestExecutor {
    client: Client,
}

impl ReqwestExecutor {
    /// Builds an executor with the timeouts and User-Agent from `config`.
    ///
    /// # Errors
    ///
    /// Returns the builder error when the TLS backend cannot be initialised.
    pub fn from_config(config: &EngineConfig) -> Result<Self, reqwest::Error> {
        let client = base_client_builder(config, None).build()?;
        Ok(Self { client })
    }

    /// Like [`from_config`](Self::from_config), attaching a cookie jar to every request.
    ///
    /// # Errors
    ///
    /// Returns the builder error when the TLS backend cannot be initialised.
    #[instrument(level = "debug", skip_all)]
    pub fn with_cookie_jar(config: &EngineConfig, jar: Arc<Jar>) -> Result<Self, reqwest::Error> {
        let client = base_client_builder(config, Some(jar)).build()?;
        Ok(Self { client })
    }

    /// Wraps an existing client.
    #[must_use]
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl NetworkExecutor for ReqwestExecutor {
    #[instrument(
        level = "debug",
        skip(self, request),
        fields(method = %request.method, url = %request.url)
    )]
    async fn connect(&self, request: &HttpRequest) -> Result<Connection, TransportError> {
        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone());
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await.map_err(|e| classify_reqwest_error(&e))?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        debug!(status, "connection opened");

        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| classify_reqwest_error(&e)))
            .boxed();
        Ok(Connection::new(status, headers, stream))
    }
}

fn base_client_builder(config: &EngineConfig, cookie_jar: Option<Arc<Jar>>) -> ClientBuilder {
    let mut builder = Client::builder()
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .read_timeout(Duration::from_secs(config.read_timeout_secs))
        .gzip(true)
        .user_agent(config.user_agent.clone());
    if let Some(jar) = cookie_jar {
        builder = builder.cookie_provider(jar);
    }
    builder
}

/// Maps a reqwest failure onto the transport error taxonomy.
pub(crate) fn classify_reqwest_error(error: &reqwest::Error) -> TransportError {
    if error.is_timeout() {
        return TransportError::Timeout;
    }
    if error.is_builder() {
        return TransportError::MalformedUrl;
    }
    let chain = error_chain_text(error);
    if error.is_connect() && looks_like_dns_failure(&chain) {
        return TransportError::UnknownHost(chain);
    }
    TransportError::Io(chain)
}

fn error_chain_text(error: &(dyn StdError + 'static)) -> String {
    let mut text = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        text.push_str(": ");
        text.push_str(&cause.to_string());
        source = cause.source();
    }
    text
}

fn looks_like_dns_failure(chain: &str) -> bool {
    let lower = chain.to_ascii_lowercase();
    lower.contains("dns error")
        || lower.contains("failed to lookup address")
        || lower.contains("name or service not known")
        || lower.contains("no such host")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn executor() -> ReqwestExecutor {
        ReqwestExecutor::from_config(&EngineConfig::default()).unwrap()
    }

    #[test]
    fn test_dns_failure_detection() {
        assert!(looks_like_dns_failure(
            "error sending request: dns error: failed to lookup address information"
        ));
        assert!(!looks_like_dns_failure("connection refused"));
    }

    #[tokio::test]
    async fn test_connect_returns_error_status_without_failing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404).set_body_string("gone"))
            .mount(&server)
            .await;

        let url = url::Url::parse(&format!("{}/missing", server.uri())).unwrap();
        let connection = executor().connect(&HttpRequest::get(url)).await.unwrap();
        assert_eq!(connection.status(), 404);
        assert_eq!(connection.read_body().await.unwrap(), "gone");
    }

    #[tokio::test]
    async fn test_connect_sends_request_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/h"))
            .and(header("x-trace", "abc"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .expect(1)
            .mount(&server)
            .await;

        let url = url::Url::parse(&format!("{}/h", server.uri())).unwrap();
        let mut request = HttpRequest::get(url);
        request
            .headers
            .insert("x-trace", reqwest::header::HeaderValue::from_static("abc"));
        let connection = executor().connect(&request).await.unwrap();
        assert_eq!(connection.status(), 200);
    }

    #[tokio::test]
    async fn test_connection_refused_is_io() {
        // Port 9 (discard) on localhost is almost never listening.
        let url = url::Url::parse("http://127.0.0.1:9/").unwrap();
        let err = executor().connect(&HttpRequest::get(url)).await.unwrap_err();
        assert!(
            matches!(err, TransportError::Io(_) | TransportError::Timeout),
            "unexpected: {err:?}"
        );
    }
}
