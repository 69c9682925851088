//! Request model: what a caller submits to the engine.
//!
//! A [`Request`] pairs an HTTP method, URL, headers and optional body with a
//! [`ResponseParser`] that turns the raw body into the caller's type, plus the
//! scheduling and caching knobs in [`RequestOptions`].

mod listener;
mod parser;
mod response;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use reqwest::Method;
use reqwest::header::HeaderMap;

pub use listener::ResponseListener;
pub use parser::{BytesParser, JsonParser, ParseError, ResponseParser, StringParser};
pub use response::Response;

use crate::cache::CacheMode;

/// Caller-visible correlation token for a submitted task.
///
/// Every callback carries the id returned by the submit call, so one listener
/// can serve many tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    /// Wraps a raw id. Used by callers driving the downloader directly.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw numeric id.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Scheduling priority. Higher priorities are dequeued first; equal
/// priorities run in submission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Priority {
    Lowest,
    Low,
    #[default]
    Default,
    High,
    Highest,
}

impl Priority {
    /// Returns the lowercase name accepted by [`FromStr`].
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lowest => "lowest",
            Self::Low => "low",
            Self::Default => "default",
            Self::High => "high",
            Self::Highest => "highest",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lowest" => Ok(Self::Lowest),
            "low" => Ok(Self::Low),
            "default" | "normal" => Ok(Self::Default),
            "high" => Ok(Self::High),
            "highest" => Ok(Self::Highest),
            other => Err(format!(
                "unknown priority '{other}' (expected lowest, low, default, high, highest)"
            )),
        }
    }
}

/// Shared cancellation flag.
///
/// Clones observe the same flag. Setting it is idempotent and never blocks;
/// the engine and the downloader poll it at their checkpoints.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// Creates an unset flag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the flag as cancelled.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Returns true once [`cancel`](Self::cancel) has been called on any clone.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Scheduling and caching options shared by all request kinds.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Dequeue priority.
    pub priority: Priority,
    /// Key under which the response is cached. `None` disables the cache.
    pub cache_key: Option<String>,
    /// How the cache and the network are combined.
    pub cache_mode: CacheMode,
    /// Optional group label for [`cancel_by_tag`](crate::TaskEngine::cancel_by_tag).
    pub tag: Option<String>,
}

/// A typed HTTP request.
pub struct Request<P> {
    /// Absolute URL to fetch.
    pub url: String,
    /// HTTP method.
    pub method: Method,
    /// Request headers sent as-is, plus any conditional headers added by the cache policy.
    pub headers: HeaderMap,
    /// Optional request body.
    pub body: Option<Bytes>,
    /// Scheduling and caching options.
    pub options: RequestOptions,
    parser: P,
    cancel: CancelFlag,
}

impl<P: ResponseParser> Request<P> {
    /// Creates a GET request with default options.
    pub fn get(url: impl Into<String>, parser: P) -> Self {
        Self::new(Method::GET, url, parser)
    }

    /// Creates a request with the given method and default options.
    pub fn new(method: Method, url: impl Into<String>, parser: P) -> Self {
        Self {
            url: url.into(),
            method,
            headers: HeaderMap::new(),
            body: None,
            options: RequestOptions::default(),
            parser,
            cancel: CancelFlag::new(),
        }
    }

    /// Returns the parser used for the response body.
    pub fn parser(&self) -> &P {
        &self.parser
    }

    /// Requests cancellation. Safe to call from any thread, any number of times.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Returns true once cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Returns the flag shared with the engine.
    #[must_use]
    pub fn cancel_flag(&self) -> &CancelFlag {
        &self.cancel
    }
}

impl<P> fmt::Debug for Request<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("url", &self.url)
            .field("method", &self.method)
            .field("options", &self.options)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_orders_lowest_to_highest() {
        assert!(Priority::Lowest < Priority::Low);
        assert!(Priority::Low < Priority::Default);
        assert!(Priority::Default < Priority::High);
        assert!(Priority::High < Priority::Highest);
        assert_eq!(Priority::default(), Priority::Default);
    }

    #[test]
    fn test_priority_from_str() {
        assert_eq!("HIGH".parse::<Priority>(), Ok(Priority::High));
        assert_eq!("normal".parse::<Priority>(), Ok(Priority::Default));
        assert!("urgent".parse::<Priority>().is_err());
    }

    #[test]
    fn test_cancel_flag_is_shared_between_clones() {
        let flag = CancelFlag::new();
        let clone = flag.clone();
        assert!(!clone.is_cancelled());
        flag.cancel();
        flag.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_request_defaults() {
        let request = Request::get("https://example.com", StringParser);
        assert_eq!(request.method, Method::GET);
        assert_eq!(request.options.priority, Priority::Default);
        assert_eq!(request.options.cache_mode, CacheMode::Default);
        assert!(request.options.cache_key.is_none());
        assert!(!request.is_cancelled());
        request.cancel();
        assert!(request.cancel_flag().is_cancelled());
    }

    #[test]
    fn test_task_id_display() {
        assert_eq!(TaskId::new(7).to_string(), "#7");
        assert_eq!(TaskId::new(7).get(), 7);
    }
}
