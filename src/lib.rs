//! fetchq core library
//!
//! A client-side HTTP task engine: typed requests and resumable file
//! downloads are queued by priority, executed by a fixed pool of workers,
//! and report back through listener callbacks delivered in order on a
//! single consumer.
//!
//! # Architecture
//!
//! - [`request`] - typed requests, parsers, responses and listeners
//! - [`cache`] - cache modes, policy evaluation, memory and SQLite stores
//! - [`net`] - the connection capability and its reqwest implementation
//! - [`executor`] - runs one request against cache and network
//! - [`download`] - resumable downloads with progress and cancellation
//! - [`dispatch`] - priority queue, workers, registry and callback delivery
//! - [`retry`] - caller-side retry classification and backoff

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cache;
pub mod config;
pub mod dispatch;
pub mod download;
pub mod error;
pub mod executor;
pub mod net;
pub mod request;
pub mod retry;

// Re-export commonly used types
pub use cache::{CacheMode, CacheRecord, CacheStore, MemoryCacheStore, SqliteCacheStore};
pub use config::{ConfigError, EngineConfig};
pub use dispatch::{Delivery, DeliveryReceiver, EngineError, TaskEngine};
pub use download::{
    DownloadListener, DownloadOutcome, DownloadRequest, Downloader, Progress, StorageProbe,
};
pub use error::{ErrorKind, RequestError};
pub use executor::RequestExecutor;
pub use net::{
    AssumeOnline, Connection, HttpRequest, NetworkExecutor, NetworkMonitor, ReqwestExecutor,
    TransportError,
};
pub use request::{
    BytesParser, CancelFlag, JsonParser, Priority, Request, RequestOptions, Response,
    ResponseListener, ResponseParser, StringParser, TaskId,
};
pub use retry::{FailureType, RetryDecision, RetryPolicy, classify_error};
