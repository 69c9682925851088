//! Error types shared by the request executor and the downloader.
//!
//! Every failure a caller can observe is a [`RequestError`]. Each variant
//! carries the context needed for a useful message (URL, path, status) and
//! maps onto a flat [`ErrorKind`] for callers that only need to branch.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Flat classification of a [`RequestError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// No network connectivity was available.
    NetworkUnavailable,
    /// Host name could not be resolved.
    UnknownHost,
    /// Connect or read timed out.
    Timeout,
    /// The request URL could not be parsed.
    MalformedUrl,
    /// Transport-level I/O failure while talking to the server.
    Io,
    /// The server answered with a status of 400 or above.
    Server,
    /// The local file system refused a read or write.
    StorageReadWrite,
    /// Not enough free space to store the download.
    StorageSpaceExceeded,
    /// The cache was the only permitted source and had no entry.
    CacheMiss,
    /// The response body could not be converted to the requested type.
    Parse,
    /// The task was cancelled before it finished.
    Cancelled,
}

impl ErrorKind {
    /// Stable lowercase name, used in logs and CLI output.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NetworkUnavailable => "network_unavailable",
            Self::UnknownHost => "unknown_host",
            Self::Timeout => "timeout",
            Self::MalformedUrl => "malformed_url",
            Self::Io => "io",
            Self::Server => "server",
            Self::StorageReadWrite => "storage_read_write",
            Self::StorageSpaceExceeded => "storage_space_exceeded",
            Self::CacheMiss => "cache_miss",
            Self::Parse => "parse",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors surfaced to request and download listeners.
#[derive(Debug, Error)]
pub enum RequestError {
    /// The network monitor reported no connectivity.
    #[error("network unavailable requesting {url}")]
    NetworkUnavailable {
        /// The URL being requested.
        url: String,
    },

    /// DNS resolution failed.
    #[error("unknown host requesting {url}: {message}")]
    UnknownHost {
        /// The URL being requested.
        url: String,
        /// Resolver message.
        message: String,
    },

    /// Connect or read timed out.
    #[error("timeout requesting {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// The URL could not be parsed or is not usable for HTTP.
    #[error("invalid URL: {url}")]
    MalformedUrl {
        /// The invalid URL string.
        url: String,
    },

    /// Transport-level I/O error (connection reset, TLS failure, truncated body).
    #[error("I/O error requesting {url}: {message}")]
    Io {
        /// The URL being requested.
        url: String,
        /// Underlying error message.
        message: String,
    },

    /// The server answered with an error status.
    #[error("HTTP {status} from {url}")]
    Server {
        /// The URL that returned an error status.
        url: String,
        /// The HTTP status code.
        status: u16,
        /// Response body text, possibly empty.
        body: String,
    },

    /// Creating, writing or renaming a local file failed.
    #[error("storage error at {path}: {source}")]
    StorageReadWrite {
        /// The file or directory involved.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The target directory does not have enough free space.
    #[error("not enough space in {path}: need {required} bytes, {available} available")]
    StorageSpaceExceeded {
        /// The target directory.
        path: PathBuf,
        /// Bytes needed.
        required: u64,
        /// Bytes available.
        available: u64,
    },

    /// Cache-only read found nothing under the key.
    #[error("no cached response for key {key}")]
    CacheMiss {
        /// The cache key that missed.
        key: String,
    },

    /// The response body did not parse into the requested type.
    #[error("failed to parse response from {url}: {message}")]
    Parse {
        /// The URL whose body failed to parse.
        url: String,
        /// Parser message.
        message: String,
    },

    /// The task was cancelled.
    #[error("request to {url} was cancelled")]
    Cancelled {
        /// The URL that was being requested.
        url: String,
    },
}

impl RequestError {
    /// Creates a network-unavailable error.
    pub fn network_unavailable(url: impl Into<String>) -> Self {
        Self::NetworkUnavailable { url: url.into() }
    }

    /// Creates an unknown-host error.
    pub fn unknown_host(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::UnknownHost {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates a malformed URL error.
    pub fn malformed_url(url: impl Into<String>) -> Self {
        Self::MalformedUrl { url: url.into() }
    }

    /// Creates a transport I/O error.
    pub fn io(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Io {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Creates a server error from a status and the response body text.
    pub fn server(url: impl Into<String>, status: u16, body: impl Into<String>) -> Self {
        Self::Server {
            url: url.into(),
            status,
            body: body.into(),
        }
    }

    /// Creates a storage read/write error.
    pub fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::StorageReadWrite {
            path: path.into(),
            source,
        }
    }

    /// Creates a storage-space error.
    pub fn storage_space(path: impl Into<PathBuf>, required: u64, available: u64) -> Self {
        Self::StorageSpaceExceeded {
            path: path.into(),
            required,
            available,
        }
    }

    /// Creates a cache miss error.
    pub fn cache_miss(key: impl Into<String>) -> Self {
        Self::CacheMiss { key: key.into() }
    }

    /// Creates a parse error.
    pub fn parse(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Parse {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Creates a cancellation error.
    pub fn cancelled(url: impl Into<String>) -> Self {
        Self::Cancelled { url: url.into() }
    }

    /// Returns the flat classification of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NetworkUnavailable { .. } => ErrorKind::NetworkUnavailable,
            Self::UnknownHost { .. } => ErrorKind::UnknownHost,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::MalformedUrl { .. } => ErrorKind::MalformedUrl,
            Self::Io { .. } => ErrorKind::Io,
            Self::Server { .. } => ErrorKind::Server,
            Self::StorageReadWrite { .. } => ErrorKind::StorageReadWrite,
            Self::StorageSpaceExceeded { .. } => ErrorKind::StorageSpaceExceeded,
            Self::CacheMiss { .. } => ErrorKind::CacheMiss,
            Self::Parse { .. } => ErrorKind::Parse,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
        }
    }

    /// HTTP status for server errors.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Server { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns true for [`RequestError::Cancelled`].
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}
