use std::path::PathBuf;

use reqwest::Method;
use reqwest::header::HeaderMap;

use crate::request::{CancelFlag, Priority};

/// A file download.
///
/// The body is streamed to `<file_dir>/<name>.part` and renamed to
/// `<file_dir>/<name>` when complete.
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    /// Absolute URL to fetch.
    pub url: String,
    /// HTTP method, normally GET.
    pub method: Method,
    /// Extra request headers.
    pub headers: HeaderMap,
    /// Target directory, created if missing.
    pub file_dir: PathBuf,
    /// Explicit file name. When `None` the name comes from the URL.
    pub file_name: Option<String>,
    /// Rename to the server-suggested name (Content-Disposition, then URL).
    pub auto_name: bool,
    /// Resume from an existing partial file with a Range request.
    pub range: bool,
    /// Replace an existing final file instead of reusing it.
    pub delete_old: bool,
    /// Dequeue priority.
    pub priority: Priority,
    /// Optional group label for tag cancellation.
    pub tag: Option<String>,
    cancel: CancelFlag,
}

impl DownloadRequest {
    /// Downloads `url` into `file_dir`, naming the file after the server's
    /// suggestion and resuming any partial file.
    pub fn new(url: impl Into<String>, file_dir: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            method: Method::GET,
            headers: HeaderMap::new(),
            file_dir: file_dir.into(),
            file_name: None,
            auto_name: true,
            range: true,
            delete_old: false,
            priority: Priority::Default,
            tag: None,
            cancel: CancelFlag::new(),
        }
    }

    /// Downloads `url` to `file_dir/file_name`.
    pub fn with_file_name(
        url: impl Into<String>,
        file_dir: impl Into<PathBuf>,
        file_name: impl Into<String>,
    ) -> Self {
        Self {
            file_name: Some(file_name.into()),
            auto_name: false,
            ..Self::new(url, file_dir)
        }
    }

    /// Requests cancellation.
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
