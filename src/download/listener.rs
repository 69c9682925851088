use std::path::PathBuf;

use reqwest::header::HeaderMap;

use super::progress::Progress;
use crate::error::RequestError;
use crate::request::TaskId;

/// Receives the lifecycle of a download.
///
/// A download that reaches the server gets `on_start`, then any number of
/// `on_progress`, then exactly one of `on_finish`, `on_error` or
/// `on_cancel`. Failures before a response arrives skip `on_start`.
pub trait DownloadListener: Send + Sync {
    /// The response arrived and data is about to be written.
    ///
    /// `resumed` is set when continuing from `before_len` bytes of a partial
    /// file; `total` is the full file length when the server declared it.
    fn on_start(
        &self,
        what: TaskId,
        resumed: bool,
        before_len: u64,
        headers: HeaderMap,
        total: Option<u64>,
    );

    /// Bytes were written.
    fn on_progress(&self, _what: TaskId, _progress: Progress) {}

    /// The download failed.
    fn on_error(&self, what: TaskId, error: RequestError);

    /// The file is complete at `path`.
    fn on_finish(&self, what: TaskId, path: PathBuf);

    /// The download stopped because it was cancelled. A partial file is kept.
    fn on_cancel(&self, _what: TaskId) {}
}
