//! Resumable file downloads.
//!
//! A download moves through these phases, each logged at debug level:
//!
//! ```text
//! Validating -> Connecting -> Resuming | Starting -> Streaming -> Finalizing
//! ```
//!
//! Data is written to `<name>.part` and renamed once complete, so a final
//! file is never observed half-written. A cancelled or interrupted download keeps
//! its partial file for the next attempt to resume from.

use std::fmt;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use futures_util::StreamExt;
use reqwest::header::{CONTENT_RANGE, HeaderMap, HeaderValue, RANGE};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt, BufWriter};
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::filename::{
    name_from_response, name_from_url, partial_path, sanitize_filename, timestamp_name,
};
use super::listener::DownloadListener;
use super::progress::{Progress, ProgressTracker};
use super::request::DownloadRequest;
use crate::error::{ErrorKind, RequestError};
use crate::net::{AssumeOnline, Connection, HttpRequest, NetworkExecutor, NetworkMonitor};
use crate::request::TaskId;

/// Write granularity. Cancellation is checked before each slice is written.
const CHUNK_SIZE: usize = 8 * 1024;

/// Below this many free bytes a failed write is reported as out of space.
const MIN_FREE_SPACE: u64 = 1024;

/// Reports free space for a directory.
pub trait StorageProbe: Send + Sync + fmt::Debug {
    /// Bytes available to this process under `dir`.
    ///
    /// # Errors
    ///
    /// Returns the underlying IO error when the directory cannot be queried.
    fn available_space(&self, dir: &Path) -> std::io::Result<u64>;
}

/// [`StorageProbe`] backed by the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct Fs2Probe;

impl StorageProbe for Fs2Probe {
    fn available_space(&self, dir: &Path) -> std::io::Result<u64> {
        fs2::available_space(dir)
    }
}

/// Final state of one download, mirrored by the listener callback that was
/// delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// The file is complete.
    Finished {
        /// Final file path.
        path: PathBuf,
        /// File length.
        bytes: u64,
    },
    /// Cancellation was observed.
    Cancelled,
    /// The download failed with this kind of error.
    Failed(ErrorKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DownloadPhase {
    Validating,
    Connecting,
    Resuming,
    Starting,
    Streaming,
    Finalizing,
}

impl DownloadPhase {
    fn as_str(self) -> &'static str {
        match self {
            Self::Validating => "validating",
            Self::Connecting => "connecting",
            Self::Resuming => "resuming",
            Self::Starting => "starting",
            Self::Streaming => "streaming",
            Self::Finalizing => "finalizing",
        }
    }
}

fn enter(phase: DownloadPhase) {
    debug!(phase = phase.as_str(), "download phase");
}

enum Completion {
    Done { path: PathBuf, bytes: u64 },
    Cancelled,
}

enum Streamed {
    Complete(u64),
    Cancelled,
}

/// Streams files to disk with resume, replacement and cancellation support.
#[derive(Clone)]
pub struct Downloader {
    network: Arc<dyn NetworkExecutor>,
    monitor: Arc<dyn NetworkMonitor>,
    storage: Arc<dyn StorageProbe>,
}

impl Downloader {
    /// Creates a downloader that assumes the network is up and probes disk
    /// space through the OS.
    #[must_use]
    pub fn new(network: Arc<dyn NetworkExecutor>) -> Self {
        Self::with_collaborators(network, Arc::new(AssumeOnline), Arc::new(Fs2Probe))
    }

    /// Creates a downloader with explicit reachability and disk-space sources.
    #[must_use]
    pub fn with_collaborators(
        network: Arc<dyn NetworkExecutor>,
        monitor: Arc<dyn NetworkMonitor>,
        storage: Arc<dyn StorageProbe>,
    ) -> Self {
        Self {
            network,
            monitor,
            storage,
        }
    }

    /// Runs one download to completion, reporting to `listener`.
    ///
    /// Exactly one of `on_finish`, `on_error` or `on_cancel` is called. A
    /// failure observed after cancellation was requested is reported as a
    /// cancellation.
    #[instrument(skip(self, request, listener), fields(task_id = %what, url = %request.url))]
    pub async fn download(
        &self,
        what: TaskId,
        request: &DownloadRequest,
        listener: &dyn DownloadListener,
    ) -> DownloadOutcome {
        match self.run(what, request, listener).await {
            Ok(Completion::Done { path, bytes }) => {
                info!(path = %path.display(), bytes, "download complete");
                listener.on_finish(what, path.clone());
                DownloadOutcome::Finished { path, bytes }
            }
            Ok(Completion::Cancelled) => {
                info!("download cancelled; partial file kept");
                listener.on_cancel(what);
                DownloadOutcome::Cancelled
            }
            Err(error) if request.is_cancelled() => {
                debug!(error = %error, "error after cancellation; reporting cancel");
                listener.on_cancel(what);
                DownloadOutcome::Cancelled
            }
            Err(error) => {
                let error = self.refine_error(error, &request.file_dir);
                let kind = error.kind();
                warn!(error = %error, kind = %kind, "download failed");
                listener.on_error(what, error);
                DownloadOutcome::Failed(kind)
            }
        }
    }

    async fn run(
        &self,
        what: TaskId,
        request: &DownloadRequest,
        listener: &dyn DownloadListener,
    ) -> Result<Completion, RequestError> {
        let url_str = request.url.as_str();
        let dir = request.file_dir.as_path();

        enter(DownloadPhase::Validating);
        if !self.monitor.is_available() {
            return Err(RequestError::network_unavailable(url_str));
        }
        let url = Url::parse(url_str).map_err(|_| RequestError::malformed_url(url_str))?;
        fs::create_dir_all(dir)
            .await
            .map_err(|e| RequestError::storage(dir, e))?;

        let base_name = request
            .file_name
            .as_deref()
            .map(sanitize_filename)
            .filter(|name| !name.trim_matches('_').is_empty())
            .or_else(|| name_from_url(&url))
            .unwrap_or_else(timestamp_name);
        let temp_path = partial_path(dir, &base_name);
        let mut headers = request.headers.clone();
        let mut offset = prepare_partial(&temp_path, request.range, &mut headers).await?;

        if request.is_cancelled() {
            return Ok(Completion::Cancelled);
        }

        enter(DownloadPhase::Connecting);
        let connection = self
            .connect(request, &url, &mut headers, &mut offset)
            .await?;
        let status = connection.status();
        let response_headers = connection.response_headers().clone();

        if status >= 400 {
            let body = match connection.read_body().await {
                Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                Err(error) => {
                    debug!(error = %error, "could not read error body");
                    String::new()
                }
            };
            return Err(RequestError::server(url_str, status, body));
        }

        let final_name = if request.auto_name {
            name_from_response(&response_headers, &url).unwrap_or_else(|| base_name.clone())
        } else {
            base_name.clone()
        };
        let final_path = dir.join(final_name);

        let total = match status {
            206 => {
                enter(DownloadPhase::Resuming);
                let (start, total) = content_range(&response_headers).ok_or_else(|| {
                    RequestError::server(url_str, status, "missing or malformed Content-Range")
                })?;
                if start != offset {
                    if start != 0 {
                        return Err(RequestError::server(
                            url_str,
                            status,
                            format!("Content-Range starts at {start}, expected {offset}"),
                        ));
                    }
                    debug!(offset, "server sent the whole file; restarting from zero");
                    offset = 0;
                }
                Some(total)
            }
            304 => {
                let Some(len) = existing_len(&final_path).await else {
                    return Err(RequestError::server(
                        url_str,
                        status,
                        "not modified, but no local copy exists",
                    ));
                };
                discard_partial(&temp_path).await;
                return Ok(reuse_existing(what, final_path, len, response_headers, listener));
            }
            200 => {
                enter(DownloadPhase::Starting);
                offset = 0;
                connection.content_length()
            }
            _ => {
                return Err(RequestError::server(
                    url_str,
                    status,
                    format!("unexpected status {status} for a download"),
                ));
            }
        };

        if let Some(len) = existing_len(&final_path).await {
            if request.delete_old {
                fs::remove_file(&final_path)
                    .await
                    .map_err(|e| RequestError::storage(&final_path, e))?;
                debug!(path = %final_path.display(), "removed previous file");
            } else {
                debug!(path = %final_path.display(), "file already present; reusing");
                discard_partial(&temp_path).await;
                return Ok(reuse_existing(what, final_path, len, response_headers, listener));
            }
        }

        if let Some(total) = total {
            let available = self
                .storage
                .available_space(dir)
                .map_err(|e| RequestError::storage(dir, e))?;
            if available < total {
                return Err(RequestError::storage_space(dir, total, available));
            }
        }

        let file = open_partial(&temp_path, offset).await?;
        if request.is_cancelled() {
            return Ok(Completion::Cancelled);
        }
        listener.on_start(what, offset > 0, offset, response_headers, total);

        enter(DownloadPhase::Streaming);
        let tracker = ProgressTracker::new(offset, total, Instant::now());
        let streamed =
            stream_body(what, request, connection, file, &temp_path, tracker, listener).await?;
        let written = match streamed {
            Streamed::Complete(bytes) => bytes,
            Streamed::Cancelled => return Ok(Completion::Cancelled),
        };
        if let Some(total) = total
            && written != total
        {
            if written < total {
                return Err(RequestError::io(
                    url_str,
                    format!("connection closed after {written} of {total} bytes"),
                ));
            }
            discard_partial(&temp_path).await;
            return Err(RequestError::server(
                url_str,
                status,
                format!("received {written} bytes, more than the declared {total}"),
            ));
        }

        enter(DownloadPhase::Finalizing);
        fs::rename(&temp_path, &final_path)
            .await
            .map_err(|e| RequestError::storage(&final_path, e))?;
        Ok(Completion::Done {
            path: final_path,
            bytes: written,
        })
    }

    /// Opens the connection, retrying once without `Range` when the server
    /// rejects the resume offset.
    async fn connect(
        &self,
        request: &DownloadRequest,
        url: &Url,
        headers: &mut HeaderMap,
        offset: &mut u64,
    ) -> Result<Connection, RequestError> {
        let connection = self.open(request, url, headers).await?;
        if connection.status() == 416 && headers.contains_key(RANGE) {
            debug!(offset = *offset, "range not satisfiable; restarting from zero");
            headers.remove(RANGE);
            *offset = 0;
            return self.open(request, url, headers).await;
        }
        Ok(connection)
    }

    async fn open(
        &self,
        request: &DownloadRequest,
        url: &Url,
        headers: &HeaderMap,
    ) -> Result<Connection, RequestError> {
        let http = HttpRequest {
            method: request.method.clone(),
            url: url.clone(),
            headers: headers.clone(),
            body: None,
        };
        self.network
            .connect(&http)
            .await
            .map_err(|e| e.into_request_error(&request.url))
    }

    /// Re-checks the environment to sharpen a generic failure.
    fn refine_error(&self, error: RequestError, dir: &Path) -> RequestError {
        match error {
            RequestError::Io { url, message } => {
                if self.monitor.is_available() {
                    RequestError::Io { url, message }
                } else {
                    RequestError::network_unavailable(url)
                }
            }
            RequestError::StorageReadWrite { path, source } => {
                match self.storage.available_space(dir) {
                    Ok(available) if available < MIN_FREE_SPACE => {
                        RequestError::storage_space(dir, MIN_FREE_SPACE, available)
                    }
                    _ => RequestError::StorageReadWrite { path, source },
                }
            }
            other => other,
        }
    }
}

impl fmt::Debug for Downloader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Downloader")
            .field("monitor", &self.monitor)
            .field("storage", &self.storage)
            .finish_non_exhaustive()
    }
}

/// Inspects an existing partial file: removes it when it cannot be resumed,
/// otherwise adds a `Range` header and returns its length.
async fn prepare_partial(
    temp_path: &Path,
    range: bool,
    headers: &mut HeaderMap,
) -> Result<u64, RequestError> {
    match fs::metadata(temp_path).await {
        Ok(meta) if meta.is_dir() => {
            fs::remove_dir_all(temp_path)
                .await
                .map_err(|e| RequestError::storage(temp_path, e))?;
            Ok(0)
        }
        Ok(meta) if range && meta.len() > 0 => {
            let offset = meta.len();
            if let Ok(value) = HeaderValue::from_str(&format!("bytes={offset}-")) {
                headers.insert(RANGE, value);
            }
            debug!(offset, "resuming partial file");
            Ok(offset)
        }
        Ok(_) => {
            fs::remove_file(temp_path)
                .await
                .map_err(|e| RequestError::storage(temp_path, e))?;
            Ok(0)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(RequestError::storage(temp_path, e)),
    }
}

async fn open_partial(path: &Path, offset: u64) -> Result<File, RequestError> {
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(offset == 0)
        .open(path)
        .await
        .map_err(|e| RequestError::storage(path, e))?;
    if offset > 0 {
        file.seek(SeekFrom::Start(offset))
            .await
            .map_err(|e| RequestError::storage(path, e))?;
    }
    Ok(file)
}

async fn existing_len(path: &Path) -> Option<u64> {
    match fs::metadata(path).await {
        Ok(meta) if meta.is_file() => Some(meta.len()),
        _ => None,
    }
}

/// Removes a partial file that can no longer be resumed. Failures are logged.
async fn discard_partial(path: &Path) {
    match fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "removed partial file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => debug!(path = %path.display(), error = %e, "could not remove partial file"),
    }
}

fn reuse_existing(
    what: TaskId,
    path: PathBuf,
    len: u64,
    headers: HeaderMap,
    listener: &dyn DownloadListener,
) -> Completion {
    listener.on_start(what, true, len, headers, Some(len));
    listener.on_progress(
        what,
        Progress {
            percent: 100,
            bytes: len,
            bytes_per_sec: 0,
        },
    );
    Completion::Done { path, bytes: len }
}

async fn stream_body(
    what: TaskId,
    request: &DownloadRequest,
    connection: Connection,
    file: File,
    temp_path: &Path,
    mut tracker: ProgressTracker,
    listener: &dyn DownloadListener,
) -> Result<Streamed, RequestError> {
    let mut stream = connection.into_stream();
    let mut writer = BufWriter::new(file);

    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(error) => {
                flush_quietly(&mut writer).await;
                return Err(error.into_request_error(&request.url));
            }
        };
        for piece in chunk.chunks(CHUNK_SIZE) {
            if request.is_cancelled() {
                flush_quietly(&mut writer).await;
                debug!(bytes = tracker.bytes(), "cancellation observed while streaming");
                return Ok(Streamed::Cancelled);
            }
            writer
                .write_all(piece)
                .await
                .map_err(|e| RequestError::storage(temp_path, e))?;
            if let Some(progress) = tracker.advance(piece.len() as u64, Instant::now()) {
                listener.on_progress(what, progress);
            }
        }
    }

    writer
        .flush()
        .await
        .map_err(|e| RequestError::storage(temp_path, e))?;
    if let Some(progress) = tracker.finish(Instant::now()) {
        listener.on_progress(what, progress);
    }
    Ok(Streamed::Complete(tracker.bytes()))
}

async fn flush_quietly(writer: &mut BufWriter<File>) {
    if let Err(error) = writer.flush().await {
        debug!(error = %error, "flush of partial file failed");
    }
}

/// First byte and total length from `Content-Range: bytes a-b/total`.
/// `None` for an unknown total or garbage.
pub(crate) fn content_range(headers: &HeaderMap) -> Option<(u64, u64)> {
    let value = headers.get(CONTENT_RANGE)?.to_str().ok()?;
    let range = value.trim().strip_prefix("bytes")?.trim_start();
    let (span, total) = range.rsplit_once('/')?;
    let (start, _) = span.split_once('-')?;
    Some((start.trim().parse().ok()?, total.trim().parse().ok()?))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn range_headers(value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_RANGE, HeaderValue::from_static(value));
        headers
    }

    #[test]
    fn test_content_range() {
        assert_eq!(content_range(&range_headers("bytes 100-199/200")), Some((100, 200)));
        assert_eq!(content_range(&range_headers("bytes 0-29/30")), Some((0, 30)));
        assert_eq!(content_range(&range_headers("bytes 100-199/*")), None);
        assert_eq!(content_range(&range_headers("bytes */200")), None);
        assert_eq!(content_range(&HeaderMap::new()), None);
    }

    #[tokio::test]
    async fn test_discard_partial_tolerates_missing_file() {
        let dir = TempDir::new().unwrap();
        let temp = dir.path().join("c.part");
        discard_partial(&temp).await;

        std::fs::write(&temp, b"stale").unwrap();
        discard_partial(&temp).await;
        assert!(!temp.exists());
    }

    #[tokio::test]
    async fn test_prepare_partial_sets_range_for_existing_file() {
        let dir = TempDir::new().unwrap();
        let temp = dir.path().join("a.bin.part");
        std::fs::write(&temp, b"12345").unwrap();

        let mut headers = HeaderMap::new();
        let offset = prepare_partial(&temp, true, &mut headers).await.unwrap();
        assert_eq!(offset, 5);
        assert_eq!(headers.get(RANGE).unwrap(), "bytes=5-");
    }

    #[tokio::test]
    async fn test_prepare_partial_discards_when_range_disabled() {
        let dir = TempDir::new().unwrap();
        let temp = dir.path().join("a.bin.part");
        std::fs::write(&temp, b"12345").unwrap();

        let mut headers = HeaderMap::new();
        let offset = prepare_partial(&temp, false, &mut headers).await.unwrap();
        assert_eq!(offset, 0);
        assert!(!headers.contains_key(RANGE));
        assert!(!temp.exists());
    }

    #[tokio::test]
    async fn test_prepare_partial_removes_directory_in_the_way() {
        let dir = TempDir::new().unwrap();
        let temp = dir.path().join("a.bin.part");
        std::fs::create_dir(&temp).unwrap();

        let mut headers = HeaderMap::new();
        let offset = prepare_partial(&temp, true, &mut headers).await.unwrap();
        assert_eq!(offset, 0);
        assert!(!temp.exists());
    }

    #[tokio::test]
    async fn test_open_partial_appends_at_offset() {
        let dir = TempDir::new().unwrap();
        let temp = dir.path().join("b.part");
        std::fs::write(&temp, b"abc").unwrap();

        let mut file = open_partial(&temp, 3).await.unwrap();
        file.write_all(b"def").await.unwrap();
        file.flush().await.unwrap();
        drop(file);
        assert_eq!(std::fs::read(&temp).unwrap(), b"abcdef");

        let mut file = open_partial(&temp, 0).await.unwrap();
        file.write_all(b"x").await.unwrap();
        file.flush().await.unwrap();
        drop(file);
        assert_eq!(std::fs::read(&temp).unwrap(), b"x");
    }
}
