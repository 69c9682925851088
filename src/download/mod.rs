//! File downloads with resume, progress and cancellation.
//!
//! - [`DownloadRequest`] describes the file to fetch and where to put it
//! - [`Downloader`] runs the download state machine
//! - [`DownloadListener`] receives start, progress and terminal callbacks

mod downloader;
mod filename;
mod listener;
mod progress;
mod request;

pub use downloader::{DownloadOutcome, Downloader, Fs2Probe, StorageProbe};
pub use filename::{PARTIAL_SUFFIX, partial_path};
pub use listener::DownloadListener;
pub use progress::{PROGRESS_INTERVAL, Progress};
pub use request::DownloadRequest;
