//! `fetchq download`: resumable downloads with a progress bar per file.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::Result;
use fetchq_core::{
    DownloadListener, DownloadRequest, MemoryCacheStore, Progress, RequestError, TaskId,
};
use indicatif::{HumanBytes, MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use reqwest::header::HeaderMap;
use tokio::sync::mpsc::{self, UnboundedSender};
use tracing::{debug, info};
use url::Url;

use super::{Outcome, RunSummary, Settings, TaskEvent, build_engine, track};
use crate::cli::DownloadArgs;

/// Drives one progress bar and forwards the terminal callback.
struct BarListener {
    label: String,
    bars: MultiProgress,
    bar: Mutex<Option<ProgressBar>>,
    events: UnboundedSender<TaskEvent<PathBuf>>,
}

impl BarListener {
    fn new(url: &str, bars: MultiProgress, events: UnboundedSender<TaskEvent<PathBuf>>) -> Self {
        Self {
            label: bar_label(url),
            bars,
            bar: Mutex::new(None),
            events,
        }
    }

    fn bar(&self) -> MutexGuard<'_, Option<ProgressBar>> {
        self.bar.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn send(&self, what: TaskId, outcome: Outcome<PathBuf>) {
        let _ = self.events.send(TaskEvent { what, outcome });
    }
}

impl DownloadListener for BarListener {
    fn on_start(
        &self,
        what: TaskId,
        resumed: bool,
        before_len: u64,
        _headers: HeaderMap,
        total: Option<u64>,
    ) {
        debug!(task_id = %what, resumed, before_len, ?total, "download started");
        let bar = match total {
            Some(total) => ProgressBar::new(total).with_style(bar_style()),
            None => ProgressBar::new_spinner().with_style(spinner_style()),
        };
        let bar = self.bars.add(bar);
        bar.set_prefix(self.label.clone());
        bar.set_position(before_len);
        if resumed {
            bar.set_message(format!("resumed at {}", HumanBytes(before_len)));
        }
        *self.bar() = Some(bar);
    }

    fn on_progress(&self, _what: TaskId, progress: Progress) {
        if let Some(bar) = self.bar().as_ref() {
            bar.set_position(progress.bytes);
            bar.set_message(format!("{}/s", HumanBytes(progress.bytes_per_sec)));
        }
    }

    fn on_error(&self, what: TaskId, error: RequestError) {
        if let Some(bar) = self.bar().take() {
            bar.abandon_with_message(error.kind().to_string());
        }
        self.send(what, Outcome::Failed(error));
    }

    fn on_finish(&self, what: TaskId, path: PathBuf) {
        if let Some(bar) = self.bar().take() {
            bar.finish_with_message("done");
        }
        self.send(what, Outcome::Done(path));
    }

    fn on_cancel(&self, what: TaskId) {
        if let Some(bar) = self.bar().take() {
            bar.abandon_with_message("cancelled");
        }
        self.send(what, Outcome::Cancelled);
    }
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::with_template("{prefix:.bold} [{bar:30.cyan/blue}] {bytes}/{total_bytes} {msg}")
        .map(|style| style.progress_chars("=> "))
        .unwrap_or_else(|_| ProgressStyle::default_bar())
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner} {prefix:.bold} {bytes} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

/// Last path segment of the URL, or the whole URL when there is none.
fn bar_label(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|parsed| {
            parsed
                .path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
        })
        .filter(|segment| !segment.is_empty())
        .unwrap_or_else(|| url.to_string())
}

pub async fn run_download_command(args: DownloadArgs, settings: &Settings) -> Result<RunSummary> {
    let output_dir = args
        .output_dir
        .clone()
        .unwrap_or_else(|| settings.output_dir.clone());

    // Downloads never consult the response cache.
    let engine = build_engine(settings, Arc::new(MemoryCacheStore::new()))?;
    engine.start()?;

    let bars = if settings.quiet {
        MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
    } else {
        MultiProgress::new()
    };
    let (events_tx, mut events) = mpsc::unbounded_channel();

    let submit = |url: &str| {
        let mut request = DownloadRequest::new(url, output_dir.clone());
        request.range = !args.no_resume;
        request.delete_old = args.delete_old;
        request.priority = args.priority;
        let listener = Arc::new(BarListener::new(url, bars.clone(), events_tx.clone()));
        engine.submit_download(request, listener)
    };
    let report = |url: &str, path: PathBuf| {
        info!(url, path = %path.display(), "Downloaded");
    };

    let summary = track(
        &engine,
        &mut events,
        &args.urls,
        &settings.retry_policy(),
        submit,
        report,
    )
    .await;
    engine.stop().await;
    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bar_label_uses_last_segment() {
        assert_eq!(bar_label("https://example.com/files/report.pdf"), "report.pdf");
        assert_eq!(bar_label("https://example.com/"), "https://example.com/");
        assert_eq!(bar_label("not a url"), "not a url");
    }

    #[test]
    fn test_listener_forwards_terminal_events() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let bars = MultiProgress::with_draw_target(ProgressDrawTarget::hidden());
        let listener = BarListener::new("https://example.com/a.bin", bars, tx);

        listener.on_start(TaskId::new(1), false, 0, HeaderMap::new(), Some(10));
        listener.on_progress(
            TaskId::new(1),
            Progress {
                percent: 50,
                bytes: 5,
                bytes_per_sec: 100,
            },
        );
        listener.on_finish(TaskId::new(1), PathBuf::from("/tmp/a.bin"));
        listener.on_cancel(TaskId::new(2));

        let first = rx.try_recv().unwrap();
        assert_eq!(first.what, TaskId::new(1));
        assert!(matches!(
            first.outcome,
            Outcome::Done(ref path) if path == &PathBuf::from("/tmp/a.bin")
        ));
        let second = rx.try_recv().unwrap();
        assert_eq!(second.what, TaskId::new(2));
        assert!(matches!(second.outcome, Outcome::Cancelled));
    }
}
