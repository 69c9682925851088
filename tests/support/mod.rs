//! Listeners and collaborators shared by the integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use fetchq_core::{
    DownloadListener, NetworkMonitor, Progress, RequestError, Response, ResponseListener,
    StorageProbe, TaskId,
};
use reqwest::header::HeaderMap;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Upper bound for waiting on any single callback.
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(10);

/// One request callback, flattened for assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Start(TaskId),
    Success(TaskId, String),
    Error(TaskId, String),
    Cancel(TaskId),
    Finish(TaskId),
}

/// Forwards every request callback to the test.
pub struct RecordingListener {
    events: UnboundedSender<Event>,
}

impl RecordingListener {
    pub fn new() -> (Arc<Self>, UnboundedReceiver<Event>) {
        let (events, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { events }), rx)
    }
}

impl ResponseListener<String> for RecordingListener {
    fn on_start(&self, what: TaskId) {
        let _ = self.events.send(Event::Start(what));
    }

    fn on_success(&self, what: TaskId, response: Response<String>) {
        let body = response.into_result().unwrap_or_default();
        let _ = self.events.send(Event::Success(what, body));
    }

    fn on_error(&self, what: TaskId, response: Response<String>) {
        let kind = response
            .error()
            .map(|error| error.kind().to_string())
            .unwrap_or_default();
        let _ = self.events.send(Event::Error(what, kind));
    }

    fn on_cancel(&self, what: TaskId) {
        let _ = self.events.send(Event::Cancel(what));
    }

    fn on_finish(&self, what: TaskId) {
        let _ = self.events.send(Event::Finish(what));
    }
}

/// Waits for the next event or panics after [`EVENT_TIMEOUT`].
pub async fn next_event<T>(rx: &mut UnboundedReceiver<T>) -> T {
    tokio::time::timeout(EVENT_TIMEOUT, rx.recv())
        .await
        .expect("timed out waiting for callback")
        .expect("listener dropped")
}

/// One download callback.
#[derive(Debug)]
pub enum DownloadEvent {
    Start {
        resumed: bool,
        before_len: u64,
        total: Option<u64>,
    },
    Progress(Progress),
    Error(RequestError),
    Finish(PathBuf),
    Cancel,
}

type ProgressHook = Box<dyn Fn(&Progress) + Send>;

/// Collects download callbacks in order.
#[derive(Default)]
pub struct DownloadRecorder {
    events: Mutex<Vec<DownloadEvent>>,
    hook: Mutex<Option<ProgressHook>>,
}

impl DownloadRecorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Runs `hook` on every progress callback.
    pub fn set_progress_hook(&self, hook: impl Fn(&Progress) + Send + 'static) {
        *self.hook.lock().unwrap() = Some(Box::new(hook));
    }

    pub fn starts(&self) -> Vec<(bool, u64, Option<u64>)> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|event| match event {
                DownloadEvent::Start {
                    resumed,
                    before_len,
                    total,
                } => Some((*resumed, *before_len, *total)),
                _ => None,
            })
            .collect()
    }

    pub fn progress(&self) -> Vec<Progress> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|event| match event {
                DownloadEvent::Progress(progress) => Some(*progress),
                _ => None,
            })
            .collect()
    }

    /// Applies `inspect` to the reported error, if any.
    pub fn error<R>(&self, inspect: impl FnOnce(&RequestError) -> R) -> Option<R> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .find_map(|event| match event {
                DownloadEvent::Error(error) => Some(error),
                _ => None,
            })
            .map(inspect)
    }

    pub fn finished(&self) -> Option<PathBuf> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .find_map(|event| match event {
                DownloadEvent::Finish(path) => Some(path.clone()),
                _ => None,
            })
    }

    pub fn cancelled(&self) -> bool {
        self.events
            .lock()
            .unwrap()
            .iter()
            .any(|event| matches!(event, DownloadEvent::Cancel))
    }

    /// Number of terminal callbacks received.
    pub fn terminal_count(&self) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|event| {
                matches!(
                    event,
                    DownloadEvent::Error(_) | DownloadEvent::Finish(_) | DownloadEvent::Cancel
                )
            })
            .count()
    }

    fn push(&self, event: DownloadEvent) {
        self.events.lock().unwrap().push(event);
    }
}

impl DownloadListener for DownloadRecorder {
    fn on_start(
        &self,
        _what: TaskId,
        resumed: bool,
        before_len: u64,
        _headers: HeaderMap,
        total: Option<u64>,
    ) {
        self.push(DownloadEvent::Start {
            resumed,
            before_len,
            total,
        });
    }

    fn on_progress(&self, _what: TaskId, progress: Progress) {
        self.push(DownloadEvent::Progress(progress));
        if let Some(hook) = self.hook.lock().unwrap().as_ref() {
            hook(&progress);
        }
    }

    fn on_error(&self, _what: TaskId, error: RequestError) {
        self.push(DownloadEvent::Error(error));
    }

    fn on_finish(&self, _what: TaskId, path: PathBuf) {
        self.push(DownloadEvent::Finish(path));
    }

    fn on_cancel(&self, _what: TaskId) {
        self.push(DownloadEvent::Cancel);
    }
}

/// Storage probe reporting a fixed amount of free space.
#[derive(Debug, Clone, Copy)]
pub struct FixedSpace(pub u64);

impl StorageProbe for FixedSpace {
    fn available_space(&self, _dir: &Path) -> std::io::Result<u64> {
        Ok(self.0)
    }
}

/// Network monitor that always reports offline.
#[derive(Debug, Clone, Copy)]
pub struct Offline;

impl NetworkMonitor for Offline {
    fn is_available(&self) -> bool {
        false
    }
}
