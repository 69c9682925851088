//! Type-erased units of work held by the registry.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::HeaderMap;

use super::delivery::Delivery;
use crate::download::{DownloadListener, DownloadRequest, Downloader, Progress};
use crate::error::RequestError;
use crate::executor::RequestExecutor;
use crate::request::{CancelFlag, Request, Response, ResponseListener, ResponseParser, TaskId};

const PANIC_MESSAGE: &str = "task aborted by a panic";

/// What workers need to run any job.
#[derive(Debug)]
pub(crate) struct Services {
    pub(crate) executor: RequestExecutor,
    pub(crate) downloader: Downloader,
}

/// A submitted task with its listener.
#[async_trait]
pub(crate) trait Job: Send + Sync {
    fn url(&self) -> &str;

    fn cancel_flag(&self) -> &CancelFlag;

    fn tag(&self) -> Option<&str>;

    /// Delivers the cancellation callback for a task that never ran.
    fn post_cancel(&self, what: TaskId, delivery: &Delivery);

    /// Delivers the terminal callbacks for a run that panicked.
    fn post_failure(&self, what: TaskId, delivery: &Delivery);

    /// Executes the task, posting every callback through `delivery`.
    async fn run(&self, what: TaskId, services: &Services, delivery: &Delivery);
}

pub(crate) struct RequestJob<P: ResponseParser> {
    request: Request<P>,
    listener: Arc<dyn ResponseListener<P::Output>>,
}

impl<P: ResponseParser> RequestJob<P> {
    pub(crate) fn new(request: Request<P>, listener: Arc<dyn ResponseListener<P::Output>>) -> Self {
        Self { request, listener }
    }

    fn post<F>(&self, delivery: &Delivery, callback: F)
    where
        F: FnOnce(&dyn ResponseListener<P::Output>) + Send + 'static,
    {
        let listener = Arc::clone(&self.listener);
        delivery.post(move || callback(listener.as_ref()));
    }
}

#[async_trait]
impl<P: ResponseParser> Job for RequestJob<P> {
    fn url(&self) -> &str {
        &self.request.url
    }

    fn cancel_flag(&self) -> &CancelFlag {
        self.request.cancel_flag()
    }

    fn tag(&self) -> Option<&str> {
        self.request.options.tag.as_deref()
    }

    fn post_cancel(&self, what: TaskId, delivery: &Delivery) {
        self.post(delivery, move |listener| listener.on_cancel(what));
    }

    fn post_failure(&self, what: TaskId, delivery: &Delivery) {
        let error = RequestError::io(&self.request.url, PANIC_MESSAGE);
        let response = Response::failed(&self.request.url, error, Duration::ZERO);
        self.post(delivery, move |listener| listener.on_error(what, response));
        self.post(delivery, move |listener| listener.on_finish(what));
    }

    async fn run(&self, what: TaskId, services: &Services, delivery: &Delivery) {
        self.post(delivery, move |listener| listener.on_start(what));
        let response = services.executor.execute(&self.request).await;
        if self.request.is_cancelled() {
            self.post(delivery, move |listener| listener.on_cancel(what));
        } else if response.is_success() {
            self.post(delivery, move |listener| listener.on_success(what, response));
        } else {
            self.post(delivery, move |listener| listener.on_error(what, response));
        }
        self.post(delivery, move |listener| listener.on_finish(what));
    }
}

pub(crate) struct DownloadJob {
    request: DownloadRequest,
    listener: Arc<dyn DownloadListener>,
}

impl DownloadJob {
    pub(crate) fn new(request: DownloadRequest, listener: Arc<dyn DownloadListener>) -> Self {
        Self { request, listener }
    }
}

#[async_trait]
impl Job for DownloadJob {
    fn url(&self) -> &str {
        &self.request.url
    }

    fn cancel_flag(&self) -> &CancelFlag {
        self.request.cancel_flag()
    }

    fn tag(&self) -> Option<&str> {
        self.request.tag.as_deref()
    }

    fn post_cancel(&self, what: TaskId, delivery: &Delivery) {
        let listener = Arc::clone(&self.listener);
        delivery.post(move || listener.on_cancel(what));
    }

    fn post_failure(&self, what: TaskId, delivery: &Delivery) {
        let listener = Arc::clone(&self.listener);
        let error = RequestError::io(&self.request.url, PANIC_MESSAGE);
        delivery.post(move || listener.on_error(what, error));
    }

    async fn run(&self, what: TaskId, services: &Services, delivery: &Delivery) {
        let delivered = DeliveredListener {
            inner: Arc::clone(&self.listener),
            delivery: delivery.clone(),
        };
        services
            .downloader
            .download(what, &self.request, &delivered)
            .await;
    }
}

/// Forwards downloader callbacks through the delivery channel.
struct DeliveredListener {
    inner: Arc<dyn DownloadListener>,
    delivery: Delivery,
}

impl DeliveredListener {
    fn post<F>(&self, callback: F)
    where
        F: FnOnce(&dyn DownloadListener) + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        self.delivery.post(move || callback(inner.as_ref()));
    }
}

impl DownloadListener for DeliveredListener {
    fn on_start(
        &self,
        what: TaskId,
        resumed: bool,
        before_len: u64,
        headers: HeaderMap,
        total: Option<u64>,
    ) {
        self.post(move |l| l.on_start(what, resumed, before_len, headers, total));
    }

    fn on_progress(&self, what: TaskId, progress: Progress) {
        self.post(move |l| l.on_progress(what, progress));
    }

    fn on_error(&self, what: TaskId, error: RequestError) {
        self.post(move |l| l.on_error(what, error));
    }

    fn on_finish(&self, what: TaskId, path: PathBuf) {
        self.post(move |l| l.on_finish(what, path));
    }

    fn on_cancel(&self, what: TaskId) {
        self.post(move |l| l.on_cancel(what));
    }
}
