//! The task engine: a fixed pool of workers draining a priority queue.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::FutureExt;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use super::delivery::{Delivery, DeliveryReceiver};
use super::job::{DownloadJob, Job, RequestJob, Services};
use super::queue::{DispatchQueue, QueueEntry};
use super::registry::ListenerRegistry;
use crate::config::{ConfigError, EngineConfig};
use crate::download::{DownloadListener, DownloadRequest, Downloader};
use crate::executor::RequestExecutor;
use crate::request::{Priority, Request, ResponseListener, ResponseParser, TaskId};

/// Engine lifecycle errors.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The configuration failed validation.
    #[error("invalid engine configuration: {0}")]
    Config(#[from] ConfigError),

    /// The engine was stopped; no further tasks are accepted.
    #[error("engine has been stopped")]
    Stopped,

    /// `start` was called outside a tokio runtime.
    #[error("engine must be started from within a tokio runtime")]
    NoRuntime,
}

/// Executes submitted requests and downloads with bounded concurrency.
///
/// Tasks are dequeued by priority, then submission order. Every listener
/// callback is posted through a [`Delivery`], so callbacks run on a single
/// consumer rather than on the workers.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use fetchq_core::{
///     EngineConfig, MemoryCacheStore, Downloader, Request, RequestExecutor,
///     ReqwestExecutor, Response, ResponseListener, StringParser, TaskEngine, TaskId,
/// };
///
/// struct Print;
///
/// impl ResponseListener<String> for Print {
///     fn on_success(&self, what: TaskId, response: Response<String>) {
///         println!("{what}: {} bytes", response.get().map_or(0, String::len));
///     }
///     fn on_error(&self, what: TaskId, response: Response<String>) {
///         eprintln!("{what}: {:?}", response.error());
///     }
/// }
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = EngineConfig::default();
/// let network = Arc::new(ReqwestExecutor::from_config(&config)?);
/// let executor = RequestExecutor::new(network.clone(), Arc::new(MemoryCacheStore::new()));
/// let engine = TaskEngine::new(config, executor, Downloader::new(network))?;
/// engine.start()?;
/// engine.submit_request(Request::get("https://example.com", StringParser), Arc::new(Print))?;
/// engine.stop().await;
/// # Ok(())
/// # }
/// ```
pub struct TaskEngine {
    config: EngineConfig,
    services: Arc<Services>,
    queue: Arc<DispatchQueue>,
    registry: Arc<ListenerRegistry>,
    delivery: Delivery,
    receiver: Mutex<Option<DeliveryReceiver>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    consumer: Mutex<Option<JoinHandle<()>>>,
    next_sequence: AtomicU64,
}

impl TaskEngine {
    /// Creates an engine whose callbacks are delivered by a consumer task
    /// spawned in [`start`](Self::start).
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Config`] if `config` is invalid.
    pub fn new(
        config: EngineConfig,
        executor: RequestExecutor,
        downloader: Downloader,
    ) -> Result<Self, EngineError> {
        let (delivery, receiver) = Delivery::channel();
        let mut engine = Self::with_delivery(config, executor, downloader, delivery)?;
        engine.receiver = Mutex::new(Some(receiver));
        Ok(engine)
    }

    /// Creates an engine that posts callbacks to a caller-owned `delivery`.
    ///
    /// The caller is responsible for running the matching
    /// [`DeliveryReceiver`], or passes [`Delivery::inline`].
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Config`] if `config` is invalid.
    pub fn with_delivery(
        config: EngineConfig,
        executor: RequestExecutor,
        downloader: Downloader,
        delivery: Delivery,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self {
            config,
            services: Arc::new(Services {
                executor,
                downloader,
            }),
            queue: Arc::new(DispatchQueue::new()),
            registry: Arc::new(ListenerRegistry::new()),
            delivery,
            receiver: Mutex::new(None),
            workers: Mutex::new(Vec::new()),
            consumer: Mutex::new(None),
            next_sequence: AtomicU64::new(0),
        })
    }

    /// Spawns the workers (and the delivery consumer, if owned).
    ///
    /// Tasks submitted before `start` wait in the queue. Calling `start`
    /// again is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Stopped`] after [`stop`](Self::stop), or
    /// [`EngineError::NoRuntime`] outside a tokio runtime.
    #[instrument(skip(self), fields(concurrency = self.config.concurrency))]
    pub fn start(&self) -> Result<(), EngineError> {
        if self.queue.is_closed() {
            return Err(EngineError::Stopped);
        }
        let handle = Handle::try_current().map_err(|_| EngineError::NoRuntime)?;

        let mut workers = lock(&self.workers);
        if !workers.is_empty() {
            debug!("engine already started");
            return Ok(());
        }

        if let Some(receiver) = lock(&self.receiver).take() {
            *lock(&self.consumer) = Some(handle.spawn(receiver.run()));
        }

        for index in 0..self.config.concurrency {
            workers.push(handle.spawn(worker_loop(
                index,
                Arc::clone(&self.queue),
                Arc::clone(&self.registry),
                Arc::clone(&self.services),
                self.delivery.clone(),
            )));
        }
        info!(workers = workers.len(), "engine started");
        Ok(())
    }

    /// Queues a request. Returns the id carried by every callback.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Stopped`] after [`stop`](Self::stop).
    pub fn submit_request<P: ResponseParser>(
        &self,
        request: Request<P>,
        listener: Arc<dyn ResponseListener<P::Output>>,
    ) -> Result<TaskId, EngineError> {
        let priority = request.options.priority;
        self.enqueue(priority, Arc::new(RequestJob::new(request, listener)))
    }

    /// Queues a download. Returns the id carried by every callback.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Stopped`] after [`stop`](Self::stop).
    pub fn submit_download(
        &self,
        request: DownloadRequest,
        listener: Arc<dyn DownloadListener>,
    ) -> Result<TaskId, EngineError> {
        let priority = request.priority;
        self.enqueue(priority, Arc::new(DownloadJob::new(request, listener)))
    }

    fn enqueue(&self, priority: Priority, job: Arc<dyn Job>) -> Result<TaskId, EngineError> {
        let sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let id = TaskId::new(sequence);
        let url = job.url().to_string();
        self.registry.insert(id, job);
        let entry = QueueEntry {
            priority,
            sequence,
            id,
        };
        if !self.queue.push(entry) {
            self.registry.remove(id);
            return Err(EngineError::Stopped);
        }
        debug!(task_id = %id, %priority, url = %url, "task queued");
        Ok(id)
    }

    /// Requests cancellation of one task. Returns false if the task already
    /// reached a terminal state or was never submitted.
    ///
    /// A queued task is skipped when dequeued and only gets `on_cancel`. A
    /// running task stops at its next checkpoint.
    pub fn cancel(&self, id: TaskId) -> bool {
        let found = self.registry.cancel(id);
        debug!(task_id = %id, found, "cancel requested");
        found
    }

    /// Cancels every live task carrying `tag`. Returns how many were flagged.
    pub fn cancel_by_tag(&self, tag: &str) -> usize {
        let count = self.registry.cancel_by_tag(tag);
        debug!(tag, count, "cancel by tag");
        count
    }

    /// Cancels every live task. Returns how many were flagged.
    pub fn cancel_all(&self) -> usize {
        let count = self.registry.cancel_all();
        debug!(count, "cancel all");
        count
    }

    /// Tasks waiting in the queue.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Tasks submitted and not yet terminal, queued or running.
    #[must_use]
    pub fn live(&self) -> usize {
        self.registry.len()
    }

    /// Stops the engine.
    ///
    /// Pending tasks are discarded without callbacks. Running tasks finish
    /// and deliver their callbacks before this returns. Further submissions
    /// fail with [`EngineError::Stopped`].
    #[instrument(skip(self))]
    pub async fn stop(&self) {
        let discarded = self.queue.close();
        for entry in &discarded {
            self.registry.remove(entry.id);
        }
        if !discarded.is_empty() {
            info!(count = discarded.len(), "discarded pending tasks");
        }

        let workers: Vec<JoinHandle<()>> = std::mem::take(&mut *lock(&self.workers));
        for worker in workers {
            if let Err(error) = worker.await {
                warn!(error = %error, "worker task ended abnormally");
            }
        }

        // Callbacks are consumed in order, so once this marker runs every
        // callback posted by the workers has been delivered.
        let owns_consumer = lock(&self.consumer).is_some();
        if owns_consumer {
            let (done_tx, done_rx) = tokio::sync::oneshot::channel::<()>();
            let posted = self.delivery.post(move || {
                let _ = done_tx.send(());
            });
            if posted && done_rx.await.is_err() {
                debug!("delivery consumer gone before flush marker ran");
            }
        }
        info!("engine stopped");
    }
}

impl Drop for TaskEngine {
    fn drop(&mut self) {
        // Idle workers exit; the consumer ends once their Delivery clones drop.
        self.queue.close();
    }
}

impl std::fmt::Debug for TaskEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskEngine")
            .field("config", &self.config)
            .field("pending", &self.queue.len())
            .field("live", &self.registry.len())
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[instrument(skip_all, fields(worker = index))]
async fn worker_loop(
    index: usize,
    queue: Arc<DispatchQueue>,
    registry: Arc<ListenerRegistry>,
    services: Arc<Services>,
    delivery: Delivery,
) {
    debug!("worker started");
    while let Some(entry) = queue.take().await {
        let id = entry.id;
        let Some(job) = registry.job(id) else {
            warn!(task_id = %id, "dequeued task has no registry entry");
            continue;
        };

        if job.cancel_flag().is_cancelled() {
            debug!(task_id = %id, url = %job.url(), "skipping cancelled task");
            job.post_cancel(id, &delivery);
        } else {
            debug!(task_id = %id, priority = %entry.priority, url = %job.url(), "task started");
            let run = std::panic::AssertUnwindSafe(job.run(id, &services, &delivery));
            if run.catch_unwind().await.is_err() {
                warn!(task_id = %id, "task panicked; reporting it as failed");
                job.post_failure(id, &delivery);
            }
        }
        registry.remove(id);
    }
    debug!("worker exiting");
}
