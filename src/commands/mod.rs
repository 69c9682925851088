//! CLI command handlers and the settings and task tracking they share.

mod config;
mod download;
mod get;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use futures_util::future::BoxFuture;
use futures_util::stream::FuturesUnordered;
use futures_util::{FutureExt, StreamExt};
use fetchq_core::config::DEFAULT_CONCURRENCY;
use fetchq_core::{
    CacheStore, Downloader, EngineConfig, EngineError, NetworkExecutor, RequestError,
    RequestExecutor, ReqwestExecutor, RetryDecision, RetryPolicy, TaskEngine, TaskId,
    classify_error,
};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, error, warn};

use crate::app_config::FileConfig;
use crate::cli::Args;

pub use config::run_config_show_command;
pub use download::run_download_command;
pub use get::run_get_command;

/// Retries after the first attempt when neither flag nor file sets one.
pub const DEFAULT_MAX_RETRIES: u8 = 2;

/// Effective settings: CLI flags, then the config file, then defaults.
#[derive(Debug, Clone)]
pub struct Settings {
    pub engine: EngineConfig,
    pub max_retries: u8,
    pub output_dir: PathBuf,
    pub cache_db: Option<PathBuf>,
    /// Hides progress bars.
    pub quiet: bool,
}

impl Settings {
    pub fn resolve(args: &Args, file: &FileConfig) -> Self {
        let mut engine = EngineConfig::default();
        engine.concurrency = args
            .concurrency
            .or(file.concurrency)
            .map_or(DEFAULT_CONCURRENCY, usize::from);
        if let Some(secs) = file.connect_timeout_secs {
            engine.connect_timeout_secs = secs;
        }
        if let Some(secs) = file.read_timeout_secs {
            engine.read_timeout_secs = secs;
        }
        if let Some(user_agent) = &file.user_agent {
            engine.user_agent.clone_from(user_agent);
        }
        Self {
            engine,
            max_retries: args
                .max_retries
                .or(file.max_retries)
                .unwrap_or(DEFAULT_MAX_RETRIES),
            output_dir: file
                .output_dir
                .clone()
                .unwrap_or_else(|| PathBuf::from(".")),
            cache_db: file.cache_db.clone(),
            quiet: args.quiet,
        }
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::with_max_attempts(u32::from(self.max_retries) + 1)
    }
}

fn build_engine(settings: &Settings, cache: Arc<dyn CacheStore>) -> Result<TaskEngine> {
    let network: Arc<dyn NetworkExecutor> = Arc::new(
        ReqwestExecutor::from_config(&settings.engine).context("Failed to build HTTP client")?,
    );
    let executor = RequestExecutor::new(Arc::clone(&network), cache);
    let engine = TaskEngine::new(settings.engine.clone(), executor, Downloader::new(network))?;
    Ok(engine)
}

/// How one attempt ended, as reported by a listener.
#[derive(Debug)]
enum Outcome<T> {
    Done(T),
    Failed(RequestError),
    Cancelled,
}

#[derive(Debug)]
struct TaskEvent<T> {
    what: TaskId,
    outcome: Outcome<T>,
}

/// Totals for one command run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub retried: usize,
}

impl RunSummary {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.cancelled == 0
    }
}

/// Submits every URL and waits until each reaches a terminal state.
///
/// Transient failures are resubmitted as fresh tasks while the retry policy
/// allows, after a backoff that keeps other events flowing. Ctrl-C cancels
/// everything still live and drops pending retries, which count as cancelled.
async fn track<T, S, D>(
    engine: &TaskEngine,
    events: &mut UnboundedReceiver<TaskEvent<T>>,
    urls: &[String],
    policy: &RetryPolicy,
    mut submit: S,
    mut on_done: D,
) -> Result<RunSummary>
where
    S: FnMut(&str) -> Result<TaskId, EngineError>,
    D: FnMut(&str, T),
{
    let mut live: HashMap<TaskId, (String, u32)> = HashMap::new();
    for url in urls {
        let id = submit(url)?;
        live.insert(id, (url.clone(), 1));
    }

    let mut summary = RunSummary::default();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interrupted = false;
    let mut backoff: FuturesUnordered<BoxFuture<'static, (String, u32)>> =
        FuturesUnordered::new();

    while !live.is_empty() || !backoff.is_empty() {
        tokio::select! {
            signal = &mut ctrl_c, if !interrupted => {
                interrupted = true;
                if signal.is_ok() {
                    let count = engine.cancel_all();
                    warn!(
                        count,
                        pending_retries = backoff.len(),
                        "Interrupted; cancelling live tasks"
                    );
                }
                summary.cancelled += backoff.len();
                backoff = FuturesUnordered::new();
            }
            Some((url, attempt)) = backoff.next(), if !backoff.is_empty() => {
                let id = submit(&url)?;
                live.insert(id, (url, attempt));
            }
            event = events.recv(), if !live.is_empty() => {
                let Some(event) = event else {
                    break;
                };
                let Some((url, attempt)) = live.remove(&event.what) else {
                    debug!(task_id = %event.what, "event for untracked task");
                    continue;
                };
                match event.outcome {
                    Outcome::Done(value) => {
                        summary.succeeded += 1;
                        on_done(&url, value);
                    }
                    Outcome::Cancelled => summary.cancelled += 1,
                    Outcome::Failed(failure) => {
                        let decision = if interrupted {
                            RetryDecision::DoNotRetry {
                                reason: "interrupted".to_string(),
                            }
                        } else {
                            policy.should_retry(classify_error(&failure), attempt)
                        };
                        match decision {
                            RetryDecision::Retry { delay, attempt } => {
                                warn!(
                                    url = %url,
                                    error = %failure,
                                    attempt,
                                    delay_ms = delay.as_millis(),
                                    "Retrying"
                                );
                                let wait = tokio::time::sleep(delay);
                                backoff.push(wait.map(move |()| (url, attempt)).boxed());
                                summary.retried += 1;
                            }
                            RetryDecision::DoNotRetry { reason } => {
                                error!(
                                    url = %url,
                                    kind = %failure.kind(),
                                    error = %failure,
                                    reason = %reason,
                                    "Failed"
                                );
                                summary.failed += 1;
                            }
                        }
                    }
                }
            }
            else => break,
        }
    }
    Ok(summary)
}
