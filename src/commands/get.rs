//! `fetchq get`: fetch URLs through the cache and print their bodies.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use fetchq_core::{
    CacheStore, MemoryCacheStore, Request, RequestOptions, Response, ResponseListener,
    SqliteCacheStore, StringParser, TaskId,
};
use tokio::sync::mpsc::{self, UnboundedSender};
use tracing::{debug, info};

use super::{Outcome, RunSummary, Settings, TaskEvent, build_engine, track};
use crate::cli::GetArgs;

#[derive(Debug)]
struct Fetched {
    status: Option<u16>,
    from_cache: bool,
    elapsed: Duration,
    body: String,
}

/// Forwards each terminal callback to the command loop.
struct BodyListener {
    events: UnboundedSender<TaskEvent<Fetched>>,
}

impl BodyListener {
    fn forward(&self, what: TaskId, response: Response<String>) {
        let status = response.status;
        let from_cache = response.from_cache;
        let elapsed = response.elapsed;
        let outcome = match response.into_result() {
            Ok(body) => Outcome::Done(Fetched {
                status,
                from_cache,
                elapsed,
                body,
            }),
            Err(error) => Outcome::Failed(error),
        };
        let _ = self.events.send(TaskEvent { what, outcome });
    }
}

impl ResponseListener<String> for BodyListener {
    fn on_start(&self, what: TaskId) {
        debug!(task_id = %what, "request started");
    }

    fn on_success(&self, what: TaskId, response: Response<String>) {
        self.forward(what, response);
    }

    fn on_error(&self, what: TaskId, response: Response<String>) {
        self.forward(what, response);
    }

    fn on_cancel(&self, what: TaskId) {
        let _ = self.events.send(TaskEvent {
            what,
            outcome: Outcome::Cancelled,
        });
    }
}

pub async fn run_get_command(args: GetArgs, settings: &Settings) -> Result<RunSummary> {
    let cache: Arc<dyn CacheStore> = match args.cache_db.as_ref().or(settings.cache_db.as_ref()) {
        Some(path) => Arc::new(
            SqliteCacheStore::open(path)
                .await
                .with_context(|| format!("Failed to open cache database '{}'", path.display()))?,
        ),
        None => Arc::new(MemoryCacheStore::new()),
    };

    let engine = build_engine(settings, cache)?;
    engine.start()?;

    let (events_tx, mut events) = mpsc::unbounded_channel();
    let listener: Arc<dyn ResponseListener<String>> = Arc::new(BodyListener { events: events_tx });
    let options = RequestOptions {
        priority: args.priority,
        cache_mode: args.cache_mode,
        ..RequestOptions::default()
    };
    let with_headers = args.urls.len() > 1;

    let submit = |url: &str| {
        let mut request = Request::get(url, StringParser);
        request.options = RequestOptions {
            cache_key: Some(url.to_string()),
            ..options.clone()
        };
        engine.submit_request(request, Arc::clone(&listener))
    };
    let print = |url: &str, fetched: Fetched| {
        info!(
            url,
            status = ?fetched.status,
            from_cache = fetched.from_cache,
            elapsed_ms = fetched.elapsed.as_millis(),
            bytes = fetched.body.len(),
            "Fetched"
        );
        if with_headers {
            println!("==> {url} <==");
        }
        print!("{}", fetched.body);
        if !fetched.body.ends_with('\n') {
            println!();
        }
    };

    let summary = track(
        &engine,
        &mut events,
        &args.urls,
        &settings.retry_policy(),
        submit,
        print,
    )
    .await;
    engine.stop().await;
    summary
}
