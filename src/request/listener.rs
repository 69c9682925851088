use super::{Response, TaskId};

/// Receives the lifecycle of a submitted request.
///
/// For a task that is dequeued and executed, the engine delivers `on_start`,
/// then exactly one of `on_success`, `on_error` or `on_cancel`, then
/// `on_finish`. A task cancelled before it was dequeued only gets `on_cancel`.
/// Callbacks run on the delivery consumer, never on a worker.
pub trait ResponseListener<T>: Send + Sync {
    /// The task was dequeued and is about to execute.
    fn on_start(&self, _what: TaskId) {}

    /// The request produced a parsed body.
    fn on_success(&self, what: TaskId, response: Response<T>);

    /// The request failed; `response.result` holds the error.
    fn on_error(&self, what: TaskId, response: Response<T>);

    /// The task was cancelled.
    fn on_cancel(&self, _what: TaskId) {}

    /// The task reached its terminal state after running.
    fn on_finish(&self, _what: TaskId) {}
}
