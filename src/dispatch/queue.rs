//! Priority queue shared by the workers.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Mutex;

use tokio::sync::Notify;

use crate::request::{Priority, TaskId};

/// A queued task reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct QueueEntry {
    pub(crate) priority: Priority,
    pub(crate) sequence: u64,
    pub(crate) id: TaskId,
}

impl Ord for QueueEntry {
    // Max-heap: higher priority first, then lower sequence first.
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Default)]
struct QueueState {
    heap: BinaryHeap<QueueEntry>,
    closed: bool,
}

/// Blocking priority queue. [`take`](Self::take) waits until an entry is
/// available or the queue is closed.
#[derive(Debug, Default)]
pub(crate) struct DispatchQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl DispatchQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Adds an entry. Returns false if the queue is closed.
    pub(crate) fn push(&self, entry: QueueEntry) -> bool {
        {
            let mut state = self.lock();
            if state.closed {
                return false;
            }
            state.heap.push(entry);
        }
        self.notify.notify_one();
        true
    }

    /// Removes the highest-ranked entry, waiting while the queue is empty.
    /// Returns `None` once the queue is closed.
    pub(crate) async fn take(&self) -> Option<QueueEntry> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut state = self.lock();
                if state.closed {
                    return None;
                }
                if let Some(entry) = state.heap.pop() {
                    return Some(entry);
                }
            }
            notified.await;
        }
    }

    /// Closes the queue, waking every waiter. Returns the entries that were
    /// still pending.
    pub(crate) fn close(&self) -> Vec<QueueEntry> {
        let pending = {
            let mut state = self.lock();
            state.closed = true;
            std::mem::take(&mut state.heap).into_sorted_vec()
        };
        self.notify.notify_waiters();
        pending
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().heap.len()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.lock().closed
    }
}
