//! Ordered hand-off of listener callbacks to a consumer context.
//!
//! Workers never invoke listeners directly. They post closures to a
//! [`Delivery`]; a single consumer runs them in posting order. Callbacks
//! posted by one worker for one task therefore arrive in order, and posting
//! never blocks the worker.

use std::fmt;
use std::panic::AssertUnwindSafe;

use tokio::sync::mpsc;
use tracing::{debug, warn};

type Callback = Box<dyn FnOnce() + Send + 'static>;

/// Posting side of the callback channel. Cheap to clone.
#[derive(Clone)]
pub struct Delivery {
    sender: Option<mpsc::UnboundedSender<Callback>>,
}

impl Delivery {
    /// Creates a channel-backed delivery and its consumer.
    #[must_use]
    pub fn channel() -> (Self, DeliveryReceiver) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self {
                sender: Some(sender),
            },
            DeliveryReceiver { receiver },
        )
    }

    /// Delivery that runs each callback immediately on the posting task.
    #[must_use]
    pub fn inline() -> Self {
        Self { sender: None }
    }

    /// Posts a callback. Returns false if the consumer has gone away, in
    /// which case the callback is dropped.
    pub fn post<F>(&self, callback: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        match &self.sender {
            Some(sender) => {
                let sent = sender.send(Box::new(callback)).is_ok();
                if !sent {
                    debug!("delivery consumer closed; dropping callback");
                }
                sent
            }
            None => {
                invoke(Box::new(callback));
                true
            }
        }
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("inline", &self.sender.is_none())
            .finish()
    }
}

/// Consuming side of a channel [`Delivery`].
#[derive(Debug)]
pub struct DeliveryReceiver {
    receiver: mpsc::UnboundedReceiver<Callback>,
}

impl DeliveryReceiver {
    /// Runs callbacks in order until every [`Delivery`] clone is dropped.
    pub async fn run(mut self) {
        while let Some(callback) = self.receiver.recv().await {
            invoke(callback);
        }
        debug!("delivery consumer finished");
    }

    /// Runs every callback that is ready now, without waiting. Returns how
    /// many ran. For callers that drive delivery from their own loop.
    pub fn drain_ready(&mut self) -> usize {
        let mut ran = 0;
        while let Ok(callback) = self.receiver.try_recv() {
            invoke(callback);
            ran += 1;
        }
        ran
    }
}

fn invoke(callback: Callback) {
    if std::panic::catch_unwind(AssertUnwindSafe(callback)).is_err() {
        warn!("listener callback panicked; continuing with next callback");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[tokio::test]
    async fn test_channel_preserves_posting_order() {
        let (delivery, receiver) = Delivery::channel();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..100 {
            let seen = Arc::clone(&seen);
            assert!(delivery.post(move || seen.lock().unwrap().push(i)));
        }
        drop(delivery);
        receiver.run().await;
        assert_eq!(*seen.lock().unwrap(), (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_inline_runs_immediately() {
        let delivery = Delivery::inline();
        let seen = Arc::new(Mutex::new(0));
        let inner = Arc::clone(&seen);
        delivery.post(move || *inner.lock().unwrap() += 1);
        assert_eq!(*seen.lock().unwrap(), 1);
    }

    #[test]
    fn test_post_after_consumer_dropped_returns_false() {
        let (delivery, receiver) = Delivery::channel();
        drop(receiver);
        assert!(!delivery.post(|| {}));
    }

    #[test]
    fn test_panicking_callback_does_not_stop_consumer() {
        let (delivery, mut receiver) = Delivery::channel();
        let seen = Arc::new(Mutex::new(false));
        let inner = Arc::clone(&seen);
        delivery.post(|| panic!("listener bug"));
        delivery.post(move || *inner.lock().unwrap() = true);
        assert_eq!(receiver.drain_ready(), 2);
        assert!(*seen.lock().unwrap());
    }
}
