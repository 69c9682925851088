//! Task dispatch: queue, workers, cancellation and callback delivery.

mod delivery;
mod engine;
mod job;
mod queue;
mod registry;

pub use delivery::{Delivery, DeliveryReceiver};
pub use engine::{EngineError, TaskEngine};
