//! Network collaborators: connection capability, reqwest executor, reachability.

mod client;
mod connection;
mod monitor;

pub use client::ReqwestExecutor;
pub use connection::{BodyStream, Connection, HttpRequest, NetworkExecutor, TransportError};
pub use monitor::{AssumeOnline, NetworkMonitor};
