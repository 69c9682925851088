use std::fmt::Debug;

/// Reports whether the network is reachable.
///
/// The downloader checks it before connecting and again when a transport
/// error occurs, to tell "offline" apart from other I/O failures.
pub trait NetworkMonitor: Send + Sync + Debug {
    /// Returns true when requests can be attempted.
    fn is_available(&self) -> bool;
}

/// Monitor for hosts without a connectivity signal. Always reports online.
#[derive(Debug, Clone, Copy, Default)]
pub struct AssumeOnline;

impl NetworkMonitor for AssumeOnline {
    fn is_available(&self) -> bool {
        true
    }
}
