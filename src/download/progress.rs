//! Throttled progress accounting for a streaming download.

use std::time::{Duration, Instant};

/// Minimum spacing between progress notifications when the percentage has
/// not changed.
pub const PROGRESS_INTERVAL: Duration = Duration::from_millis(300);

/// One progress notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    /// Completed percentage, 0 when the total length is unknown.
    pub percent: u8,
    /// Bytes present in the target file so far, including a resumed prefix.
    pub bytes: u64,
    /// Throughput over the window since the previous notification.
    pub bytes_per_sec: u64,
}

/// Decides when a progress notification is due.
///
/// A notification fires when the integer percentage changes or when
/// [`PROGRESS_INTERVAL`] has elapsed since the last one. Each notification
/// starts a new speed window.
#[derive(Debug)]
pub(crate) struct ProgressTracker {
    total: Option<u64>,
    bytes: u64,
    last_percent: u8,
    notified_bytes: u64,
    window_start: Instant,
    window_bytes: u64,
}

impl ProgressTracker {
    pub(crate) fn new(offset: u64, total: Option<u64>, now: Instant) -> Self {
        let mut tracker = Self {
            total,
            bytes: offset,
            last_percent: 0,
            notified_bytes: offset,
            window_start: now,
            window_bytes: 0,
        };
        tracker.last_percent = tracker.percent();
        tracker
    }

    pub(crate) fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Records `n` more bytes; returns a notification if one is due.
    pub(crate) fn advance(&mut self, n: u64, now: Instant) -> Option<Progress> {
        self.bytes = self.bytes.saturating_add(n);
        self.window_bytes = self.window_bytes.saturating_add(n);
        let percent = self.percent();
        let elapsed = now.saturating_duration_since(self.window_start);
        if percent != self.last_percent || elapsed >= PROGRESS_INTERVAL {
            Some(self.notify(percent, elapsed, now))
        } else {
            None
        }
    }

    /// Emits a final notification if bytes arrived since the last one.
    pub(crate) fn finish(&mut self, now: Instant) -> Option<Progress> {
        if self.bytes == self.notified_bytes {
            return None;
        }
        let percent = self.percent();
        let elapsed = now.saturating_duration_since(self.window_start);
        Some(self.notify(percent, elapsed, now))
    }

    fn notify(&mut self, percent: u8, elapsed: Duration, now: Instant) -> Progress {
        let elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX).max(1);
        let bytes_per_sec = self.window_bytes.saturating_mul(1000) / elapsed_ms;
        self.last_percent = percent;
        self.notified_bytes = self.bytes;
        self.window_start = now;
        self.window_bytes = 0;
        Progress {
            percent,
            bytes: self.bytes,
            bytes_per_sec,
        }
    }

    fn percent(&self) -> u8 {
        match self.total {
            Some(total) if total > 0 => {
                let pct = self.bytes.saturating_mul(100) / total;
                u8::try_from(pct.min(100)).unwrap_or(100)
            }
            _ => 0,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_change_notifies() {
        let start = Instant::now();
        let mut tracker = ProgressTracker::new(0, Some(1000), start);
        let progress = tracker.advance(10, start).unwrap();
        assert_eq!(progress.percent, 1);
        assert_eq!(progress.bytes, 10);
    }

    #[test]
    fn test_same_percent_within_interval_is_silent() {
        let start = Instant::now();
        let mut tracker = ProgressTracker::new(0, Some(1_000_000), start);
        assert!(tracker.advance(10, start + Duration::from_millis(50)).is_none());
        assert!(tracker.advance(10, start + Duration::from_millis(100)).is_none());
    }

    #[test]
    fn test_interval_elapsed_notifies_with_speed() {
        let start = Instant::now();
        let mut tracker = ProgressTracker::new(0, None, start);
        assert!(tracker.advance(100, start + Duration::from_millis(100)).is_none());
        let progress = tracker.advance(200, start + Duration::from_millis(300)).unwrap();
        assert_eq!(progress.percent, 0);
        assert_eq!(progress.bytes, 300);
        assert_eq!(progress.bytes_per_sec, 1000);
    }

    #[test]
    fn test_window_resets_after_notification() {
        let start = Instant::now();
        let mut tracker = ProgressTracker::new(0, None, start);
        tracker.advance(300, start + Duration::from_millis(300)).unwrap();
        let progress = tracker.advance(600, start + Duration::from_millis(900)).unwrap();
        assert_eq!(progress.bytes_per_sec, 1000);
    }

    #[test]
    fn test_resume_offset_counts_toward_bytes_and_percent() {
        let start = Instant::now();
        let mut tracker = ProgressTracker::new(500, Some(1000), start);
        assert_eq!(tracker.bytes(), 500);
        let progress = tracker.advance(100, start).unwrap();
        assert_eq!(progress.percent, 60);
        assert_eq!(progress.bytes, 600);
    }

    #[test]
    fn test_finish_reports_unreported_bytes_once() {
        let start = Instant::now();
        let mut tracker = ProgressTracker::new(0, Some(1_000_000), start);
        assert!(tracker.advance(5, start).is_none());
        let last = tracker.finish(start + Duration::from_millis(10)).unwrap();
        assert_eq!(last.bytes, 5);
        assert!(tracker.finish(start + Duration::from_millis(20)).is_none());
    }

    #[test]
    fn test_percent_never_exceeds_100() {
        let start = Instant::now();
        let mut tracker = ProgressTracker::new(0, Some(10), start);
        let progress = tracker.advance(50, start).unwrap();
        assert_eq!(progress.percent, 100);
    }
}
