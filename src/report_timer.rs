//! Per-flow reporting window timer.
//!
//! Each tracked flow owns one [`ReportTimer`]. The enclosing loop asks whether
//! the window is due and, when it is, closes the window and restarts the timer.
//! Timers never look at each other, so one flow closing its window has no
//! effect on any other flow.
//!
//! [`ByteWindow`] pairs a timer with a byte count for the bandwidth-only
//! reports of the UDP send side and the TCP test.

use crate::metrics::{bandwidth_mbps, elapsed_secs, WindowMetrics};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct ReportTimer {
    interval: Duration,
    last_report: Instant,
}

impl ReportTimer {
    pub fn new(interval: Duration, now: Instant) -> Self {
        Self {
            interval,
            last_report: now,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Start of the current window
    pub fn last_report(&self) -> Instant {
        self.last_report
    }

    /// True once at least one full interval has passed since the last report.
    pub fn is_due(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_report) >= self.interval
    }

    /// Ends the current window at `now` and returns its length.
    pub fn restart(&mut self, now: Instant) -> Duration {
        let elapsed = now.saturating_duration_since(self.last_report);
        self.last_report = now;
        elapsed
    }
}

/// Byte counter for bandwidth-only windows (send side and TCP)
#[derive(Debug, Clone)]
pub struct ByteWindow {
    bytes: u64,
    timer: ReportTimer,
}

impl ByteWindow {
    pub fn new(interval: Duration, now: Instant) -> Self {
        Self {
            bytes: 0,
            timer: ReportTimer::new(interval, now),
        }
    }

    pub fn add(&mut self, n: usize) {
        self.bytes += n as u64;
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Closes the window if a full interval has passed.
    pub fn close_if_due(&mut self, now: Instant) -> Option<WindowMetrics> {
        self.timer.is_due(now).then(|| self.close(now))
    }

    /// Closes a partial window at the end of a run. `None` if nothing was counted.
    pub fn flush(&mut self, now: Instant) -> Option<WindowMetrics> {
        (self.bytes > 0).then(|| self.close(now))
    }

    fn close(&mut self, now: Instant) -> WindowMetrics {
        let elapsed = elapsed_secs(self.timer.restart(now));
        let metrics = WindowMetrics::bandwidth_only(bandwidth_mbps(self.bytes, elapsed));
        self.bytes = 0;
        metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_due_after_interval() {
        let start = Instant::now();
        let timer = ReportTimer::new(Duration::from_secs(1), start);

        assert!(!timer.is_due(start));
        assert!(!timer.is_due(start + Duration::from_millis(999)));
        assert!(timer.is_due(start + Duration::from_secs(1)));
    }

    #[test]
    fn test_restart_moves_window() {
        let start = Instant::now();
        let mut timer = ReportTimer::new(Duration::from_secs(1), start);

        let elapsed = timer.restart(start + Duration::from_millis(1500));
        assert_eq!(elapsed, Duration::from_millis(1500));
        assert_eq!(timer.last_report(), start + Duration::from_millis(1500));
        assert!(!timer.is_due(start + Duration::from_secs(2)));
    }

    #[test]
    fn test_clock_before_window_start_is_not_due() {
        let start = Instant::now() + Duration::from_secs(5);
        let timer = ReportTimer::new(Duration::from_secs(1), start);
        assert!(!timer.is_due(start - Duration::from_secs(2)));
    }

    #[test]
    fn test_byte_window() {
        let start = Instant::now();
        let mut window = ByteWindow::new(Duration::from_secs(1), start);
        window.add(125_000);

        assert!(window.close_if_due(start + Duration::from_millis(500)).is_none());
        let metrics = window.close_if_due(start + Duration::from_secs(1)).unwrap();
        assert!((metrics.bandwidth_mbps.unwrap() - 1.0).abs() < 1e-9);
        assert_eq!(metrics.loss_percent, None);
        assert_eq!(window.bytes(), 0);
    }

    #[test]
    fn test_byte_window_flushes_partial_window() {
        let start = Instant::now();
        let mut window = ByteWindow::new(Duration::from_secs(1), start);
        window.add(12_500);

        // 12.5 KB in a quarter second, before the interval is up
        let metrics = window.flush(start + Duration::from_millis(250)).unwrap();
        assert!((metrics.bandwidth_mbps.unwrap() - 0.4).abs() < 1e-9);
        assert!(window.flush(start + Duration::from_millis(300)).is_none());
    }
}
