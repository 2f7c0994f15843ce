//! Server-side per-peer flow statistics window.
//!
//! A [`PeerFlow`] accumulates what one source endpoint sent during the current
//! reporting window: the sequence numbers seen, their arrival times (in receipt
//! order, aligned 1:1 with the sequences), and the byte count. Closing the
//! window computes bandwidth, span-inferred loss, and arrival jitter, then
//! clears the accumulators and starts a new window.

use crate::metrics::{arrival_jitter_ms, bandwidth_mbps, elapsed_secs, span_loss_percent, WindowMetrics};
use crate::report_timer::ReportTimer;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct PeerFlow {
    sequences: Vec<u32>,
    arrivals: Vec<Instant>,
    bytes: u64,
    timer: ReportTimer,
    last_seen: Instant,
}

impl PeerFlow {
    /// Creates an empty flow whose first window starts at `now`.
    pub fn new(interval: Duration, now: Instant) -> Self {
        Self {
            sequences: Vec::new(),
            arrivals: Vec::new(),
            bytes: 0,
            timer: ReportTimer::new(interval, now),
            last_seen: now,
        }
    }

    /// Adds one received datagram to the current window.
    pub fn record(&mut self, sequence: u32, len: usize, now: Instant) {
        self.sequences.push(sequence);
        self.arrivals.push(now);
        self.bytes += len as u64;
        self.last_seen = now;
    }

    pub fn len(&self) -> usize {
        self.sequences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequences.is_empty()
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn sequences(&self) -> &[u32] {
        &self.sequences
    }

    pub fn window_start(&self) -> Instant {
        self.timer.last_report()
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.timer.is_due(now)
    }

    /// How long since this flow last delivered a datagram.
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_seen)
    }

    /// Closes the window at `now` and starts a new one.
    ///
    /// Returns `None` when the window holds no datagrams. The accumulators are
    /// reset either way.
    pub fn close_window(&mut self, now: Instant, expected_interval: Duration) -> Option<WindowMetrics> {
        let elapsed = elapsed_secs(self.timer.restart(now));

        let metrics = span_loss_percent(&self.sequences).map(|loss| WindowMetrics {
            bandwidth_mbps: Some(bandwidth_mbps(self.bytes, elapsed)),
            loss_percent: Some(loss),
            jitter_ms: Some(arrival_jitter_ms(&self.arrivals, expected_interval)),
        });

        self.sequences.clear();
        self.arrivals.clear();
        self.bytes = 0;

        metrics
    }
}
