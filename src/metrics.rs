//! Metrics records, the sink they are delivered to, and the window formulas.
//!
//! A closed statistics window produces a [`WindowMetrics`]; attaching a
//! timestamp and peer turns it into an immutable [`MetricsRecord`] which is
//! handed to a [`MetricsSink`].
//!
//! # Formulas
//!
//! - bandwidth (Mbps) = `bytes * 8 / (elapsed_secs * 1e6)`
//! - span loss (%) = `(1 - received / (max(seq) - min(seq) + 1)) * 100`
//! - arrival jitter (ms) = mean of `|gap - expected_interval|` over consecutive arrivals
//! - round-trip jitter (ms) = mean of `|rtt[i] - rtt[i-1]|` over consecutive samples
//!
//! Window lengths at or below [`MIN_ELAPSED_SECS`] are floored to it so a window
//! closed in the same instant it opened never divides by zero.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Smallest window length used as a divisor, in seconds
pub const MIN_ELAPSED_SECS: f64 = 1e-6;

/// Metrics computed from one closed window. Absent fields were not computable.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct WindowMetrics {
    pub bandwidth_mbps: Option<f64>,
    pub loss_percent: Option<f64>,
    pub jitter_ms: Option<f64>,
}

impl WindowMetrics {
    /// Bandwidth-only metrics, used by the send-side and TCP reports.
    pub fn bandwidth_only(bandwidth_mbps: f64) -> Self {
        Self {
            bandwidth_mbps: Some(bandwidth_mbps),
            ..Default::default()
        }
    }

    /// Stamps the metrics with the current wall-clock time and the peer they describe.
    pub fn into_record(self, peer: SocketAddr) -> MetricsRecord {
        MetricsRecord {
            timestamp: Utc::now(),
            peer,
            bandwidth_mbps: self.bandwidth_mbps,
            loss_percent: self.loss_percent,
            jitter_ms: self.jitter_ms,
        }
    }
}

/// One emitted measurement for one peer and one window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsRecord {
    pub timestamp: DateTime<Utc>,
    pub peer: SocketAddr,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bandwidth_mbps: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loss_percent: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jitter_ms: Option<f64>,
}

impl MetricsRecord {
    pub fn metrics(&self) -> WindowMetrics {
        WindowMetrics {
            bandwidth_mbps: self.bandwidth_mbps,
            loss_percent: self.loss_percent,
            jitter_ms: self.jitter_ms,
        }
    }
}

/// Receiver of closed-window records.
///
/// Implemented for any `Fn(MetricsRecord)` closure, so tests and embedders can
/// collect records without writing a type.
///
/// # Examples
///
/// ```
/// use netmeter::metrics::{MetricsRecord, MetricsSink};
/// use std::sync::{Arc, Mutex};
///
/// let seen = Arc::new(Mutex::new(Vec::new()));
/// let seen_clone = seen.clone();
/// let sink = move |record: MetricsRecord| seen_clone.lock().unwrap().push(record);
/// sink.summarize();
/// assert!(seen.lock().unwrap().is_empty());
/// ```
pub trait MetricsSink: Send + Sync {
    /// Called once per closed window.
    fn record(&self, record: MetricsRecord);

    /// Called once at the end of a run.
    fn summarize(&self) {}
}

impl<F> MetricsSink for F
where
    F: Fn(MetricsRecord) + Send + Sync,
{
    fn record(&self, record: MetricsRecord) {
        self(record)
    }
}

pub type SinkRef = Arc<dyn MetricsSink>;

/// Window length in seconds, floored at [`MIN_ELAPSED_SECS`].
pub fn elapsed_secs(window: Duration) -> f64 {
    window.as_secs_f64().max(MIN_ELAPSED_SECS)
}

pub fn bandwidth_mbps(bytes: u64, elapsed_secs: f64) -> f64 {
    (bytes as f64 * 8.0) / (elapsed_secs.max(MIN_ELAPSED_SECS) * 1_000_000.0)
}

/// Loss inferred from the observed sequence span.
///
/// Order does not matter, so reordered windows are handled. Returns `None` for
/// an empty window. Duplicated sequences could push the received count above
/// the span; the result is clamped at zero.
pub fn span_loss_percent(sequences: &[u32]) -> Option<f64> {
    let min = *sequences.iter().min()?;
    let max = *sequences.iter().max()?;
    let expected = (max - min) as f64 + 1.0;
    let received = sequences.len() as f64;
    Some(((1.0 - received / expected) * 100.0).max(0.0))
}

/// Mean deviation of arrival gaps from the pacing interval, in milliseconds.
///
/// `arrivals` must be in receipt order. Fewer than two arrivals yield 0.
pub fn arrival_jitter_ms(arrivals: &[Instant], expected_interval: Duration) -> f64 {
    if arrivals.len() < 2 {
        return 0.0;
    }

    let expected = expected_interval.as_secs_f64();
    let total: f64 = arrivals
        .windows(2)
        .map(|pair| {
            let gap = pair[1].saturating_duration_since(pair[0]).as_secs_f64();
            (gap - expected).abs()
        })
        .sum();

    total / (arrivals.len() - 1) as f64 * 1000.0
}

/// Mean absolute difference between consecutive round-trip samples, in milliseconds.
///
/// Fewer than two samples yield 0.
pub fn rtt_jitter_ms(rtts: &[Duration]) -> f64 {
    if rtts.len() < 2 {
        return 0.0;
    }

    let total: f64 = rtts
        .windows(2)
        .map(|pair| (pair[1].as_secs_f64() - pair[0].as_secs_f64()).abs())
        .sum();

    total / (rtts.len() - 1) as f64 * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_bandwidth() {
        // 10 datagrams of 1472 bytes in 10 ms
        assert!(approx(bandwidth_mbps(14_720, 0.01), 11.776));
        assert!(approx(bandwidth_mbps(125_000, 1.0), 1.0));
    }

    #[test]
    fn test_elapsed_floor() {
        assert_eq!(elapsed_secs(Duration::ZERO), MIN_ELAPSED_SECS);
        assert_eq!(elapsed_secs(Duration::from_secs(2)), 2.0);
        assert!(bandwidth_mbps(1, 0.0).is_finite());
    }

    #[test]
    fn test_span_loss_with_gap() {
        assert!(approx(span_loss_percent(&[1, 2, 4, 5]).unwrap(), 20.0));
    }

    #[test]
    fn test_span_loss_reordered() {
        assert!(approx(span_loss_percent(&[5, 1, 4, 2]).unwrap(), 20.0));
        assert_eq!(span_loss_percent(&[3, 2, 1]), Some(0.0));
    }

    #[test]
    fn test_span_loss_empty_and_single() {
        assert_eq!(span_loss_percent(&[]), None);
        assert_eq!(span_loss_percent(&[9]), Some(0.0));
    }

    #[test]
    fn test_span_loss_duplicates_clamped() {
        assert_eq!(span_loss_percent(&[1, 1, 2]), Some(0.0));
    }

    #[test]
    fn test_arrival_jitter_perfect_pacing() {
        let base = Instant::now();
        let step = Duration::from_millis(10);
        let arrivals: Vec<Instant> = (0..5).map(|i| base + step * i).collect();
        assert!(approx(arrival_jitter_ms(&arrivals, step), 0.0));
    }

    #[test]
    fn test_arrival_jitter_deviation() {
        let base = Instant::now();
        let arrivals = [
            base,
            base + Duration::from_millis(12),
            base + Duration::from_millis(20),
        ];
        // gaps 12 ms and 8 ms against 10 ms expected
        let jitter = arrival_jitter_ms(&arrivals, Duration::from_millis(10));
        assert!((jitter - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_jitter_needs_two_samples() {
        assert_eq!(arrival_jitter_ms(&[Instant::now()], Duration::from_millis(1)), 0.0);
        assert_eq!(arrival_jitter_ms(&[], Duration::from_millis(1)), 0.0);
        assert_eq!(rtt_jitter_ms(&[Duration::from_millis(3)]), 0.0);
    }

    #[test]
    fn test_rtt_jitter() {
        let rtts = [
            Duration::from_millis(10),
            Duration::from_millis(14),
            Duration::from_millis(12),
        ];
        assert!((rtt_jitter_ms(&rtts) - 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_closure_sink() {
        use std::sync::Mutex;

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let sink: SinkRef = Arc::new(move |record: MetricsRecord| {
            seen_clone.lock().unwrap().push(record);
        });

        let peer: SocketAddr = "127.0.0.1:5001".parse().unwrap();
        sink.record(WindowMetrics::bandwidth_only(1.5).into_record(peer));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].peer, peer);
        assert_eq!(seen[0].bandwidth_mbps, Some(1.5));
        assert_eq!(seen[0].loss_percent, None);
    }

    proptest! {
        /// Loss stays in [0, 100) for any non-empty set of distinct sequences
        #[test]
        fn prop_span_loss_bounded(seqs in proptest::collection::hash_set(1u32..100_000, 1..200)) {
            let seqs: Vec<u32> = seqs.into_iter().collect();
            let loss = span_loss_percent(&seqs).unwrap();
            prop_assert!(loss >= 0.0);
            prop_assert!(loss < 100.0);
        }

        /// Jitter is never negative
        #[test]
        fn prop_jitter_non_negative(
            gaps in proptest::collection::vec(0u64..50_000, 0..64),
            expected_us in 1u64..50_000,
        ) {
            let base = Instant::now();
            let mut at = base;
            let mut arrivals = vec![base];
            for gap in &gaps {
                at += Duration::from_micros(*gap);
                arrivals.push(at);
            }
            prop_assert!(arrival_jitter_ms(&arrivals, Duration::from_micros(expected_us)) >= 0.0);

            let rtts: Vec<Duration> = gaps.iter().map(|g| Duration::from_micros(*g)).collect();
            prop_assert!(rtt_jitter_ms(&rtts) >= 0.0);
        }
    }
}
