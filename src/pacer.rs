//! Send pacing for fixed-size datagrams.
//!
//! The pacer turns a target rate into a fixed inter-datagram interval:
//!
//! ```text
//! interval = datagram_size * 8 / (rate_kbps * 1000)   seconds
//! ```
//!
//! Datagram `k` is due at `start + k * interval`. The sender sleeps until the
//! next deadline rather than for a fixed interval, so send time, ack draining
//! and timer overshoot never accumulate. A sender that falls behind sends
//! without sleeping until it is back on schedule.

use crate::{Error, Result};
use std::time::{Duration, Instant};

/// Fixed-interval pacer for a target rate.
///
/// # Examples
///
/// ```
/// use netmeter::pacer::Pacer;
///
/// // 1472-byte datagrams at 1000 Kbps: one every 11.776 ms
/// let pacer = Pacer::new(1000, 1472).unwrap();
/// assert!((pacer.interval().as_secs_f64() - 0.011776).abs() < 1e-9);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct Pacer {
    interval: Duration,
    interval_secs: f64,
}

impl Pacer {
    /// Creates a pacer for `rate_kbps` and `datagram_size` bytes per datagram.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for a zero rate, for which no interval exists.
    pub fn new(rate_kbps: u64, datagram_size: usize) -> Result<Self> {
        if rate_kbps == 0 {
            return Err(Error::Config("Send rate must be greater than 0 Kbps".to_string()));
        }

        let interval_secs = Self::interval_secs(rate_kbps, datagram_size);
        Ok(Self {
            interval: Duration::from_secs_f64(interval_secs),
            interval_secs,
        })
    }

    /// The raw interval formula in seconds. Undefined (infinite) for a zero rate.
    pub fn interval_secs(rate_kbps: u64, datagram_size: usize) -> f64 {
        (datagram_size as f64 * 8.0) / (rate_kbps as f64 * 1000.0)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// When the datagram after the first `sent` ones is due.
    ///
    /// Computed from `start` each time, so rounding never drifts the schedule.
    pub fn deadline(&self, start: Instant, sent: u64) -> Instant {
        start + Duration::from_secs_f64(sent as f64 * self.interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_zero_rate_rejected() {
        assert!(matches!(Pacer::new(0, 1472), Err(Error::Config(_))));
    }

    #[test]
    fn test_default_interval() {
        let pacer = Pacer::new(1000, 1472).unwrap();
        assert!((pacer.interval().as_secs_f64() - 0.011776).abs() < 1e-12);
    }

    #[test]
    fn test_deadlines_are_absolute() {
        let pacer = Pacer::new(1000, 1250).unwrap(); // 10 ms
        let start = Instant::now();

        assert_eq!(pacer.deadline(start, 0), start);
        assert_eq!(pacer.deadline(start, 1), start + Duration::from_millis(10));
        assert_eq!(pacer.deadline(start, 100), start + Duration::from_secs(1));
    }

    #[test]
    fn test_late_wakeups_do_not_lower_rate() {
        let pacer = Pacer::new(10_000, 1472).unwrap(); // 1.1776 ms
        let start = Instant::now();
        let run = Duration::from_secs(1);

        // Sleeps wake on the first whole millisecond after the deadline
        let mut now = start;
        let mut sent = 0u64;
        while now - start < run {
            sent += 1;
            let deadline = pacer.deadline(start, sent);
            if deadline > now {
                let ms = (deadline - start).as_millis() as u32 + 1;
                now = start + Duration::from_millis(1) * ms;
            }
        }

        let expected = run.as_secs_f64() / pacer.interval().as_secs_f64();
        assert!((sent as f64) >= expected * 0.98, "sent {} of ~{}", sent, expected);
        assert!((sent as f64) <= expected * 1.02 + 1.0, "sent {} of ~{}", sent, expected);
    }

    proptest! {
        /// interval == S * 8 / (R * 1000) for any positive rate and size
        #[test]
        fn prop_interval_formula(rate in 1u64..10_000_000, size in 4usize..65_507) {
            let expected = (size as f64 * 8.0) / (rate as f64 * 1000.0);
            prop_assert_eq!(Pacer::interval_secs(rate, size), expected);

            let pacer = Pacer::new(rate, size).unwrap();
            prop_assert!((pacer.interval().as_secs_f64() - expected).abs() <= 1e-9);

            // The k-th deadline stays on the ideal schedule
            let start = Instant::now();
            let offset = pacer.deadline(start, 1000) - start;
            prop_assert!((offset.as_secs_f64() - expected * 1000.0).abs() <= 1e-6);
        }
    }
}
