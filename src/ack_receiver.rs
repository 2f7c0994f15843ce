//! Client-side acknowledgement tracking for ack mode.
//!
//! The sender registers every datagram it puts on the wire; the
//! [`AckReceiver`] owns that pending table. After each send it drains whatever
//! acknowledgements are already queued on the socket without waiting, turning
//! each matched ack into a round-trip sample. When the reporting window closes,
//! pending entries older than the ack timeout are counted as lost and evicted.
//!
//! Round-trip times are measured entirely on the client's clock (send instant
//! to ack receipt instant). The server timestamp carried in the ack is not
//! used, so clock skew between the hosts does not enter the measurement.

use crate::metrics::{bandwidth_mbps, elapsed_secs, rtt_jitter_ms, WindowMetrics};
use crate::report_timer::ReportTimer;
use crate::udp_packet::{Ack, ACK_SIZE};
use log::{debug, warn};
use std::collections::HashMap;
use std::io;
use std::time::{Duration, Instant};

/// Zero-timeout receive: returns immediately whether or not a datagram is queued.
///
/// `Ok(None)` means nothing is available right now. That is the normal way a
/// drain ends, not an error.
pub trait NonBlockingRecv {
    fn recv_now(&self, buf: &mut [u8]) -> io::Result<Option<usize>>;
}

impl NonBlockingRecv for tokio::net::UdpSocket {
    fn recv_now(&self, buf: &mut [u8]) -> io::Result<Option<usize>> {
        match self.try_recv(buf) {
            Ok(n) => Ok(Some(n)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Pending-send table plus the current window's ack statistics
#[derive(Debug)]
pub struct AckReceiver {
    pending: HashMap<u32, Instant>,
    rtts: Vec<Duration>,
    acked: u64,
    datagram_size: usize,
    ack_timeout: Duration,
    timer: ReportTimer,
    total_acked: u64,
    total_lost: u64,
}

impl AckReceiver {
    /// Creates a receiver whose first window starts at `now`.
    ///
    /// # Arguments
    ///
    /// * `datagram_size` - Size of each sent datagram, used for bandwidth
    /// * `interval` - Reporting window length
    /// * `ack_timeout` - Age after which an unacknowledged send counts as lost
    pub fn new(datagram_size: usize, interval: Duration, ack_timeout: Duration, now: Instant) -> Self {
        Self {
            pending: HashMap::new(),
            rtts: Vec::new(),
            acked: 0,
            datagram_size,
            ack_timeout,
            timer: ReportTimer::new(interval, now),
            total_acked: 0,
            total_lost: 0,
        }
    }

    /// Records a datagram that was just sent.
    pub fn register_send(&mut self, sequence: u32, sent_at: Instant) {
        self.pending.insert(sequence, sent_at);
    }

    /// Matches an ack against the pending table.
    ///
    /// Acks for sequences that were never sent, already acked, or already
    /// timed out are ignored and return `false`.
    pub fn on_ack(&mut self, ack: &Ack, received_at: Instant) -> bool {
        let Some(sent_at) = self.pending.remove(&ack.sequence) else {
            debug!("Ignoring ack for sequence {} (not pending)", ack.sequence);
            return false;
        };

        self.rtts.push(received_at.saturating_duration_since(sent_at));
        self.acked += 1;
        self.total_acked += 1;
        true
    }

    /// Processes every ack already queued on `source`, without blocking.
    ///
    /// Returns the number of acks that matched a pending send. A receive error
    /// is logged and ends the drain; the next drain tries again.
    pub fn drain<R: NonBlockingRecv + ?Sized>(&mut self, source: &R) -> usize {
        let mut buf = [0u8; ACK_SIZE * 4];
        let mut matched = 0;

        loop {
            match source.recv_now(&mut buf) {
                Ok(Some(n)) => match Ack::from_bytes(&buf[..n]) {
                    Some(ack) => {
                        if self.on_ack(&ack, Instant::now()) {
                            matched += 1;
                        }
                    }
                    None => debug!("Dropping {}-byte reply that is not an ack", n),
                },
                Ok(None) => break,
                Err(e) => {
                    warn!("Error receiving ack: {}", e);
                    break;
                }
            }
        }

        matched
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.timer.is_due(now)
    }

    /// Sweeps timed-out sends and closes the window at `now`.
    ///
    /// Returns `None` when no send was acked or lost during the window.
    pub fn close_window(&mut self, now: Instant) -> Option<WindowMetrics> {
        let elapsed = elapsed_secs(self.timer.restart(now));
        let newly_lost = self.sweep_expired(now);
        let considered = self.acked + newly_lost;

        let metrics = (considered > 0).then(|| {
            let acked_bytes = self.acked * self.datagram_size as u64;
            WindowMetrics {
                bandwidth_mbps: Some(bandwidth_mbps(acked_bytes, elapsed)),
                loss_percent: Some(newly_lost as f64 / considered as f64 * 100.0),
                jitter_ms: Some(rtt_jitter_ms(&self.rtts)),
            }
        });

        self.rtts.clear();
        self.acked = 0;

        metrics
    }

    fn sweep_expired(&mut self, now: Instant) -> u64 {
        let timeout = self.ack_timeout;
        let before = self.pending.len();
        self.pending
            .retain(|_, sent_at| now.saturating_duration_since(*sent_at) < timeout);

        let lost = (before - self.pending.len()) as u64;
        self.total_lost += lost;
        lost
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn total_acked(&self) -> u64 {
        self.total_acked
    }

    pub fn total_lost(&self) -> u64 {
        self.total_lost
    }
}
