// Mock-based tests for the ack drain
// These tests feed the ack receiver from an in-memory source instead of a socket

use netmeter::ack_receiver::{AckReceiver, NonBlockingRecv};
use netmeter::udp_packet::Ack;
use std::collections::VecDeque;
use std::io;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// In-memory datagram source with an optional injected error
struct MockDatagramSource {
    queue: Mutex<VecDeque<Vec<u8>>>,
    error: Mutex<Option<io::Error>>,
    calls: Mutex<usize>,
}

impl MockDatagramSource {
    fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            error: Mutex::new(None),
            calls: Mutex::new(0),
        }
    }

    fn push(&self, datagram: Vec<u8>) {
        self.queue.lock().unwrap().push_back(datagram);
    }

    fn push_ack(&self, sequence: u32) {
        self.push(Ack::new(sequence, 1_700_000_000.0).to_bytes().to_vec());
    }

    fn set_error(&self, error: io::Error) {
        *self.error.lock().unwrap() = Some(error);
    }

    fn remaining(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

impl NonBlockingRecv for MockDatagramSource {
    fn recv_now(&self, buf: &mut [u8]) -> io::Result<Option<usize>> {
        *self.calls.lock().unwrap() += 1;

        if let Some(err) = self.error.lock().unwrap().take() {
            return Err(err);
        }

        match self.queue.lock().unwrap().pop_front() {
            Some(datagram) => {
                let n = buf.len().min(datagram.len());
                buf[..n].copy_from_slice(&datagram[..n]);
                Ok(Some(n))
            }
            None => Ok(None),
        }
    }
}

const SIZE: usize = 1472;
const INTERVAL: Duration = Duration::from_secs(1);

fn receiver_with_sends(start: Instant, sequences: std::ops::RangeInclusive<u32>) -> AckReceiver {
    let mut receiver = AckReceiver::new(SIZE, INTERVAL, INTERVAL, start);
    for seq in sequences {
        receiver.register_send(seq, start);
    }
    receiver
}

#[test]
fn test_drain_consumes_everything_queued() {
    let start = Instant::now();
    let mut receiver = receiver_with_sends(start, 1..=3);
    let source = MockDatagramSource::new();
    source.push_ack(1);
    source.push_ack(2);
    source.push_ack(3);

    assert_eq!(receiver.drain(&source), 3);
    assert_eq!(source.remaining(), 0);
    assert_eq!(receiver.pending_len(), 0);
    assert_eq!(receiver.total_acked(), 3);
}

#[test]
fn test_empty_source_ends_drain_immediately() {
    let start = Instant::now();
    let mut receiver = receiver_with_sends(start, 1..=1);
    let source = MockDatagramSource::new();

    assert_eq!(receiver.drain(&source), 0);
    assert_eq!(source.calls(), 1);
    assert_eq!(receiver.pending_len(), 1);
}

#[test]
fn test_short_replies_are_skipped() {
    let start = Instant::now();
    let mut receiver = receiver_with_sends(start, 1..=2);
    let source = MockDatagramSource::new();
    source.push(vec![0, 0, 0, 1]);
    source.push_ack(2);

    assert_eq!(receiver.drain(&source), 1);
    assert_eq!(receiver.pending_len(), 1);
}

#[test]
fn test_unknown_and_duplicate_acks_do_not_count() {
    let start = Instant::now();
    let mut receiver = receiver_with_sends(start, 1..=2);
    let source = MockDatagramSource::new();
    source.push_ack(1);
    source.push_ack(1);
    source.push_ack(42);

    assert_eq!(receiver.drain(&source), 1);
    assert_eq!(receiver.total_acked(), 1);
}

#[test]
fn test_receive_error_stops_drain_without_losing_queue() {
    let start = Instant::now();
    let mut receiver = receiver_with_sends(start, 1..=2);
    let source = MockDatagramSource::new();
    source.set_error(io::Error::new(io::ErrorKind::ConnectionRefused, "port unreachable"));
    source.push_ack(1);
    source.push_ack(2);

    assert_eq!(receiver.drain(&source), 0);
    assert_eq!(source.remaining(), 2);

    // The next drain picks up where the failed one stopped
    assert_eq!(receiver.drain(&source), 2);
    assert_eq!(receiver.pending_len(), 0);
}

#[test]
fn test_drained_acks_feed_the_window() {
    let start = Instant::now();
    let mut receiver = receiver_with_sends(start, 1..=4);
    let source = MockDatagramSource::new();
    for seq in 1..=3 {
        source.push_ack(seq);
    }
    receiver.drain(&source);

    let metrics = receiver.close_window(start + INTERVAL).unwrap();
    assert!((metrics.loss_percent.unwrap() - 25.0).abs() < 1e-9);
    assert!(metrics.bandwidth_mbps.unwrap() > 0.0);
    assert_eq!(receiver.total_lost(), 1);
}
