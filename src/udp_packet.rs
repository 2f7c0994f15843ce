//! Datagram and acknowledgement wire formats.
//!
//! Every test datagram starts with a 4-byte sequence number followed by filler
//! up to a fixed datagram size. Sequence 0 is reserved as the end-of-stream
//! sentinel; real data starts at 1.
//!
//! # Datagram Format
//!
//! ```text
//! ┌──────────────┬──────────────────────────────┐
//! │  Sequence    │   Filler ('X')               │
//! │  (4 bytes)   │   (datagram_size - 4 bytes)  │
//! └──────────────┴──────────────────────────────┘
//! ```
//!
//! # Acknowledgement Format (ack mode)
//!
//! ```text
//! ┌──────────────┬──────────────────────────────┐
//! │  Sequence    │  Server receive timestamp    │
//! │  (4 bytes)   │  (8 bytes, IEEE-754 f64)     │
//! └──────────────┴──────────────────────────────┘
//! ```
//!
//! All fields are big-endian. The timestamp is seconds since the UNIX epoch on
//! the server's wall clock; the client does not use it for round-trip timing.
//!
//! # Examples
//!
//! ```
//! use netmeter::udp_packet::{create_datagram, parse_sequence};
//!
//! let datagram = create_datagram(42, 1472);
//! assert_eq!(datagram.len(), 1472);
//! assert_eq!(parse_sequence(&datagram), Some(42));
//! ```

use std::time::{SystemTime, UNIX_EPOCH};

/// Size of the sequence header in bytes
pub const DATAGRAM_HEADER_SIZE: usize = 4;

/// Default datagram size (fits a 1500-byte Ethernet MTU after IPv4/UDP headers)
pub const DEFAULT_DATAGRAM_SIZE: usize = 1472;

/// Largest UDP payload over IPv4 (65535 - 8 byte UDP header - 20 byte IP header)
pub const MAX_DATAGRAM_SIZE: usize = 65507;

/// Size of an acknowledgement datagram in bytes
pub const ACK_SIZE: usize = 12;

/// End-of-stream marker
pub const SENTINEL_SEQUENCE: u32 = 0;

/// First sequence number assigned to a data datagram
pub const FIRST_SEQUENCE: u32 = 1;

const FILLER: u8 = b'X';

/// Creates a datagram carrying `sequence`, padded with filler to `size` bytes.
///
/// Sizes below the header size are rounded up so the sequence always fits.
pub fn create_datagram(sequence: u32, size: usize) -> Vec<u8> {
    let mut datagram = vec![FILLER; size.max(DATAGRAM_HEADER_SIZE)];
    set_sequence(&mut datagram, sequence);
    datagram
}

/// Overwrites the sequence header of an existing datagram buffer.
///
/// # Panics
///
/// Panics if `datagram` is shorter than [`DATAGRAM_HEADER_SIZE`].
pub fn set_sequence(datagram: &mut [u8], sequence: u32) {
    datagram[..DATAGRAM_HEADER_SIZE].copy_from_slice(&sequence.to_be_bytes());
}

/// Reads the sequence header. Returns `None` for datagrams too short to carry one.
pub fn parse_sequence(datagram: &[u8]) -> Option<u32> {
    let header = datagram.get(..DATAGRAM_HEADER_SIZE)?;
    Some(u32::from_be_bytes(header.try_into().ok()?))
}

/// Acknowledgement sent by the server for each datagram in ack mode
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ack {
    pub sequence: u32,
    /// Server receive time, seconds since the UNIX epoch
    pub server_timestamp: f64,
}

impl Ack {
    pub fn new(sequence: u32, server_timestamp: f64) -> Self {
        Self {
            sequence,
            server_timestamp,
        }
    }

    /// Serializes the ack (big-endian)
    pub fn to_bytes(&self) -> [u8; ACK_SIZE] {
        let mut bytes = [0u8; ACK_SIZE];
        bytes[0..4].copy_from_slice(&self.sequence.to_be_bytes());
        bytes[4..12].copy_from_slice(&self.server_timestamp.to_be_bytes());
        bytes
    }

    /// Deserializes an ack. Returns `None` if fewer than [`ACK_SIZE`] bytes are given.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < ACK_SIZE {
            return None;
        }

        let sequence = u32::from_be_bytes(bytes[0..4].try_into().ok()?);
        let server_timestamp = f64::from_be_bytes(bytes[4..12].try_into().ok()?);

        Some(Self {
            sequence,
            server_timestamp,
        })
    }
}

/// Current wall-clock time in seconds since the UNIX epoch.
///
/// A clock set before 1970 yields 0.0 rather than failing.
pub fn wall_clock_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_datagram_layout() {
        let datagram = create_datagram(0x01020304, 16);
        assert_eq!(datagram.len(), 16);
        assert_eq!(&datagram[..4], &[1, 2, 3, 4]);
        assert!(datagram[4..].iter().all(|&b| b == b'X'));
    }

    #[test]
    fn test_tiny_size_still_holds_header() {
        let datagram = create_datagram(7, 1);
        assert_eq!(datagram.len(), DATAGRAM_HEADER_SIZE);
        assert_eq!(parse_sequence(&datagram), Some(7));
    }

    #[test]
    fn test_set_sequence_reuses_buffer() {
        let mut datagram = create_datagram(1, DEFAULT_DATAGRAM_SIZE);
        set_sequence(&mut datagram, SENTINEL_SEQUENCE);
        assert_eq!(parse_sequence(&datagram), Some(SENTINEL_SEQUENCE));
        assert_eq!(datagram.len(), DEFAULT_DATAGRAM_SIZE);
    }

    #[test]
    fn test_short_datagram() {
        assert_eq!(parse_sequence(&[0u8; 2]), None);
        assert_eq!(parse_sequence(&[]), None);
    }

    #[test]
    fn test_ack_serialization() {
        let ack = Ack::new(42, 1_700_000_000.25);
        let bytes = ack.to_bytes();
        assert_eq!(&bytes[..4], &42u32.to_be_bytes());
        assert_eq!(Ack::from_bytes(&bytes), Some(ack));
    }

    #[test]
    fn test_short_ack() {
        assert!(Ack::from_bytes(&[0u8; ACK_SIZE - 1]).is_none());
    }

    #[test]
    fn test_wall_clock_is_after_epoch() {
        assert!(wall_clock_secs() > 0.0);
    }
}
