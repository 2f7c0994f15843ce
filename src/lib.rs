//! netmeter - UDP and TCP network measurement
//!
//! A client sends sequence-numbered UDP datagrams at a paced rate; a server
//! demultiplexes them by source endpoint and reports bandwidth, loss, and
//! arrival jitter per peer and per reporting window. In ack mode the server
//! acknowledges every datagram and the client reports round-trip jitter and
//! ack-based loss as well. A bulk TCP mode reports bandwidth only.
//!
//! # Features
//!
//! - Fixed-interval send pacing from a target rate in Kbps
//! - Per-peer statistics windows with span-inferred loss (reordering safe)
//! - Zero-timeout ack draining on the client's own socket
//! - Console, CSV, and JSON summary output through a pluggable [`MetricsSink`]
//! - Graceful cancellation with a final statistics flush
//!
//! # Example
//!
//! ```no_run
//! use netmeter::{Client, Config, Protocol};
//! use std::time::Duration;
//!
//! # #[tokio::main]
//! # async fn main() -> netmeter::Result<()> {
//! let config = Config::client("127.0.0.1".to_string(), 5001)
//!     .with_protocol(Protocol::Udp)
//!     .with_duration(Duration::from_secs(5))
//!     .with_ack(true);
//!
//! Client::new(config)?.run().await?;
//! # Ok(())
//! # }
//! ```

pub mod ack_receiver;
pub mod client;
pub mod config;
pub mod error;
pub mod flow;
pub mod interval_reporter;
pub mod metrics;
pub mod pacer;
pub mod report_timer;
pub mod results_log;
pub mod server;
pub mod tcp;
pub mod udp_packet;

pub use client::Client;
pub use config::{Config, Mode, Protocol};
pub use error::{Error, Result};
pub use metrics::{MetricsRecord, MetricsSink, WindowMetrics};
pub use results_log::ResultsLog;
pub use server::{Listener, Server};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
