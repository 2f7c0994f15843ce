use crate::udp_packet::{ACK_SIZE, DEFAULT_DATAGRAM_SIZE, MAX_DATAGRAM_SIZE};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Default port for both client and server
pub const DEFAULT_PORT: u16 = 5001;

/// Default UDP send rate in Kbps
pub const DEFAULT_RATE_KBPS: u64 = 1000;

/// Default server idle-flow eviction timeout
pub const DEFAULT_FLOW_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Transport protocol type for network testing.
///
/// # Examples
///
/// ```
/// use netmeter::{Config, Protocol};
///
/// let udp_config = Config::client("127.0.0.1".to_string(), 5001)
///     .with_protocol(Protocol::Udp)
///     .with_rate_kbps(2000);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Protocol {
    /// Bulk throughput test, bandwidth only
    Tcp,
    /// Paced datagram test with loss and jitter
    Udp,
}

/// Test mode: client or server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    /// Server mode - receives traffic and reports per peer
    Server,
    /// Client mode - generates traffic toward a server
    Client,
}

/// Configuration for client and server runs.
///
/// Use the builder methods to customize the configuration.
///
/// # Examples
///
/// ## UDP Client in Ack Mode
///
/// ```
/// use netmeter::{Config, Protocol};
/// use std::time::Duration;
///
/// let config = Config::client("192.168.1.100".to_string(), 5001)
///     .with_protocol(Protocol::Udp)
///     .with_rate_kbps(5000)
///     .with_duration(Duration::from_secs(10))
///     .with_ack(true);
///
/// assert!(config.validate().is_ok());
/// assert_eq!(config.effective_ack_timeout(), Duration::from_secs(1));
/// ```
///
/// ## UDP Server
///
/// ```
/// use netmeter::{Config, Protocol};
///
/// let config = Config::server(5001)
///     .with_protocol(Protocol::Udp)
///     .with_rate_kbps(5000);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server mode or client mode
    pub mode: Mode,

    /// Protocol to use (TCP or UDP)
    pub protocol: Protocol,

    /// Port number to use
    pub port: u16,

    /// Server address (for client mode)
    pub server_addr: Option<String>,

    /// Bind address (for server mode)
    pub bind_addr: Option<IpAddr>,

    /// Test duration (client mode)
    pub duration: Duration,

    /// Reporting window length
    pub interval: Duration,

    /// UDP send rate in Kbps. The server uses it as the declared rate when
    /// computing arrival jitter.
    pub rate_kbps: u64,

    /// Total UDP datagram size in bytes, including the 4-byte sequence header
    pub datagram_size: usize,

    /// Acknowledge every datagram and measure round trips on the client
    pub ack: bool,

    /// Age after which an unacknowledged datagram counts as lost.
    /// `None` uses the report interval.
    pub ack_timeout: Option<Duration>,

    /// Server evicts flows idle for this long. `None` keeps flows forever.
    pub flow_idle_timeout: Option<Duration>,

    /// CSV file receiving every metrics record
    pub log_path: Option<PathBuf>,

    /// Print the end-of-run summary as JSON
    pub json: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: Mode::Client,
            protocol: Protocol::Tcp,
            port: DEFAULT_PORT,
            server_addr: None,
            bind_addr: None,
            duration: Duration::from_secs(60),
            interval: Duration::from_secs(1),
            rate_kbps: DEFAULT_RATE_KBPS,
            datagram_size: DEFAULT_DATAGRAM_SIZE,
            ack: false,
            ack_timeout: None,
            flow_idle_timeout: Some(DEFAULT_FLOW_IDLE_TIMEOUT),
            log_path: None,
            json: false,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    ///
    /// ```
    /// use netmeter::Config;
    ///
    /// let config = Config::new();
    /// assert_eq!(config.port, 5001);
    /// ```
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new server configuration listening on `port`.
    pub fn server(port: u16) -> Self {
        Self {
            mode: Mode::Server,
            port,
            ..Default::default()
        }
    }

    /// Creates a new client configuration targeting `server_addr:port`.
    pub fn client(server_addr: String, port: u16) -> Self {
        Self {
            mode: Mode::Client,
            server_addr: Some(server_addr),
            port,
            ..Default::default()
        }
    }

    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    /// Sets the reporting window length.
    ///
    /// Also the default ack timeout, unless one is set explicitly.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_rate_kbps(mut self, rate_kbps: u64) -> Self {
        self.rate_kbps = rate_kbps;
        self
    }

    pub fn with_datagram_size(mut self, size: usize) -> Self {
        self.datagram_size = size;
        self
    }

    pub fn with_ack(mut self, ack: bool) -> Self {
        self.ack = ack;
        self
    }

    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = Some(timeout);
        self
    }

    pub fn with_flow_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.flow_idle_timeout = timeout;
        self
    }

    pub fn with_bind_addr(mut self, addr: IpAddr) -> Self {
        self.bind_addr = Some(addr);
        self
    }

    pub fn with_log_path(mut self, path: PathBuf) -> Self {
        self.log_path = Some(path);
        self
    }

    pub fn with_json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }

    /// Ack timeout in effect: the explicit one, or the report interval.
    pub fn effective_ack_timeout(&self) -> Duration {
        self.ack_timeout.unwrap_or(self.interval)
    }

    /// Checks the settings a run depends on.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for a zero rate or interval, a datagram too
    /// small to carry an ack-sized reply or too large for one UDP payload, or
    /// a client without a server address.
    pub fn validate(&self) -> Result<()> {
        if self.rate_kbps == 0 {
            return Err(Error::Config("Send rate must be greater than 0 Kbps".to_string()));
        }

        if self.interval.is_zero() {
            return Err(Error::Config("Report interval must be greater than 0".to_string()));
        }

        if self.datagram_size < ACK_SIZE {
            return Err(Error::Config(format!(
                "Datagram size must be at least {} bytes, got {}",
                ACK_SIZE, self.datagram_size
            )));
        }

        if self.datagram_size > MAX_DATAGRAM_SIZE {
            return Err(Error::Config(format!(
                "Datagram size must be at most {} bytes, got {}",
                MAX_DATAGRAM_SIZE, self.datagram_size
            )));
        }

        if self.mode == Mode::Client && self.server_addr.is_none() {
            return Err(Error::Config(
                "Server address is required for client mode".to_string(),
            ));
        }

        Ok(())
    }
}
