use crate::config::{Config, Protocol};
use crate::flow::PeerFlow;
use crate::interval_reporter::{spawn_reporter, ReportHandle};
use crate::metrics::{SinkRef, WindowMetrics};
use crate::pacer::Pacer;
use crate::results_log::ResultsLog;
use crate::tcp;
use crate::udp_packet::{parse_sequence, wall_clock_secs, Ack, SENTINEL_SEQUENCE};
use crate::{Error, Result};
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, UdpSocket};
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Receive buffer size, larger than any UDP payload
const RECV_BUFFER_SIZE: usize = 65536;

/// How often the listener looks for idle flows
const HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(1);

/// Outcome of feeding one datagram to the [`Listener`]
#[derive(Debug, Clone, PartialEq)]
pub struct Received {
    pub sequence: u32,
    /// Reply to send back to the peer (ack mode only)
    pub ack: Option<Ack>,
    /// Window closed by this datagram
    pub report: Option<WindowMetrics>,
}

/// Per-peer flow table for the UDP listener.
///
/// Every inbound datagram is demultiplexed by source endpoint into that
/// endpoint's [`PeerFlow`]. Each flow has its own reporting timer; a window is
/// only checked when its own peer delivers a datagram, so a silent peer is not
/// reported until it sends again (or is evicted as idle).
///
/// The listener does no I/O. [`Server`] owns the socket and drives it.
///
/// # Examples
///
/// ```
/// use netmeter::server::Listener;
/// use netmeter::udp_packet::create_datagram;
/// use netmeter::{Config, Protocol};
/// use std::time::Instant;
///
/// let config = Config::server(5001).with_protocol(Protocol::Udp).with_ack(true);
/// let mut listener = Listener::new(&config).unwrap();
/// let peer = "127.0.0.1:40000".parse().unwrap();
///
/// let received = listener
///     .on_datagram(&create_datagram(1, 1472), peer, Instant::now(), 0.0)
///     .unwrap();
/// assert_eq!(received.ack.unwrap().sequence, 1);
/// assert_eq!(listener.flow_count(), 1);
/// ```
#[derive(Debug)]
pub struct Listener {
    flows: HashMap<SocketAddr, PeerFlow>,
    interval: Duration,
    expected_interval: Duration,
    ack: bool,
    idle_timeout: Option<Duration>,
}

impl Listener {
    /// Creates an empty listener.
    ///
    /// The expected inter-arrival gap used for jitter comes from the declared
    /// rate and datagram size in `config`.
    pub fn new(config: &Config) -> Result<Self> {
        let expected_interval = Pacer::new(config.rate_kbps, config.datagram_size)?.interval();

        Ok(Self {
            flows: HashMap::new(),
            interval: config.interval,
            expected_interval,
            ack: config.ack,
            idle_timeout: config.flow_idle_timeout,
        })
    }

    /// Handles one datagram from `peer` received at `now`.
    ///
    /// Returns `None` for datagrams too short to carry a sequence number.
    /// `wall_clock` is the receive timestamp placed in the ack.
    pub fn on_datagram(
        &mut self,
        data: &[u8],
        peer: SocketAddr,
        now: Instant,
        wall_clock: f64,
    ) -> Option<Received> {
        let Some(sequence) = parse_sequence(data) else {
            debug!("Dropping {}-byte datagram from {}", data.len(), peer);
            return None;
        };

        let ack = self.ack.then(|| Ack::new(sequence, wall_clock));

        if sequence == SENTINEL_SEQUENCE {
            let report = self.flows.remove(&peer).and_then(|mut flow| {
                info!("Peer {} finished ({} datagrams in final window)", peer, flow.len());
                flow.close_window(now, self.expected_interval)
            });
            return Some(Received {
                sequence,
                ack,
                report,
            });
        }

        let interval = self.interval;
        let flow = self.flows.entry(peer).or_insert_with(|| {
            info!("New flow from {}", peer);
            PeerFlow::new(interval, now)
        });
        flow.record(sequence, data.len(), now);

        let report = if flow.is_due(now) {
            flow.close_window(now, self.expected_interval)
        } else {
            None
        };

        Some(Received {
            sequence,
            ack,
            report,
        })
    }

    /// Removes flows idle for at least the configured timeout.
    ///
    /// Returns a final report for every evicted flow whose window was not
    /// empty. Does nothing when eviction is disabled.
    pub fn evict_idle(&mut self, now: Instant) -> Vec<(SocketAddr, WindowMetrics)> {
        let Some(timeout) = self.idle_timeout else {
            return Vec::new();
        };

        let idle: Vec<SocketAddr> = self
            .flows
            .iter()
            .filter(|(_, flow)| flow.idle_for(now) >= timeout)
            .map(|(peer, _)| *peer)
            .collect();

        let mut reports = Vec::new();
        for peer in idle {
            if let Some(mut flow) = self.flows.remove(&peer) {
                info!("Evicting idle flow from {}", peer);
                if let Some(metrics) = flow.close_window(now, self.expected_interval) {
                    reports.push((peer, metrics));
                }
            }
        }
        reports
    }

    /// Closes every flow, returning the final reports of non-empty windows.
    pub fn close_all(&mut self, now: Instant) -> Vec<(SocketAddr, WindowMetrics)> {
        let expected_interval = self.expected_interval;
        self.flows
            .drain()
            .filter_map(|(peer, mut flow)| {
                flow.close_window(now, expected_interval)
                    .map(|metrics| (peer, metrics))
            })
            .collect()
    }

    pub fn flow(&self, peer: &SocketAddr) -> Option<&PeerFlow> {
        self.flows.get(peer)
    }

    pub fn flow_count(&self) -> usize {
        self.flows.len()
    }

    pub fn expected_interval(&self) -> Duration {
        self.expected_interval
    }
}

/// Network measurement server.
///
/// In UDP mode the server runs a single receive loop that owns the flow table
/// and reports loss, jitter, and bandwidth per peer. In TCP mode every
/// connection is drained in its own task and reports bandwidth only.
///
/// The server runs until its cancellation token is cancelled. Flows still open
/// at that point are flushed to the sink before the summary is printed.
///
/// # Examples
///
/// ```no_run
/// use netmeter::{Config, Protocol, Server};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = Config::server(5001).with_protocol(Protocol::Udp).with_ack(true);
/// let server = Server::new(config)?;
///
/// let token = server.cancellation_token().clone();
/// tokio::spawn(async move {
///     tokio::signal::ctrl_c().await.ok();
///     token.cancel();
/// });
///
/// server.run().await?;
/// # Ok(())
/// # }
/// ```
pub struct Server {
    config: Config,
    sink: SinkRef,
    cancellation_token: CancellationToken,
}

impl Server {
    /// Creates a server reporting to a [`ResultsLog`] built from `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the CSV log cannot
    /// be created.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let log = ResultsLog::open(config.log_path.as_deref(), config.json)?;

        Ok(Self {
            config,
            sink: Arc::new(log),
            cancellation_token: CancellationToken::new(),
        })
    }

    /// Replaces the metrics sink.
    pub fn with_sink(mut self, sink: SinkRef) -> Self {
        self.sink = sink;
        self
    }

    /// Token that stops the server when cancelled.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation_token
    }

    fn bind_addr(&self) -> SocketAddr {
        let ip = self
            .config
            .bind_addr
            .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        SocketAddr::new(ip, self.config.port)
    }

    /// Binds the listening socket and serves until cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Bind`] if the socket cannot be bound. Errors on
    /// individual datagrams or connections are logged and never end the run.
    pub async fn run(&self) -> Result<()> {
        let bind_addr = self.bind_addr();
        info!("Starting netmeter server on {}", bind_addr);

        let (reports, reporter_task) = spawn_reporter(self.sink.clone());

        let result = match self.config.protocol {
            Protocol::Udp => self.run_udp(bind_addr, &reports).await,
            Protocol::Tcp => self.run_tcp(bind_addr, &reports).await,
        };

        reports.complete();
        if let Err(e) = reporter_task.await {
            error!("Reporter task failed: {}", e);
        }

        if result.is_ok() {
            self.sink.summarize();
        }
        result
    }

    async fn run_tcp(&self, bind_addr: SocketAddr, reports: &ReportHandle) -> Result<()> {
        let listener = TcpListener::bind(bind_addr)
            .await
            .map_err(|source| Error::Bind {
                addr: bind_addr.to_string(),
                source,
            })?;
        info!("TCP server listening on {}", bind_addr);

        tcp::run_server(
            listener,
            self.config.interval,
            self.cancellation_token.clone(),
            reports.clone(),
        )
        .await;
        Ok(())
    }

    async fn run_udp(&self, bind_addr: SocketAddr, reports: &ReportHandle) -> Result<()> {
        let socket = UdpSocket::bind(bind_addr)
            .await
            .map_err(|source| Error::Bind {
                addr: bind_addr.to_string(),
                source,
            })?;
        info!(
            "UDP server listening on {} (ack mode: {})",
            bind_addr, self.config.ack
        );

        let mut listener = Listener::new(&self.config)?;
        let mut buf = vec![0u8; RECV_BUFFER_SIZE];
        let mut housekeeping = time::interval(HOUSEKEEPING_INTERVAL);
        housekeeping.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let (len, peer) = tokio::select! {
                _ = self.cancellation_token.cancelled() => break,
                _ = housekeeping.tick() => {
                    for (peer, metrics) in listener.evict_idle(Instant::now()) {
                        reports.report(metrics.into_record(peer));
                    }
                    continue;
                }
                received = socket.recv_from(&mut buf) => match received {
                    Ok(received) => received,
                    Err(e) => {
                        error!("Error receiving UDP datagram: {}", e);
                        continue;
                    }
                },
            };

            let Some(received) =
                listener.on_datagram(&buf[..len], peer, Instant::now(), wall_clock_secs())
            else {
                continue;
            };

            if let Some(ack) = received.ack {
                if let Err(e) = socket.send_to(&ack.to_bytes(), peer).await {
                    warn!("Failed to ack sequence {} to {}: {}", ack.sequence, peer, e);
                }
            }

            if let Some(metrics) = received.report {
                reports.report(metrics.into_record(peer));
            }
        }

        info!("UDP server shutting down");
        for (peer, metrics) in listener.close_all(Instant::now()) {
            reports.report(metrics.into_record(peer));
        }
        Ok(())
    }
}
