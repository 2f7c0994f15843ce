use crate::ack_receiver::AckReceiver;
use crate::config::{Config, Protocol};
use crate::interval_reporter::{spawn_reporter, ReportHandle};
use crate::metrics::SinkRef;
use crate::pacer::Pacer;
use crate::report_timer::ByteWindow;
use crate::results_log::ResultsLog;
use crate::tcp;
use crate::udp_packet::{create_datagram, set_sequence, FIRST_SEQUENCE, SENTINEL_SEQUENCE};
use crate::{Error, Result};
use log::{debug, error, info, warn};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

/// Network measurement client.
///
/// In UDP mode the client sends sequence-numbered datagrams at a paced rate
/// for the configured duration, then a sentinel datagram. With ack mode on,
/// it also matches the server's acknowledgements and reports round-trip
/// jitter and ack-based loss; otherwise it reports the bandwidth it sent.
///
/// # Examples
///
/// ## UDP Test in Ack Mode
///
/// ```no_run
/// use netmeter::{Client, Config, Protocol};
/// use std::time::Duration;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = Config::client("127.0.0.1".to_string(), 5001)
///     .with_protocol(Protocol::Udp)
///     .with_rate_kbps(2000)
///     .with_duration(Duration::from_secs(10))
///     .with_ack(true);
///
/// let client = Client::new(config)?;
/// client.run().await?;
/// # Ok(())
/// # }
/// ```
///
/// ## Collecting Records with a Closure
///
/// ```no_run
/// use netmeter::{Client, Config, MetricsRecord, Protocol};
/// use std::sync::{Arc, Mutex};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let records = Arc::new(Mutex::new(Vec::new()));
/// let sink_records = records.clone();
///
/// let config = Config::client("127.0.0.1".to_string(), 5001).with_protocol(Protocol::Udp);
/// let client = Client::new(config)?.with_sink(Arc::new(move |record: MetricsRecord| {
///     sink_records.lock().unwrap().push(record);
/// }));
///
/// client.run().await?;
/// println!("{} windows", records.lock().unwrap().len());
/// # Ok(())
/// # }
/// ```
pub struct Client {
    config: Config,
    sink: SinkRef,
    cancellation_token: CancellationToken,
}

impl Client {
    /// Creates a client reporting to a [`ResultsLog`] built from `config`.
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

    /// Returns a reference to the cancellation token.
    ///
    /// Cancelling it stops the test early. The final statistics are still
    /// flushed and the sentinel is still sent.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use netmeter::{Client, Config};
    ///
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let client = Client::new(Config::client("127.0.0.1".to_string(), 5001))?;
    ///
    /// let cancel_token = client.cancellation_token().clone();
    /// tokio::spawn(async move {
    ///     tokio::signal::ctrl_c().await.ok();
    ///     cancel_token.cancel();
    /// });
    ///
    /// client.run().await?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation_token
    }

    /// Runs the test and prints the summary.
    ///
    /// # Errors
    ///
    /// Returns an error if the server address cannot be resolved or the
    /// socket cannot be opened. Send failures during the test are logged and
    /// do not end it.
    pub async fn run(&self) -> Result<()> {
        let target = self.resolve_target().await?;
        info!(
            "Connecting to {} ({:?}, {} s)",
            target,
            self.config.protocol,
            self.config.duration.as_secs()
        );

        let (reports, reporter_task) = spawn_reporter(self.sink.clone());

        let result = match self.config.protocol {
            Protocol::Udp => self.run_udp(target, &reports).await,
            Protocol::Tcp => {
                tcp::run_client(
                    target,
                    self.config.duration,
                    self.config.interval,
                    &self.cancellation_token,
                    &reports,
                )
                .await
            }
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

    async fn resolve_target(&self) -> Result<SocketAddr> {
        let host = self
            .config
            .server_addr
            .as_deref()
            .ok_or_else(|| Error::Config("Server address is required for client mode".to_string()))?;

        tokio::net::lookup_host((host, self.config.port))
            .await?
            .next()
            .ok_or_else(|| Error::Connection(format!("Could not resolve {}", host)))
    }

    async fn run_udp(&self, target: SocketAddr, reports: &ReportHandle) -> Result<()> {
        let local: SocketAddr = if target.is_ipv6() {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        };

        let socket = UdpSocket::bind(local).await.map_err(|source| Error::Bind {
            addr: local.to_string(),
            source,
        })?;
        socket.connect(target).await?;

        let pacer = Pacer::new(self.config.rate_kbps, self.config.datagram_size)?;
        debug!("Pacing one datagram every {:?}", pacer.interval());

        let start = Instant::now();
        let mut acks = self.config.ack.then(|| {
            AckReceiver::new(
                self.config.datagram_size,
                self.config.interval,
                self.config.effective_ack_timeout(),
                start,
            )
        });
        let mut sent_window = ByteWindow::new(self.config.interval, start);
        let mut sent = 0u64;
        let mut sequence = FIRST_SEQUENCE;
        let mut datagram = create_datagram(sequence, self.config.datagram_size);

        while start.elapsed() < self.config.duration {
            if self.cancellation_token.is_cancelled() {
                info!("Test cancelled by user");
                break;
            }

            set_sequence(&mut datagram, sequence);

            match socket.send(&datagram).await {
                Ok(n) => {
                    sent_window.add(n);
                    if let Some(acks) = acks.as_mut() {
                        acks.register_send(sequence, Instant::now());
                    }
                }
                Err(e) => warn!("Failed to send sequence {}: {}", sequence, e),
            }
            sequence = sequence.wrapping_add(1);
            sent += 1;

            let now = Instant::now();
            match acks.as_mut() {
                Some(acks) => {
                    acks.drain(&socket);
                    if acks.is_due(now) {
                        if let Some(metrics) = acks.close_window(now) {
                            reports.report(metrics.into_record(target));
                        }
                    }
                }
                None => {
                    if let Some(metrics) = sent_window.close_if_due(now) {
                        reports.report(metrics.into_record(target));
                    }
                }
            }

            // Late cycles skip the sleep until the schedule is caught up
            let deadline = pacer.deadline(start, sent);
            tokio::select! {
                _ = tokio::time::sleep_until(deadline.into()) => {}
                _ = self.cancellation_token.cancelled() => {
                    info!("Test cancelled by user");
                    break;
                }
            }
        }

        match acks.as_mut() {
            Some(acks) => {
                acks.drain(&socket);
                if let Some(metrics) = acks.close_window(Instant::now()) {
                    reports.report(metrics.into_record(target));
                }
                info!(
                    "Acked {} datagrams, {} lost, {} still pending",
                    acks.total_acked(),
                    acks.total_lost(),
                    acks.pending_len()
                );
            }
            None => {
                if let Some(metrics) = sent_window.flush(Instant::now()) {
                    reports.report(metrics.into_record(target));
                }
            }
        }

        set_sequence(&mut datagram, SENTINEL_SEQUENCE);
        if let Err(e) = socket.send(&datagram).await {
            warn!("Failed to send end-of-stream datagram: {}", e);
        }
        info!("Sent {} datagrams to {}", sent, target);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_requires_server_addr() {
        let config = Config::new();
        assert!(matches!(Client::new(config), Err(Error::Config(_))));
    }

    #[test]
    fn test_client_rejects_tiny_datagrams() {
        let config = Config::client("127.0.0.1".to_string(), 5001).with_datagram_size(8);
        assert!(Client::new(config).is_err());
    }

    #[tokio::test]
    async fn test_resolve_target() {
        let client = Client::new(Config::client("127.0.0.1".to_string(), 6001)).unwrap();
        let target = client.resolve_target().await.unwrap();
        assert_eq!(target, "127.0.0.1:6001".parse::<SocketAddr>().unwrap());
    }
}
