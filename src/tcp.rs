//! Bulk TCP throughput test.
//!
//! The client writes fixed-size chunks as fast as the connection accepts them;
//! the server reads and discards. Both sides report bandwidth only, once per
//! report interval.

use crate::interval_reporter::ReportHandle;
use crate::report_timer::ByteWindow;
use crate::Result;
use log::{debug, error, info};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Size of each chunk written by the client
pub const TCP_CHUNK_SIZE: usize = 8192;

/// Runs a TCP client test against `target`.
///
/// # Errors
///
/// Returns an error only if the connection cannot be established. A write
/// error is logged and ends the test early.
pub async fn run_client(
    target: SocketAddr,
    duration: Duration,
    interval: Duration,
    cancel_token: &CancellationToken,
    reports: &ReportHandle,
) -> Result<()> {
    let mut stream = TcpStream::connect(target).await?;
    info!("Connected to {} (TCP)", target);

    let chunk = vec![b'X'; TCP_CHUNK_SIZE];
    let start = Instant::now();
    let mut window = ByteWindow::new(interval, start);

    while start.elapsed() < duration {
        let written = tokio::select! {
            _ = cancel_token.cancelled() => {
                info!("Test cancelled by user");
                break;
            }
            written = stream.write(&chunk) => written,
        };

        match written {
            Ok(n) => {
                window.add(n);
                if let Some(metrics) = window.close_if_due(Instant::now()) {
                    reports.report(metrics.into_record(target));
                }
            }
            Err(e) => {
                error!("Error sending data: {}", e);
                break;
            }
        }
    }

    if let Some(metrics) = window.flush(Instant::now()) {
        reports.report(metrics.into_record(target));
    }

    if let Err(e) = stream.shutdown().await {
        debug!("Error closing connection to {}: {}", target, e);
    }
    Ok(())
}

/// Accepts connections until `cancel_token` is cancelled, draining each one in
/// its own task. Returns once every connection task has flushed its last
/// report.
pub async fn run_server(
    listener: TcpListener,
    interval: Duration,
    cancel_token: CancellationToken,
    reports: ReportHandle,
) {
    let mut connections = JoinSet::new();

    loop {
        let accepted = tokio::select! {
            _ = cancel_token.cancelled() => break,
            Some(_) = connections.join_next(), if !connections.is_empty() => continue,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, peer)) => {
                info!("New connection from {}", peer);
                let reports = reports.clone();
                let cancel_token = cancel_token.clone();
                connections.spawn(handle_connection(
                    stream,
                    peer,
                    interval,
                    cancel_token,
                    reports,
                ));
            }
            Err(e) => {
                error!("Error accepting connection: {}", e);
            }
        }
    }

    info!("TCP server shutting down");
    while connections.join_next().await.is_some() {}
}

async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    interval: Duration,
    cancel_token: CancellationToken,
    reports: ReportHandle,
) {
    let mut buf = vec![0u8; TCP_CHUNK_SIZE * 8];
    let mut window = ByteWindow::new(interval, Instant::now());

    loop {
        let read = tokio::select! {
            _ = cancel_token.cancelled() => break,
            read = stream.read(&mut buf) => read,
        };

        match read {
            Ok(0) => {
                info!("Connection from {} closed", peer);
                break;
            }
            Ok(n) => {
                window.add(n);
                if let Some(metrics) = window.close_if_due(Instant::now()) {
                    reports.report(metrics.into_record(peer));
                }
            }
            Err(e) => {
                error!("Error reading from {}: {}", peer, e);
                break;
            }
        }
    }

    if let Some(metrics) = window.flush(Instant::now()) {
        reports.report(metrics.into_record(peer));
    }
}
