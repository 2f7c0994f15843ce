use clap::{Parser, Subcommand};
use netmeter::{Client, Config, Protocol, Server};
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "netmeter")]
#[command(about = "Paced UDP and bulk TCP network measurement: bandwidth, loss and jitter", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run in server mode
    Server {
        /// Port to listen on
        #[arg(short, long, default_value = "5001")]
        port: u16,

        /// Bind to specific address
        #[arg(short, long)]
        bind: Option<String>,

        /// Use UDP instead of TCP
        #[arg(short, long)]
        udp: bool,

        /// Acknowledge every UDP datagram
        #[arg(short, long)]
        ack: bool,

        /// Declared client send rate in Kbps, used for jitter
        #[arg(short, long, default_value = "1000")]
        rate: u64,

        /// Expected datagram size in bytes, used for jitter
        #[arg(short = 's', long, default_value = "1472")]
        size: usize,

        /// Report interval in seconds
        #[arg(short, long, default_value = "1")]
        interval: f64,

        /// Write every record to this CSV file
        #[arg(short, long)]
        log: Option<PathBuf>,

        /// Print the summary as JSON
        #[arg(short = 'J', long)]
        json: bool,

        /// Evict flows idle for this many seconds (0 disables eviction)
        #[arg(long, default_value = "30")]
        idle_timeout: u64,
    },

    /// Run in client mode
    Client {
        /// Server address to connect to
        server: String,

        /// Port to connect to
        #[arg(short, long, default_value = "5001")]
        port: u16,

        /// Use UDP instead of TCP
        #[arg(short, long)]
        udp: bool,

        /// Ask the server to acknowledge every datagram
        #[arg(short, long)]
        ack: bool,

        /// Test duration in seconds
        #[arg(short = 't', long, default_value = "60")]
        time: u64,

        /// Report interval in seconds
        #[arg(short, long, default_value = "1")]
        interval: f64,

        /// Target send rate in Kbps (UDP)
        #[arg(short, long, default_value = "1000")]
        rate: u64,

        /// Datagram size in bytes (UDP)
        #[arg(short = 's', long, default_value = "1472")]
        size: usize,

        /// Seconds before an unacknowledged datagram counts as lost
        /// (defaults to the report interval)
        #[arg(long)]
        ack_timeout: Option<f64>,

        /// Write every record to this CSV file
        #[arg(short, long)]
        log: Option<PathBuf>,

        /// Print the summary as JSON
        #[arg(short = 'J', long)]
        json: bool,
    },
}

/// Cancels `token` on Ctrl-C so the run can flush its final statistics.
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Interrupted, finishing up");
            token.cancel();
        }
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Server {
            port,
            bind,
            udp,
            ack,
            rate,
            size,
            interval,
            log,
            json,
            idle_timeout,
        } => {
            let protocol = if udp { Protocol::Udp } else { Protocol::Tcp };
            let idle_timeout = (idle_timeout > 0).then(|| Duration::from_secs(idle_timeout));

            let mut config = Config::server(port)
                .with_protocol(protocol)
                .with_ack(ack)
                .with_rate_kbps(rate)
                .with_datagram_size(size)
                .with_interval(Duration::try_from_secs_f64(interval)?)
                .with_flow_idle_timeout(idle_timeout)
                .with_json(json);

            if let Some(bind_addr) = bind {
                config = config.with_bind_addr(bind_addr.parse()?);
            }
            if let Some(path) = log {
                config = config.with_log_path(path);
            }

            let server = Server::new(config)?;
            cancel_on_ctrl_c(server.cancellation_token().clone());
            server.run().await?;
        }

        Commands::Client {
            server,
            port,
            udp,
            ack,
            time,
            interval,
            rate,
            size,
            ack_timeout,
            log,
            json,
        } => {
            let protocol = if udp { Protocol::Udp } else { Protocol::Tcp };

            let mut config = Config::client(server, port)
                .with_protocol(protocol)
                .with_ack(ack)
                .with_duration(Duration::from_secs(time))
                .with_interval(Duration::try_from_secs_f64(interval)?)
                .with_rate_kbps(rate)
                .with_datagram_size(size)
                .with_json(json);

            if let Some(timeout) = ack_timeout {
                config = config.with_ack_timeout(Duration::try_from_secs_f64(timeout)?);
            }
            if let Some(path) = log {
                config = config.with_log_path(path);
            }

            let client = Client::new(config)?;
            cancel_on_ctrl_c(client.cancellation_token().clone());
            client.run().await?;
        }
    }

    Ok(())
}
