//! Entry point for `udp-transfer`.
//!
//! Parses CLI arguments and dispatches into either **send** or **recv** mode.
//! All protocol work is delegated to library modules; `main.rs` owns only
//! process setup (logging, argument parsing, exit status).

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};

use udp_transfer::config::DEFAULT_WINDOW;
use udp_transfer::packet::DEFAULT_MTU;
use udp_transfer::socket::Socket;
use udp_transfer::{receive_file, send_file, store, TransferConfig, TransferError};

/// Reliable single-file transfer over UDP.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Send FILE to a waiting receiver.
    Send {
        #[command(flatten)]
        endpoint: Endpoint,
        #[command(flatten)]
        tuning: Tuning,
        /// File to send.
        file: PathBuf,
    },
    /// Wait for one file and save it as `<name>.out`.
    Recv {
        #[command(flatten)]
        endpoint: Endpoint,
        #[command(flatten)]
        tuning: Tuning,
        /// Directory the received file is written to.
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
    },
}

#[derive(Args)]
struct Endpoint {
    /// Local UDP port to bind.
    #[arg(long)]
    local_port: u16,
    /// Peer UDP port.
    #[arg(long)]
    remote_port: u16,
    /// Peer address.
    #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::LOCALHOST))]
    remote_addr: IpAddr,
    /// Local address to bind.
    #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    bind_addr: IpAddr,
}

impl Endpoint {
    fn local(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.local_port)
    }

    fn remote(&self) -> SocketAddr {
        SocketAddr::new(self.remote_addr, self.remote_port)
    }
}

#[derive(Args)]
struct Tuning {
    /// Frame size in bytes, header included (both peers must agree).
    #[arg(long, default_value_t = DEFAULT_MTU)]
    mtu: usize,
    /// DATA packets in flight.
    #[arg(long, default_value_t = DEFAULT_WINDOW)]
    window: usize,
    /// First control-packet wait; doubles per attempt.
    #[arg(long, default_value_t = 1000)]
    timeout_ms: u64,
    /// Age after which an unacknowledged DATA packet is resent.
    #[arg(long, default_value_t = 1000)]
    retransmit_ms: u64,
    /// Attempts per control packet.
    #[arg(long, default_value_t = 5)]
    attempts: u32,
    /// Receiver gives up after this many seconds of silence.
    #[arg(long, default_value_t = 30)]
    idle_secs: u64,
}

impl Tuning {
    fn config(&self) -> Result<TransferConfig, TransferError> {
        let config = TransferConfig {
            window_size: self.window,
            base_timeout: Duration::from_millis(self.timeout_ms),
            retransmit_timeout: Duration::from_millis(self.retransmit_ms),
            max_attempts: self.attempts,
            idle_timeout: Duration::from_secs(self.idle_secs),
            ..TransferConfig::with_mtu(self.mtu)?
        };
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.exit_code() == 0 {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(TransferError::Argument(e.to_string()).exit_code())
            };
        }
    };

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            let code = e
                .downcast_ref::<TransferError>()
                .map_or(1, TransferError::exit_code);
            ExitCode::from(code)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.mode {
        Mode::Send {
            endpoint,
            tuning,
            file,
        } => {
            let config = tuning.config()?;
            let outgoing = store::load(&file)
                .await
                .with_context(|| format!("loading {}", file.display()))?;
            let socket = bind(endpoint.local()).await?;
            log::info!("Sending {} to {}", file.display(), endpoint.remote());

            let report = send_file(&socket, endpoint.remote(), &outgoing, &config).await?;
            println!(
                "sent {} ({} bytes, {} packets, {} retransmissions) in {:.2?}",
                outgoing.name,
                report.bytes,
                report.data_packets,
                report.retransmissions,
                report.elapsed
            );
        }
        Mode::Recv {
            endpoint,
            tuning,
            out_dir,
        } => {
            let config = tuning.config()?;
            let socket = bind(endpoint.local()).await?;
            log::info!("Waiting on {} for {}", socket.local_addr, endpoint.remote());

            let received = receive_file(&socket, Some(endpoint.remote()), &config).await?;
            let path = store::save(&out_dir, &received.name, &received.data)
                .await
                .with_context(|| format!("saving {:?}", received.name))?;
            println!(
                "received {} ({} bytes, digest {}) from {}",
                path.display(),
                received.report.bytes,
                hex::encode(received.digest),
                received.peer
            );
        }
    }
    Ok(())
}

async fn bind(addr: SocketAddr) -> Result<Socket, TransferError> {
    Socket::bind(addr).await.map_err(TransferError::Bind)
}
