//! Entry point for `rudp`.
//!
//! Parses CLI arguments and dispatches into either **recv** or **send**
//! mode.  All protocol work is delegated to library modules; `main.rs` owns
//! only process setup: logging, argument validation, file open/close.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use rudp::link::LinkConfig;
use rudp::packet::DEFAULT_RECV_WINDOW;
use rudp::receiver::run_receiver;
use rudp::sender::{run_sender, DATA_TIMEOUT, EMULATED_DATA_TIMEOUT};
use rudp::socket::Socket;

/// Reliable file transfer over UDP.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Receive one file: bind a port and wait for a sender.
    Recv {
        /// Local port to bind.
        port: u16,
        /// File the received byte stream is written to.
        output_file: PathBuf,
        /// Receive window in packets, clamped to [1, 65535].
        window_size: Option<i64>,
    },
    /// Send one file to a waiting receiver.
    Send {
        /// Receiver's IP address.
        server_ip: IpAddr,
        /// Receiver's port.
        port: u16,
        /// File to transfer.
        input_file: PathBuf,
        /// Emulated one-way link delay in milliseconds; providing it enables
        /// link emulation.
        delay_ms: Option<u64>,
        /// Emulated packet loss in percent, clamped to [0, 100].
        loss_percent: Option<f64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // RUST_LOG overrides; progress markers show by default.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match Cli::parse().mode {
        Mode::Recv {
            port,
            output_file,
            window_size,
        } => {
            let window = window_size
                .unwrap_or(i64::from(DEFAULT_RECV_WINDOW))
                .clamp(1, 65535) as u16;

            let socket = Socket::bind(SocketAddr::from(([0, 0, 0, 0], port)))
                .await
                .with_context(|| format!("bind port {port}"))?;
            let mut output = tokio::fs::File::create(&output_file)
                .await
                .with_context(|| format!("create output file {}", output_file.display()))?;

            let written = run_receiver(socket, &mut output, window).await?;
            log::info!(
                "[receiver] {written} bytes written to {}",
                output_file.display()
            );
        }

        Mode::Send {
            server_ip,
            port,
            input_file,
            delay_ms,
            loss_percent,
        } => {
            let mut socket = Socket::bind("0.0.0.0:0".parse().unwrap())
                .await
                .context("bind sender socket")?;

            if delay_ms.is_some() || loss_percent.is_some() {
                let link = LinkConfig::new(delay_ms.unwrap_or(0), loss_percent.unwrap_or(0.0));
                log::info!(
                    "[opts] delay={}ms, loss={}%, dataTimeout={}ms",
                    link.delay().as_millis(),
                    link.loss_rate() * 100.0,
                    EMULATED_DATA_TIMEOUT.as_millis()
                );
                socket.set_link(link);
            } else {
                log::debug!("[opts] no link emulation, dataTimeout={}ms", DATA_TIMEOUT.as_millis());
            }

            let mut input = tokio::fs::File::open(&input_file)
                .await
                .with_context(|| format!("open input file {}", input_file.display()))?;

            let stats = run_sender(socket, SocketAddr::new(server_ip, port), &mut input).await?;
            println!("{stats}");
        }
    }

    Ok(())
}
