//! uartlink command-line tool: entry point.
//!
//! Opens a serial port, decodes framed packets from it and either logs them
//! (`monitor`) or performs a single ping round trip (`ping`).
//!
//! # Usage
//!
//! ```text
//! uartlink [OPTIONS] [COMMAND]
//!
//! Commands:
//!   monitor        Log every frame and noise event until Ctrl+C [default]
//!   ping [TOKEN]   Send a Ping and wait for the matching Pong
//!
//! Options:
//!   --config <PATH>   Config file [env: UARTLINK_CONFIG] [default: ./uartlink.toml]
//!   --port <PORT>     Override serial.port from the config file
//!   --baud <BAUD>     Override serial.baud_rate from the config file
//! ```
//!
//! The log level comes from `RUST_LOG` when set, otherwise from
//! `logging.log_level` in the config file.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use uartlink_core::Command;
use uartlink_session::infrastructure::storage::config::{load_config_from, resolve_config_path};
use uartlink_session::{
    ChannelSink, PortSettings, SerialPortSession, SessionEvent, StatsSink, TracingSink,
};

/// How often `monitor` checks whether the link dropped on its own.
const LINK_CHECK_INTERVAL: Duration = Duration::from_millis(250);

// ── CLI argument definitions ──────────────────────────────────────────────────

#[derive(Debug, Parser)]
#[command(
    name = "uartlink",
    about = "Framed packet link over a serial port",
    version
)]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, env = "UARTLINK_CONFIG")]
    config: Option<PathBuf>,

    /// Serial device, overriding the config file.
    #[arg(long)]
    port: Option<String>,

    /// Baud rate, overriding the config file.
    #[arg(long)]
    baud: Option<u32>,

    #[command(subcommand)]
    command: Option<CliCommand>,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
enum CliCommand {
    /// Log every frame and noise event until Ctrl+C.
    Monitor,
    /// Send a Ping and wait for the Pong echoing the same token.
    Ping {
        /// Token carried by the Ping.
        #[arg(default_value_t = 1)]
        token: u32,
        /// How long to wait for the Pong, in milliseconds.
        #[arg(long, default_value_t = 2000)]
        wait_ms: u64,
    },
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // The config is loaded first because it supplies the fallback log level.
    let config_path = resolve_config_path(cli.config.clone());
    let mut config = load_config_from(&config_path)
        .with_context(|| format!("loading config from {}", config_path.display()))?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.log_level)),
        )
        .init();

    if let Some(port) = cli.port {
        config.serial.port = port;
    }
    if let Some(baud) = cli.baud {
        config.serial.baud_rate = baud;
    }
    config.serial.validate()?;
    let settings = config.serial.port_settings();

    debug!(config = %config_path.display(), "configuration loaded");

    match cli.command.unwrap_or(CliCommand::Monitor) {
        CliCommand::Monitor => run_monitor(settings).await,
        CliCommand::Ping { token, wait_ms } => {
            run_ping(settings, token, Duration::from_millis(wait_ms)).await
        }
    }
}

// ── Subcommands ───────────────────────────────────────────────────────────────

async fn run_monitor(settings: PortSettings) -> anyhow::Result<()> {
    let sink = StatsSink::new(TracingSink::new(settings.port.clone()));
    let stats = sink.stats();
    let session = SerialPortSession::open(&settings, Arc::new(sink))
        .with_context(|| format!("opening {}", settings.port))?;

    info!(port = %settings.port, "monitoring; press Ctrl+C to stop");

    let exit = wait_for_exit(tokio::signal::ctrl_c(), LINK_CHECK_INTERVAL, || {
        session.is_running()
    })
    .await?;
    match exit {
        MonitorExit::Interrupted => info!("received Ctrl+C, stopping"),
        MonitorExit::LinkClosed => warn!(port = %settings.port, "link closed"),
    }

    stop_session(session).await?;

    let snap = stats.snapshot();
    info!(
        frames = snap.frames,
        payload_bytes = snap.payload_bytes,
        noise = snap.noise_total(),
        crc_mismatch = snap.crc_mismatch,
        multiple_start_tokens = snap.multiple_start_tokens,
        buffer_too_small = snap.buffer_too_small,
        special_byte_after_escape = snap.special_byte_after_escape,
        writes_failed = snap.writes_failed,
        "link statistics"
    );
    Ok(())
}

/// Why `monitor` stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MonitorExit {
    Interrupted,
    LinkClosed,
}

/// Waits for `shutdown` to resolve, checking `is_running` every `interval`.
///
/// `shutdown` is polled across every tick, so a signal that arrives between
/// two checks is not lost.
async fn wait_for_exit<F>(
    shutdown: F,
    interval: Duration,
    is_running: impl Fn() -> bool,
) -> anyhow::Result<MonitorExit>
where
    F: Future<Output = std::io::Result<()>>,
{
    tokio::pin!(shutdown);
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            signal = &mut shutdown => {
                signal.context("listening for Ctrl+C")?;
                return Ok(MonitorExit::Interrupted);
            }
            _ = ticker.tick() => {
                if !is_running() {
                    return Ok(MonitorExit::LinkClosed);
                }
            }
        }
    }
}

async fn run_ping(settings: PortSettings, token: u32, wait: Duration) -> anyhow::Result<()> {
    let (sink, mut rx) = ChannelSink::new();
    let session = SerialPortSession::open(&settings, Arc::new(sink))
        .with_context(|| format!("opening {}", settings.port))?;

    let started = Instant::now();
    session.send_command(&Command::Ping(token))?;
    let outcome = tokio::time::timeout(wait, wait_for_pong(&mut rx, token)).await;

    stop_session(session).await?;

    match outcome {
        Ok(Ok(())) => {
            info!(token, rtt_ms = started.elapsed().as_millis() as u64, "pong received");
            Ok(())
        }
        Ok(Err(e)) => Err(e),
        Err(_) => bail!("no pong for token {token} within {} ms", wait.as_millis()),
    }
}

/// Consumes session events until the Pong for `token` arrives.
async fn wait_for_pong(
    rx: &mut mpsc::UnboundedReceiver<SessionEvent>,
    token: u32,
) -> anyhow::Result<()> {
    while let Some(event) = rx.recv().await {
        match event {
            SessionEvent::Frame(frame) => match Command::try_from(&frame) {
                Ok(Command::Pong(echoed)) if echoed == token => return Ok(()),
                Ok(Command::Nack {
                    rejected_type,
                    code,
                }) => bail!("peer rejected frame type 0x{rejected_type:04X} with code {code}"),
                Ok(other) => debug!(?other, "ignoring command while waiting for pong"),
                Err(e) => debug!("ignoring undecodable frame: {e}"),
            },
            SessionEvent::Noise { kind, detail } => warn!(%kind, "link noise: {detail}"),
            SessionEvent::WriteSucceeded { len } => debug!(len, "ping sent"),
            SessionEvent::WriteFailed { kind, detail } => {
                bail!("ping could not be sent ({kind}): {detail}")
            }
            SessionEvent::ConnectionClosed => bail!("link closed before a pong arrived"),
        }
    }
    bail!("session event channel closed")
}

/// `stop()` joins the reader thread, so run it off the async workers.
async fn stop_session(session: SerialPortSession) -> anyhow::Result<()> {
    tokio::task::spawn_blocking(move || session.stop())
        .await
        .context("stopping session")
}

// ── Tests ─────────────────────────────────────────────────────────────────────
