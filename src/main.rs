//! # wiretap
//!
//! Diagnostic HTTP + WebSocket echo server, plus a one-shot HTTP probe.

#![deny(unsafe_code)]

mod probe;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{Level, info, warn};
use wiretap_server::{TracingObserver, load_config, start};
use wiretap_telemetry::{LogFormat, TelemetryConfig, init_telemetry};

use crate::probe::ProbeArgs;

/// Diagnostic HTTP + WebSocket echo server.
#[derive(Parser, Debug)]
#[command(name = "wiretap", version, about = "HTTP request logger and WebSocket echo server")]
struct Cli {
    /// Default log level (`RUST_LOG` overrides).
    #[arg(long, global = true, default_value = "info")]
    log_level: Level,

    /// Log output format: compact or json.
    #[arg(long, global = true, default_value = "compact")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Command {
    /// Run the server (default).
    Serve(ServeArgs),
    /// Fetch a URL once and print status, timing and headers.
    Probe(ProbeArgs),
}

impl Default for Command {
    fn default() -> Self {
        Self::Serve(ServeArgs::default())
    }
}

#[derive(Args, Debug, Default, PartialEq, Eq)]
struct ServeArgs {
    /// Listen address, overrides config file and `WIRETAP_ADDR`.
    #[arg(long)]
    addr: Option<String>,

    /// JSON config file.
    #[arg(long, short)]
    config: Option<PathBuf>,
}

async fn serve(args: ServeArgs) -> Result<()> {
    let mut config = load_config(args.config.as_deref()).context("failed to load configuration")?;
    if let Some(addr) = args.addr {
        config.addr = addr;
    }
    config.validate().context("invalid configuration")?;

    let addr = config.addr.clone();
    let handle = start(config, Arc::new(TracingObserver))
        .await
        .with_context(|| format!("failed to listen on {addr}"))?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!(sessions = handle.active_sessions(), "ctrl-c received");

    if !handle.shutdown().await {
        warn!("forced exit with sessions still open");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_telemetry(&TelemetryConfig {
        log_level: cli.log_level,
        format: cli.log_format,
        ..TelemetryConfig::default()
    });

    match cli.command.unwrap_or_default() {
        Command::Serve(args) => serve(args).await,
        Command::Probe(args) => probe::run(&args).await,
    }
}
