//! sdsyslog-receiver - receive, reassemble and write fragmented syslog
//!
//! # Usage
//!
//! ```bash
//! sdsyslog-receiver
//! sdsyslog-receiver --config /etc/sdsyslog/receiver.toml
//! sdsyslog-receiver --output /var/log/sdsyslog.log --stdout
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::info;

use sdsyslog_config::ReceiverConfig;
use sdsyslog_protocol::JsonCodec;
use sdsyslog_receiver::Daemon;
use sdsyslog_receiver::worker::{FileSink, MessageSink, StdoutSink};

/// SDSyslog receiver daemon
#[derive(Parser, Debug)]
#[command(name = "sdsyslog-receiver")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (defaults apply when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Append reassembled messages to this file. Overrides config file.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Also write messages to stdout. Overrides config file.
    #[arg(long)]
    stdout: bool,

    /// UDP port to listen on. Overrides config file.
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => ReceiverConfig::from_file(path).with_context(|| format!("failed to load {}", path.display()))?,
        None => ReceiverConfig::default(),
    };
    if let Some(path) = cli.output {
        config.output.file_path = Some(path);
    }
    if cli.stdout {
        config.output.stdout = true;
    }
    if let Some(port) = cli.port {
        config.network.port = port;
    }
    config.validate().context("invalid configuration")?;

    sdsyslog_receiver::logging::init(&config.log)?;

    let sinks = build_sinks(&config)?;
    let daemon = Daemon::start(config, Arc::new(JsonCodec), sinks)
        .await
        .context("failed to start receiver")?;

    wait_for_shutdown().await?;
    info!("shutdown signal received");

    daemon.shutdown().await;
    Ok(())
}

fn build_sinks(config: &ReceiverConfig) -> Result<Vec<Box<dyn MessageSink>>> {
    let mut sinks: Vec<Box<dyn MessageSink>> = Vec::new();
    if let Some(path) = &config.output.file_path {
        sinks.push(Box::new(FileSink::open(path)?));
    }
    if config.output.stdout {
        sinks.push(Box::new(StdoutSink::new()));
    }
    if sinks.is_empty() {
        info!("no output file configured, writing messages to stdout");
        sinks.push(Box::new(StdoutSink::new()));
    }
    Ok(sinks)
}

async fn wait_for_shutdown() -> Result<()> {
    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())
            .context("failed to install SIGTERM handler")?;
        tokio::select! {
            result = signal::ctrl_c() => result.context("failed to listen for Ctrl+C")?,
            _ = terminate.recv() => {}
        }
    }

    #[cfg(not(unix))]
    signal::ctrl_c().await.context("failed to listen for Ctrl+C")?;

    Ok(())
}
