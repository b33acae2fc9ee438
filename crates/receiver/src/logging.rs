//! Diagnostics subscriber setup

use std::fs::OpenOptions;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{EnvFilter, Layer, fmt, prelude::*};

use sdsyslog_config::{LogConfig, LogFormat, LogOutput};

/// Install the global tracing subscriber.
///
/// `RUST_LOG`, when set, overrides the configured level. Fails if a
/// subscriber is already installed or the log file cannot be opened.
pub fn init(config: &LogConfig) -> Result<()> {
    let filter = build_filter(config)?;
    let writer = make_writer(&config.output)?;

    let layer = match config.format {
        LogFormat::Console => fmt::layer().with_target(true).with_writer(writer).boxed(),
        LogFormat::Json => fmt::layer().json().with_target(true).with_writer(writer).boxed(),
    };

    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .try_init()
        .context("failed to install tracing subscriber")?;

    Ok(())
}

fn build_filter(config: &LogConfig) -> Result<EnvFilter> {
    let directives = std::env::var("RUST_LOG")
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| config.level.as_str().to_string());

    EnvFilter::try_new(&directives)
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|e| anyhow::anyhow!("invalid log level: {}", e))
}

fn make_writer(output: &LogOutput) -> Result<BoxMakeWriter> {
    Ok(match output {
        LogOutput::Stdout => BoxMakeWriter::new(std::io::stdout),
        LogOutput::Stderr => BoxMakeWriter::new(std::io::stderr),
        LogOutput::File(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            BoxMakeWriter::new(Arc::new(file))
        }
    })
}
