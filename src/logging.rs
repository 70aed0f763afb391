//! Structured logging setup.
//!
//! Logs go to stderr so that command output on stdout stays machine-readable.
//! `RUST_LOG` overrides the configured level.

use anyhow::{Context, Result};
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::{LogFormat, LoggingConfig};

pub fn init(config: &LoggingConfig) -> Result<()> {
    let default_level = parse_level(&config.level)?;
    let env_filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();

    let layer = match config.format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_current_span(true)
            .with_target(true)
            .with_filter(env_filter)
            .boxed(),
        LogFormat::Pretty => tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_filter(env_filter)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(layer)
        .try_init()
        .context("Failed to install log subscriber")?;
    Ok(())
}

fn parse_level(level: &str) -> Result<Level> {
    level
        .parse::<Level>()
        .with_context(|| format!("Invalid log level: '{}'", level))
}
