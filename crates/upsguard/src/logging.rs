//! Tracing subscriber setup

use clap::ValueEnum;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines
    Text,
    /// One JSON object per event
    Json,
}

/// Filter from `RUST_LOG`, otherwise `info` (or `debug` when verbose)
pub fn env_filter(debug: bool) -> EnvFilter {
    let default = if debug { "debug" } else { "info" };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

pub fn init(debug: bool, format: LogFormat) {
    let registry = tracing_subscriber::registry().with(env_filter(debug));

    match format {
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
        LogFormat::Text => registry.with(fmt::layer().with_target(false)).init(),
    }
}
