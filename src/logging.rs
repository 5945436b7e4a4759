//! Tracing subscriber setup.

use tracing_subscriber::{EnvFilter, fmt};

/// Output format of the worker log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    pub fn parse(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Text,
        }
    }
}

/// `RUST_LOG` wins; otherwise `level`, raised to debug by `--verbose`.
fn filter(level: &str, verbose: bool) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    let level = if verbose { "debug" } else { level };
    EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"))
}

pub fn init(level: &str, format: LogFormat, verbose: bool) {
    let filter = filter(level, verbose);
    match format {
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .init();
        }
        LogFormat::Text => {
            fmt().with_env_filter(filter).with_target(true).init();
        }
    }
}
