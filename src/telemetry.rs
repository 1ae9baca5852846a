//! Logging setup for the binary.

use std::str::FromStr;

use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{Layer, Registry};

/// Log line encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" | "plain" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{}', expected text or json", other)),
        }
    }
}

type BoxLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

/// Installs the global subscriber. `RUST_LOG` overrides the default `info`
/// level.
pub fn setup_logging(format: LogFormat) {
    tracing_subscriber::registry()
        .with(fmt_layer(format).with_filter(default_env_filter()))
        .init();
}

fn fmt_layer(format: LogFormat) -> BoxLayer {
    match format {
        LogFormat::Json => Box::new(
            tracing_subscriber::fmt::layer()
                .json()
                .flatten_event(true)
                .with_current_span(false),
        ),
        LogFormat::Text => Box::new(tracing_subscriber::fmt::layer().with_target(false)),
    }
}

fn default_env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}
