use clap::ValueEnum;
use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Registry};

use crate::error::{Error, Result};

const SERVICE_NAME: &str = "meshlb";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human readable lines
    #[default]
    Pretty,
    /// Bunyan json records
    Json,
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Installs the global subscriber. The level is taken from `RUST_LOG` and defaults to `info`.
pub fn initialize_subscriber(format: LogFormat) -> Result<()> {
    let subscriber = Registry::default().with(env_filter());

    let installed = match format {
        LogFormat::Pretty => subscriber.with(tracing_subscriber::fmt::layer()).try_init(),
        LogFormat::Json => subscriber
            .with(JsonStorageLayer)
            .with(BunyanFormattingLayer::new(
                SERVICE_NAME.to_string(),
                std::io::stdout,
            ))
            .try_init(),
    };

    installed.map_err(|e| Error::Logic {
        reason: format!("unable to install tracing subscriber - {}", e),
    })
}
