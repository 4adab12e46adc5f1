//! Tracing subscriber setup for the binary.

use anyhow::{anyhow, Result};
use clap::ValueEnum;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Install the global subscriber. `RUST_LOG` adds to the default
/// `pricewatch=info` directives. Logs go to stderr so `--json` output on
/// stdout stays parseable.
pub fn init(format: LogFormat) -> Result<()> {
    let filter = EnvFilter::from_default_env()
        .add_directive("pricewatch=info".parse()?)
        .add_directive("pricewatch_server=info".parse()?);

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    }
    .map_err(|e| anyhow!("failed to install tracing subscriber: {e}"))
}
