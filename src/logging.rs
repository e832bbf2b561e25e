//! Logging setup
//!
//! Protocol events are emitted through `tracing`; this installs a stderr fmt
//! subscriber. `RUST_LOG` wins over the configured level.

use crate::Result;
use anyhow::Context;
use tracing_subscriber::EnvFilter;

/// Build the filter from `RUST_LOG`, falling back to `level`
pub fn build_filter(level: &str) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(level).with_context(|| format!("Invalid log level: {}", level)),
    }
}

/// Install the global subscriber
///
/// Only the first call in a process takes effect.
pub fn init(level: &str) -> Result<()> {
    let filter = build_filter(level)?;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();

    Ok(())
}
