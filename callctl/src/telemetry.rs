//! Structured logging setup.

use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Initialize the tracing subscriber.
///
/// Respects `RUST_LOG`; defaults to info globally with debug for this crate.
/// Safe to call more than once (later calls are no-ops), which keeps tests
/// that want log output simple.
pub fn init_telemetry() -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,callctl=debug"));

    let result = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().compact())
        .try_init();

    if let Err(e) = result {
        tracing::debug!(error = %e, "Tracing subscriber already initialized");
    }

    Ok(())
}
