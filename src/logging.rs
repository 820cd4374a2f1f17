//! Logging initialization for binaries and examples embedding the engine.
//!
//! The library itself only emits `tracing` events; hosts that want them
//! on the console can call [`init_logging`] once at startup. Verbosity
//! follows `RUST_LOG`, defaulting to `info`.

use tracing_subscriber::EnvFilter;

/// Install a console subscriber.
///
/// Returns an error when a global subscriber is already set, which is
/// fine to ignore in tests.
pub fn init_logging() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()?;
    Ok(())
}
