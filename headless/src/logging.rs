//! Diagnostic tracing for the engine.
//!
//! Tracing output is for operators debugging the engine itself and goes to
//! stderr. Agent progress is rendered separately through `ui::Console`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "headless=info";

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`, defaulting to [`DEFAULT_FILTER`]. Output: stderr,
/// compact format.
///
/// # Example
/// ```bash
/// RUST_LOG=headless=debug headless run file
/// ```
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
