//! Logging setup for programs embedding the presentation layer.
//!
//! The crate itself only emits `tracing` events; installing a subscriber is
//! left to the application. [`init_minimal_logging`] is the fallback for
//! tools and tests that have no logging setup of their own.

use tracing_subscriber::{fmt, EnvFilter};

/// Filter used when `RUST_LOG` is unset or invalid: flip and buffer
/// lifecycle events from this crate, warnings from everything else.
pub const DEFAULT_FILTER: &str = "warn,novade_kms=info";

fn default_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Installs a `stderr` subscriber filtered by `RUST_LOG`, falling back to
/// [`DEFAULT_FILTER`].
///
/// Does nothing if a global subscriber is already set.
pub fn init_minimal_logging() {
    let filter = default_filter();

    let _ = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(atty::is(atty::Stream::Stderr))
        .try_init();
}
