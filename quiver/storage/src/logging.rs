//! Tracing subscriber setup for binaries and tests.
//!
//! The library itself only emits `tracing` events; embedders that want
//! them printed call one of these initializers (or install their own
//! subscriber).

use tracing_subscriber::{fmt, EnvFilter};

/// Initializes logging from `RUST_LOG`, defaulting to `info`.
pub fn init() {
    init_with_default("info");
}

/// Initializes logging from `RUST_LOG`, with a fallback filter for when
/// the variable is unset. Safe to call more than once; later calls are
/// no-ops.
pub fn init_with_default(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = fmt().with_env_filter(filter).try_init();
}
