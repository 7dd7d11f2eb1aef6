//! `tracing` subscriber setup
//!
//! The library only emits events; embedding applications decide where they
//! go. These helpers install a formatted subscriber filtered by `RUST_LOG`
//! (default `info`) for callers that do not bring their own.

use tracing_subscriber::EnvFilter;

fn filter(default: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// Install the global subscriber
///
/// Returns `false` when a subscriber was already installed, which makes it
/// safe to call from every test.
pub fn try_init() -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(filter("info"))
        .with_target(false)
        .try_init()
        .is_ok()
}

/// Install the global subscriber, ignoring an already installed one
pub fn init() {
    let _ = try_init();
}

/// Subscriber writing to the test harness output, at `debug` by default
pub fn init_for_tests() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter("debug"))
        .with_test_writer()
        .try_init();
}
