//! `tracing` subscriber setup for embedding applications and tests.

use tracing_subscriber::EnvFilter;

use crate::config::ChatConfig;

/// Install a formatting subscriber filtered by `RUST_LOG`, falling back to
/// `default_filter`.
///
/// Returns false when a global subscriber was already installed; calling
/// this more than once is harmless.
pub fn init_tracing(default_filter: &str) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}

/// [`init_tracing`] with the configured `log_filter` as the default.
pub fn init_tracing_from(config: &ChatConfig) -> bool {
    init_tracing(&config.log_filter)
}
