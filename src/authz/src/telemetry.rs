//! Tracing subscriber setup

use crate::config::AuthzConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install a global `fmt` subscriber filtered by `RUST_LOG`, falling back to
/// `config.log_level`.
///
/// Returns `false` when a global subscriber was already installed, so
/// embedding services and tests may call this more than once.
pub fn init_tracing(config: &AuthzConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str()));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init()
        .is_ok()
}
