//! Logging setup.
//!
//! The store itself only emits `tracing` events and spans; these helpers
//! install a subscriber for applications and tests that want to see them.

use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LOG_ENV_VAR;

/// Default filter when `EVENTIDE_LOG` is unset or unparsable.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Filter from `EVENTIDE_LOG`, falling back to [`DEFAULT_LOG_FILTER`].
pub fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
}

/// Install the global fmt subscriber.
///
/// Fails if a global subscriber is already set.
pub fn try_init_tracing() -> Result<(), TryInitError> {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(tracing_subscriber::fmt::layer())
        .try_init()
}

/// Install the global fmt subscriber, keeping any that is already set.
pub fn init_tracing() {
    if try_init_tracing().is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}
