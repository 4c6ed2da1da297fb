//! Tracing initialization for binaries embedding the transport.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::EnvFilter;

/// Installs a global `fmt` subscriber.
///
/// Uses the `RUST_LOG` environment variable for filtering, falling back to
/// `default_level` (e.g. `"info"` or `"component_transport=debug"`).
/// Fails if a global subscriber is already installed.
pub fn init_tracing(default_level: &str) -> Result<(), TryInitError> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let fmt_layer = tracing_subscriber::fmt::layer().with_target(true);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter)
        .try_init()
}

#[cfg(test)]
mod tests {
    use super::*;

    // the only test in the crate that installs a global subscriber
    #[test]
    fn test_second_init_fails() {
        assert!(init_tracing("debug").is_ok());
        assert!(init_tracing("debug").is_err());
    }
}
