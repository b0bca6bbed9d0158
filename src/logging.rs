//! Logging initialization helper
//!
//! The crate itself only emits `tracing` events; binaries and tests opt
//! into output by installing a subscriber, either through this helper or
//! their own setup. `RUST_LOG` overrides the default level when set.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize a formatted subscriber at the given default level.
///
/// Safe to call once per process; a second call fails when a global
/// subscriber is already installed.
pub fn init(level: &str) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    Ok(())
}
