//! Logging setup.
//!
//! The library only emits `tracing` events; installing a subscriber is left
//! to the binary embedding it. [`init_logging`] is the stock setup.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::{LogConfig, LogFormat};

/// Installs a global subscriber.
///
/// `RUST_LOG` wins over [`LogConfig::filter`]. Returns `false` when a
/// subscriber was already installed, leaving it in place.
pub fn init_logging(config: &LogConfig) -> bool {
    let filter = build_filter(config);
    let registry = tracing_subscriber::registry().with(filter);

    let installed = match config.format {
        LogFormat::Text => registry.with(fmt::layer().with_target(true)).try_init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_current_span(false))
            .try_init(),
    };
    installed.is_ok()
}

fn build_filter(config: &LogConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}
