//! Telemetry and Observability
//!
//! Sets up `tracing-subscriber` for structured logging. The log level
//! comes from `RUST_LOG` when set, otherwise from configuration; debug
//! builds log human-readable output while release builds emit JSON with
//! span context for log shippers.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Build the level filter: `RUST_LOG` wins over the configured level.
fn level_filter(log_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("{level},foreman_engine={level}", level = log_level))
    })
}

/// Initialize the tracing subscriber with the given log level from config.
///
/// Safe to call more than once: later calls are no-ops, which lets `main`
/// install a basic subscriber before the config is parsed and upgrade it
/// afterwards.
pub fn init_telemetry_with_level(log_level: &str) {
    let registry = tracing_subscriber::registry().with(level_filter(log_level));

    if cfg!(debug_assertions) {
        registry
            .with(fmt::layer().compact().with_target(false))
            .try_init()
            .ok();
    } else {
        registry
            .with(fmt::layer().json().with_current_span(true))
            .try_init()
            .ok();
    }
}

/// Initialize the tracing subscriber with default settings.
///
/// Falls back to "info" when no `RUST_LOG` env var is set. Use
/// `init_telemetry_with_level` once configuration is available.
pub fn init_telemetry() {
    init_telemetry_with_level("info");
}
