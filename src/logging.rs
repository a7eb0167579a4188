//! Tracing subscriber setup for the `entity-scan` binary.
//!
//! Filtering comes from `RUST_LOG` (default `info`). Everything goes to stderr
//! so that reports printed on stdout stay machine readable.

use std::sync::Once;
use tracing::debug;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

pub const DEFAULT_FILTER: &str = "info";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Installs the global subscriber. Later calls are no-ops.
pub fn init_tracing(json: bool) {
    INIT.call_once(|| {
        let registry = tracing_subscriber::registry().with(env_filter());

        // try_init: a test harness may already own the global subscriber.
        let installed = if json {
            registry
                .with(
                    fmt::layer()
                        .json()
                        .with_writer(std::io::stderr)
                        .with_target(true)
                        .with_thread_names(true)
                        .with_current_span(true),
                )
                .try_init()
        } else {
            registry
                .with(
                    fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_target(false)
                        .with_thread_names(true),
                )
                .try_init()
        };

        if installed.is_ok() {
            debug!(json, "tracing initialized");
        }
    });
}
