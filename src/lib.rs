pub mod bus;
pub mod config;
pub mod coverage;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod models;
pub mod report;
pub mod retry;
pub mod server;
pub mod signals;
pub mod telemetry;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize tracing/logging
///
/// `RUST_LOG` wins over `log_level`. A `log_format` of `"json"` selects the
/// JSON formatter. Can only be called once.
pub fn init_tracing(log_level: &str, log_format: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(filter);
    if log_format.eq_ignore_ascii_case("json") {
        registry.with(fmt::layer().json().with_target(true)).init();
    } else {
        registry.with(fmt::layer().with_target(true)).init();
    }
}
