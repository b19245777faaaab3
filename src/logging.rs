//! Structured logging initialization backed by `tracing-subscriber`.

use tracing_subscriber::{fmt, EnvFilter};

use crate::config::AppConfig;

/// Installs the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured level; `log_json` switches to the
/// JSON formatter for log shipping. Safe to call once per process — later
/// calls are no-ops (tests may race to install).
pub fn init(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));

    if config.log_json {
        let _ = fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(true)
            .try_init();
    } else {
        let _ = fmt().with_env_filter(filter).try_init();
    }
}
