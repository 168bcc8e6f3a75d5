//! Logging setup.
//!
//! `RUST_LOG` takes precedence; otherwise the level is `info`, or `debug`
//! when `--debug` is given.

use std::sync::Once;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::core::config::LogFormat;

static INIT: Once = Once::new();

/// Install the global subscriber. Later calls do nothing.
///
/// # Example
///
/// ```rust
/// use repogate::core::config::LogFormat;
/// use repogate::observability::init_logging;
///
/// init_logging(LogFormat::Pretty, false);
/// ```
pub fn init_logging(format: LogFormat, debug: bool) {
    INIT.call_once(|| {
        let default_level = if debug { "debug" } else { "info" };
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

        // A subscriber installed by a test harness wins.
        let _ = match format {
            LogFormat::Json => tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json())
                .try_init(),
            LogFormat::Pretty => tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().pretty())
                .try_init(),
        };
    });
}
