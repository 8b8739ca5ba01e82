//! Structured logging for the Hive client.
//!
//! Console output goes through a `tracing-subscriber` fmt layer with an uptime
//! timer. Debug builds can additionally write JSON lines to a log directory,
//! which is the easiest way to reconstruct a reconnect or snapshot-ordering
//! problem after the fact.

use std::path::{Path, PathBuf};

use hive_config::DebugConfig;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter used when neither `RUST_LOG` nor the config provide one.
pub const DEFAULT_FILTER: &str = "info";

/// Name of the JSON log file written inside the configured log directory.
pub const LOG_FILE_NAME: &str = "hive.log";

/// Resolve the filter string from the debug config.
///
/// An empty `log_level` falls back to [`DEFAULT_FILTER`].
pub fn filter_directive(debug: Option<&DebugConfig>) -> String {
    match debug {
        Some(debug) if !debug.log_level.trim().is_empty() => debug.log_level.clone(),
        _ => DEFAULT_FILTER.to_string(),
    }
}

/// Path of the JSON log file for `log_dir`.
pub fn log_file_path(log_dir: &Path) -> PathBuf {
    log_dir.join(LOG_FILE_NAME)
}

/// Initialize the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over the config's `log_level`. When
/// `debug_build` is set and the config names a `log_dir`, a JSON file layer
/// is added next to the console layer.
///
/// ```no_run
/// use hive_config::Config;
///
/// let config = Config::default();
/// hive_log::init_logging(Some(&config.debug), cfg!(debug_assertions));
/// ```
pub fn init_logging(debug: Option<&DebugConfig>, debug_build: bool) {
    let filter_str = filter_directive(debug);
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&filter_str));

    let console_layer = fmt::layer()
        .with_target(true)
        .with_thread_names(true)
        .with_level(true)
        .with_timer(fmt::time::uptime());

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer);

    if debug_build
        && let Some(log_dir) = debug.and_then(|d| d.log_dir.as_deref())
        && std::fs::create_dir_all(log_dir).is_ok()
        && let Ok(log_file) = std::fs::File::create(log_file_path(log_dir))
    {
        let file_layer = fmt::layer()
            .with_writer(log_file)
            .with_ansi(false)
            .with_target(true)
            .with_timer(fmt::time::uptime())
            .json();

        subscriber.with(file_layer).init();
        return;
    }

    subscriber.init();
}
