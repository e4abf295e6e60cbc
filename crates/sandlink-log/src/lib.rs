//! Structured logging for the sandlink binaries.
//!
//! Console output carries uptime, target and thread name, which tells the
//! dispatch threads (`sandlink-server`, `sandlink-viewer-net`) apart from the
//! application thread. Debug builds can also write JSON lines to a file.

use std::path::{Path, PathBuf};

use sandlink_config::Config;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter used when neither `RUST_LOG` nor the config sets one.
pub const DEFAULT_FILTER: &str = "info";

/// Name of the JSON log file written in debug builds.
pub const LOG_FILE_NAME: &str = "sandlink.log";

/// Initialize the global tracing subscriber.
///
/// `RUST_LOG` takes precedence, then `debug.log_level` from `config`, then
/// [`DEFAULT_FILTER`]. In debug builds with a `log_dir`, a JSON file layer is
/// added as well.
///
/// ```no_run
/// use sandlink_config::Config;
/// use sandlink_log::init_logging;
///
/// let config = Config::default();
/// init_logging(None, false, Some(&config));
/// ```
pub fn init_logging(log_dir: Option<&Path>, debug_build: bool, config: Option<&Config>) {
    let directive = filter_directive(config);
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&directive));

    let console_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(true)
        .with_level(true)
        .with_timer(fmt::time::uptime());

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer);

    if debug_build
        && let Some(log_dir) = log_dir
        && std::fs::create_dir_all(log_dir).is_ok()
        && let Ok(log_file) = std::fs::File::create(log_file_path(log_dir))
    {
        let file_layer = fmt::layer()
            .with_writer(log_file)
            .with_ansi(false)
            .with_target(true)
            .with_thread_names(true)
            .with_timer(fmt::time::uptime())
            .json();

        subscriber.with(file_layer).init();
        tracing::info!(
            filter = %directive,
            file = %log_file_path(log_dir).display(),
            "Logging initialized"
        );
        return;
    }

    subscriber.init();
    tracing::info!(filter = %directive, "Logging initialized");
}

/// The filter directive implied by `config`, ignoring `RUST_LOG`.
pub fn filter_directive(config: Option<&Config>) -> String {
    config
        .map(|config| config.debug.log_level.trim())
        .filter(|level| !level.is_empty())
        .unwrap_or(DEFAULT_FILTER)
        .to_string()
}

/// Where the JSON log goes inside `log_dir`.
pub fn log_file_path(log_dir: &Path) -> PathBuf {
    log_dir.join(LOG_FILE_NAME)
}
