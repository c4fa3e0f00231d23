//! Logging setup for the clearing binary.
//!
//! Settlement outcomes always go to the rolling file. The console copy is
//! optional so that production can run with file output only.

use crate::config::AppConfig;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::RollingFileAppender;
use tracing_subscriber::{EnvFilter, Layer, fmt, prelude::*};

/// Noisy dependencies capped regardless of `log_level`.
const QUIET_TARGETS: &[&str] = &["sqlx=warn"];

fn file_appender(config: &AppConfig) -> RollingFileAppender {
    match config.rotation.as_str() {
        "hourly" => tracing_appender::rolling::hourly(&config.log_dir, &config.log_file),
        "daily" => tracing_appender::rolling::daily(&config.log_dir, &config.log_file),
        _ => tracing_appender::rolling::never(&config.log_dir, &config.log_file),
    }
}

/// Default filter when `RUST_LOG` is unset.
pub fn filter_directives(log_level: &str) -> String {
    std::iter::once(log_level)
        .chain(QUIET_TARGETS.iter().copied())
        .collect::<Vec<_>>()
        .join(",")
}

/// Install the global subscriber. Keep the returned guard alive for the life
/// of the process or buffered file output is lost.
pub fn init_logging(config: &AppConfig) -> WorkerGuard {
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender(config));

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directives(&config.log_level)));

    let file_layer = if config.use_json {
        fmt::layer()
            .json()
            .with_target(true)
            .with_writer(file_writer)
            .with_ansi(false)
            .boxed()
    } else {
        fmt::layer()
            .with_target(false)
            .with_writer(file_writer)
            .with_ansi(false)
            .boxed()
    };

    let stdout_layer = config
        .log_stdout
        .then(|| fmt::layer().with_target(false).with_ansi(true));

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();

    guard
}
