//! Tracing subscriber setup: console output plus an optional rolling log file

use anyhow::Result;
use std::ffi::OsStr;
use std::path::Path;
use tracing_appender::{non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::{parse_level, LogRotation, LoggingConfig};

/// Filter used when `RUST_LOG` is unset
pub fn default_directives(level: tracing::Level) -> String {
    let level = level.to_string().to_lowercase();
    format!("mirror_sync={0},mirror_core={0},mirror={0}", level)
}

/// Install the global subscriber. Keep the returned guard alive for the
/// whole process or buffered file output is lost.
pub fn init(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let level = parse_level(&config.level)?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives(level)));

    let console_layer = fmt::layer().with_target(false).with_writer(std::io::stderr);

    let (file_layer, guard) = match &config.file {
        Some(log_path) => {
            let directory = match log_path.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => parent,
                _ => Path::new("."),
            };
            std::fs::create_dir_all(directory)?;
            let file_name = log_path.file_name().unwrap_or_else(|| OsStr::new("mirror.log"));

            let appender = match config.rotation {
                LogRotation::Daily => rolling::daily(directory, file_name),
                LogRotation::Hourly => rolling::hourly(directory, file_name),
                LogRotation::Never => rolling::never(directory, file_name),
            };
            let (writer, guard) = tracing_appender::non_blocking(appender);

            let layer = if config.json {
                fmt::layer()
                    .with_writer(writer)
                    .json()
                    .with_current_span(true)
                    .with_span_list(true)
                    .boxed()
            } else {
                fmt::layer().with_writer(writer).with_ansi(false).boxed()
            };
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    Ok(guard)
}
