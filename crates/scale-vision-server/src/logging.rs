// crates/scale-vision-server/src/logging.rs
//
// JSON-lines logging: one object per line with ts/level/target/message and
// whatever fields the event carries, to stdout and to a rolling file under
// the configured log directory.

use std::fs;
use std::io;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use scale_vision_core::config::LoggingConfig;

/// Install the global subscriber. The returned guard flushes the file
/// writer on drop — keep it alive for the process lifetime.
pub fn init(config: &LoggingConfig, console: bool) -> Result<WorkerGuard> {
    fs::create_dir_all(&config.log_dir)
        .with_context(|| format!("create log dir {}", config.log_dir))?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.to_lowercase()));

    let appender = tracing_appender::rolling::daily(&config.log_dir, &config.json_log_file);
    let (file_writer, guard) = tracing_appender::non_blocking(appender);

    let file_layer = tracing_subscriber::fmt::layer()
        .json()
        .flatten_event(true)
        .with_current_span(false)
        .with_span_list(false)
        .with_writer(file_writer);

    let console_layer = console.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(false)
            .with_span_list(false)
            .with_writer(io::stdout)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(console_layer)
        .init();

    Ok(guard)
}
