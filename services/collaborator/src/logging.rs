//!
//! src/logging.rs
//!
//! Structured logging for the dashboard: one json (or pretty) line per
//! event, tagged with the pipeline span (run id, kind) it happened in
//!

use tracing_appender::non_blocking;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_error::ErrorLayer;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::{LogFormat, LoggingConfig};
use crate::errors::CollaboratorError;

/// Flushes buffered lines on drop; hold it for the life of `main`
pub struct LoggingGuard(#[allow(dead_code)] WorkerGuard);

pub fn init_logging(cfg: &LoggingConfig) -> Result<LoggingGuard, CollaboratorError> {
    let (writer, guard) = non_blocking(std::io::stdout());

    // RUST_LOG wins over the configured directives
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cfg.directives));

    let base = fmt::layer()
        .with_writer(writer)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .with_target(cfg.targets)
        .with_file(cfg.source_location)
        .with_line_number(cfg.source_location);

    let layer = match cfg.format {
        LogFormat::Json => base.json()
            .flatten_event(true)
            .with_current_span(true)
            .with_span_list(false)
            .boxed(),
        LogFormat::Pretty => base.with_ansi(cfg.ansi).boxed()
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .with(ErrorLayer::default())
        .try_init()
        .map_err(|e| CollaboratorError::Config(format!("logger already set: {e}")))?;

    Ok( LoggingGuard(guard) )
}
