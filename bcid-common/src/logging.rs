//! Tracing subscriber setup shared by every stage invocation
//!
//! Logs go to stderr and, when configured, are appended to a log file in the
//! pipeline output directory so that every stage of a run shares one log.

use crate::config::LoggingSettings;
use crate::{Error, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global subscriber.
///
/// `RUST_LOG` takes precedence over `settings.level`. The returned guard must
/// be held until exit or buffered file output is lost.
pub fn init_logging(settings: &LoggingSettings, output_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter_layer = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.level))
        .map_err(|e| Error::Config(format!("Invalid log level {:?}: {}", settings.level, e)))?;

    let (file_layer, guard) = match (output_dir, settings.file.as_deref()) {
        (Some(dir), Some(file_name)) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::never(dir, file_name);
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_writer(non_blocking).with_ansi(false);
            (Some(layer), Some(guard))
        }
        _ => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(file_layer)
        .try_init()
        .map_err(|e| Error::Internal(format!("Logging already initialized: {}", e)))?;

    Ok(guard)
}
