use std::{fs::OpenOptions, path::Path, sync::Arc};

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::error::{QueueError, Result};

/// Install the process-wide logger.
///
/// Events go to the console and are appended to `log_file`. `RUST_LOG` takes
/// precedence over `default_filter`.
pub fn init(log_file: &Path, default_filter: &str) -> Result<()> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)
        .map_err(|e| QueueError::io(log_file, e))?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .map_err(|e| QueueError::Logging(e.to_string()))?;

    tracing_subscriber::registry()
        .with(filter)
        // both layers share the cached span fields, so neither may colour them
        .with(fmt::layer().with_ansi(false))
        .with(
            fmt::layer()
                .with_ansi(false)
                .with_writer(Arc::new(file)),
        )
        .try_init()
        .map_err(|e| QueueError::Logging(e.to_string()))
}
