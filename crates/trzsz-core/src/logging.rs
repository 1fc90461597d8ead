//! Tracing integration for structured logging.
//!
//! The wrapper and the server binaries own the live terminal, so logs never
//! go to stdout or stderr. Logging is enabled by pointing `TRZSZ_LOG_FILE`
//! at a file; `TRZSZ_LOG_LEVEL` (or `RUST_LOG`) controls verbosity.

use std::path::Path;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::Result;

/// Environment variable naming the log file.
pub const LOG_FILE_ENV: &str = "TRZSZ_LOG_FILE";

/// Environment variable naming the log level.
pub const LOG_LEVEL_ENV: &str = "TRZSZ_LOG_LEVEL";

/// Initialize file logging if `TRZSZ_LOG_FILE` is set.
///
/// Returns without installing a subscriber when the variable is absent, so
/// the interactive byte stream stays clean by default.
pub fn init_logging() -> Result<()> {
    let path = match std::env::var(LOG_FILE_ENV) {
        Ok(p) if !p.is_empty() => p,
        _ => return Ok(()),
    };
    init_logging_to(Path::new(&path))
}

/// Initialize logging to the given file.
pub fn init_logging_to(path: &Path) -> Result<()> {
    let level = std::env::var(LOG_LEVEL_ENV).unwrap_or_else(|_| "info".to_string());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "trzsz={level},trzsz_core={level},trzsz_client={level},trzsz_server={level}"
        ))
    });

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(file)
                .with_ansi(false)
                .with_target(true),
        )
        .try_init()
        .map_err(|e| crate::TrzszError::Io(std::io::Error::other(e.to_string())))?;

    Ok(())
}
