//! Tracing setup for the binary.

use color_eyre::{eyre::eyre, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::store::DataDir;

/// Environment variable holding the log filter directive.
pub const LOG_ENV: &str = "JOURNAL_SYNC_LOG";

/// Build the filter from `JOURNAL_SYNC_LOG`, defaulting to `info`.
pub fn create_env_filter() -> EnvFilter {
  EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Log to a daily rolling file in the data dir, and to stderr when `verbose`.
///
/// Keep the returned guard alive for the life of the process or buffered
/// lines are lost on exit.
pub fn init(dir: &DataDir, verbose: bool) -> Result<WorkerGuard> {
  let appender = tracing_appender::rolling::daily(dir.log_dir(), "journal-sync.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);

  let file_layer = fmt::layer().with_writer(writer).with_ansi(false).with_target(true);
  let stderr_layer = verbose.then(|| fmt::layer().with_writer(std::io::stderr).with_target(false));

  tracing_subscriber::registry()
    .with(create_env_filter())
    .with(file_layer)
    .with(stderr_layer)
    .try_init()
    .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;

  Ok(guard)
}
