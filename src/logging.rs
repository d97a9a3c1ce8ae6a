//! Tracing setup for the binary.
//!
//! Logs go to `dexfetch.log` in the configured directory so stdout stays free for
//! output. The filter comes from `DEXFETCH_LOG`, falling back to the configured one.

use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::LogConfig;

pub const LOG_ENV: &str = "DEXFETCH_LOG";
pub const LOG_FILE: &str = "dexfetch.log";

pub fn log_dir(config: &LogConfig) -> Result<PathBuf> {
  match &config.dir {
    Some(dir) => Ok(dir.clone()),
    None => dirs::data_dir()
      .map(|d| d.join("dexfetch"))
      .ok_or_else(|| eyre!("Could not determine data directory")),
  }
}

fn filter(config: &LogConfig) -> EnvFilter {
  EnvFilter::try_from_env(LOG_ENV)
    .or_else(|_| EnvFilter::try_new(&config.filter))
    .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber.
///
/// Keep the returned guard alive for the life of the program; dropping it flushes
/// and stops the file writer. With `verbose`, logs are mirrored to stderr.
pub fn init(config: &LogConfig, verbose: bool) -> Result<WorkerGuard> {
  let dir = log_dir(config)?;
  std::fs::create_dir_all(&dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;

  let file_appender = tracing_appender::rolling::never(&dir, LOG_FILE);
  let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

  let file_layer = fmt::layer()
    .with_writer(file_writer)
    .with_target(true)
    .with_ansi(false)
    .with_filter(filter(config));

  let stderr_layer = verbose.then(|| {
    fmt::layer()
      .with_writer(std::io::stderr)
      .with_target(false)
      .with_filter(filter(config))
  });

  tracing_subscriber::registry()
    .with(file_layer)
    .with(stderr_layer)
    .try_init()
    .map_err(|e| eyre!("Failed to install tracing subscriber: {}", e))?;

  Ok(guard)
}
