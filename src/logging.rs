use color_eyre::{eyre::eyre, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

const LOG_FILE_PREFIX: &str = "shopsync.log";

/// Install the global subscriber.
///
/// `SHOPSYNC_LOG` (then `RUST_LOG`) overrides the configured level. Output
/// goes to a daily-rotated file when a directory is configured, else stderr.
/// Keep the returned guard alive until exit or buffered lines are lost.
pub fn init(config: &LoggingConfig) -> Result<WorkerGuard> {
  let env_filter = EnvFilter::try_from_env("SHOPSYNC_LOG")
    .or_else(|_| EnvFilter::try_from_default_env())
    .or_else(|_| EnvFilter::try_new(&config.level))
    .map_err(|e| eyre!("Invalid log filter {:?}: {}", config.level, e))?;

  let (writer, guard) = match &config.directory {
    Some(directory) => {
      std::fs::create_dir_all(directory)
        .map_err(|e| eyre!("Failed to create log directory {}: {}", directory.display(), e))?;
      tracing_appender::non_blocking(tracing_appender::rolling::daily(directory, LOG_FILE_PREFIX))
    }
    None => tracing_appender::non_blocking(std::io::stderr()),
  };

  tracing_subscriber::registry()
    .with(env_filter)
    .with(
      tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(config.directory.is_none())
        .with_target(false),
    )
    .try_init()
    .map_err(|e| eyre!("Failed to init subscriber: {}", e))?;

  tracing::debug!(level = %config.level, directory = ?config.directory, "logging initialized");
  Ok(guard)
}
