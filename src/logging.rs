use color_eyre::{eyre::eyre, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LogConfig;

/// Environment variable that overrides the configured filter.
const LOG_ENV: &str = "TMDB_SW_LOG";

/// Install the global subscriber: stderr always, plus a daily-rolling file
/// when a log directory is configured.
///
/// The returned guard flushes the file writer on drop; keep it alive for the
/// whole process.
pub fn init(config: &LogConfig) -> Result<Option<WorkerGuard>> {
  let filter = match EnvFilter::try_from_env(LOG_ENV) {
    Ok(filter) => filter,
    Err(_) => EnvFilter::try_new(&config.level)
      .map_err(|e| eyre!("Invalid log level '{}': {}", config.level, e))?,
  };

  let stderr = fmt::layer().with_writer(std::io::stderr).with_target(false);

  let (file, guard) = match &config.dir {
    Some(dir) => {
      let appender = tracing_appender::rolling::daily(dir, "tmdb-sw.log");
      let (writer, guard) = tracing_appender::non_blocking(appender);
      (
        Some(fmt::layer().with_ansi(false).with_writer(writer)),
        Some(guard),
      )
    }
    None => (None, None),
  };

  tracing_subscriber::registry()
    .with(filter)
    .with(stderr)
    .with(file)
    .try_init()
    .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;

  Ok(guard)
}
