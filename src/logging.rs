use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "rally_sync=info";
const LOG_FILE: &str = "rally-sync.log";

/// Where log output goes.
#[derive(Debug, Clone)]
pub enum LogTarget {
  /// Daily rolling file in the given directory
  File(PathBuf),
  Stderr,
}

impl LogTarget {
  /// `$XDG_DATA_HOME/rally-sync/logs`, or stderr when no data directory exists.
  pub fn default_file() -> Self {
    match dirs::data_dir() {
      Some(dir) => Self::File(dir.join("rally-sync").join("logs")),
      None => Self::Stderr,
    }
  }
}

fn env_filter() -> EnvFilter {
  EnvFilter::builder().parse_lossy(
    std::env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_FILTER.to_string()),
  )
}

/// Install the global subscriber.
///
/// For file output the returned guard must be held until exit so buffered
/// lines are flushed.
pub fn init(target: LogTarget) -> Result<Option<WorkerGuard>> {
  match target {
    LogTarget::File(dir) => {
      std::fs::create_dir_all(&dir)
        .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;

      let file_appender = RollingFileAppender::new(Rotation::DAILY, &dir, LOG_FILE);
      let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

      tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_target(true)
        .with_ansi(false)
        .with_writer(non_blocking)
        .try_init()
        .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;

      Ok(Some(guard))
    }
    LogTarget::Stderr => {
      tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;

      Ok(None)
    }
  }
}
