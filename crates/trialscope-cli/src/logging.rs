//! Tracing subscriber setup.

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber. Logs go to stderr unless `log_file` is
/// given, in which case they are appended to that file through a
/// non-blocking writer. Keep the returned guard alive until exit so
/// buffered lines get flushed.
pub fn init(log_file: Option<&Path>, json: bool) -> Result<Option<WorkerGuard>> {
    match log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let name = path
                .file_name()
                .with_context(|| format!("invalid log file path: {}", path.display()))?;
            std::fs::create_dir_all(dir)?;

            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
            let builder = tracing_subscriber::fmt()
                .with_env_filter(env_filter())
                .with_ansi(false)
                .with_writer(writer);
            let installed = if json {
                builder.json().try_init()
            } else {
                builder.try_init()
            };
            installed.map_err(|e| anyhow!("failed to install log subscriber: {}", e))?;
            Ok(Some(guard))
        }
        None => {
            let builder = tracing_subscriber::fmt()
                .with_env_filter(env_filter())
                .with_target(false)
                .with_writer(std::io::stderr);
            let installed = if json {
                builder.json().try_init()
            } else {
                builder.compact().try_init()
            };
            installed.map_err(|e| anyhow!("failed to install log subscriber: {}", e))?;
            Ok(None)
        }
    }
}
