//! Tracing subscriber setup for the `sectionleader` binary.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::{LeaderError, LeaderResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Keeps the file writer alive. Buffered lines are flushed when it drops.
#[derive(Debug)]
pub struct LogGuard {
    _file_guard: Option<WorkerGuard>,
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Installs the global subscriber.
///
/// `RUST_LOG` wins over `verbose`. With a `log_file` the output goes to that file through a
/// non-blocking writer instead of stderr.
pub fn init_logging(verbose: bool, log_file: Option<&Path>) -> LeaderResult<LogGuard> {
    let filter = build_filter(verbose, std::env::var("RUST_LOG").ok().as_deref());

    let file_guard = match log_file {
        Some(path) => {
            let dir = match path.parent() {
                Some(dir) if !dir.as_os_str().is_empty() => dir,
                _ => Path::new("."),
            };
            let file_name = path.file_name().ok_or_else(|| {
                LeaderError::InvalidConfig(format!("log file has no name: {}", path.display()))
            })?;

            std::fs::create_dir_all(dir)?;
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file_name));

            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(writer).with_ansi(false))
                .try_init()
                .map_err(|e| LeaderError::custom(anyhow::anyhow!("{e}")))?;

            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .try_init()
                .map_err(|e| LeaderError::custom(anyhow::anyhow!("{e}")))?;

            None
        }
    };

    Ok(LogGuard {
        _file_guard: file_guard,
    })
}

fn build_filter(verbose: bool, directives: Option<&str>) -> EnvFilter {
    let fallback = if verbose { "debug" } else { "info" };
    directives
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(fallback))
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
