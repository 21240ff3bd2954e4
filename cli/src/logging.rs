//! Tracing setup for the terminal client.
//!
//! Logs go to `armin.log` in the platform data directory so they never
//! interleave with the conversation on stdout.

use config::PathManager;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

const DEFAULT_FILTER: &str = "info,armin_core=debug,llm=info";

fn filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Install the global subscriber. Keep the returned guard alive for the
/// whole process or buffered lines are lost.
pub fn init_logging() -> Option<WorkerGuard> {
    let Some(path) = PathManager::log_file_path() else {
        init_stderr_logging();
        return None;
    };

    if let Some(parent) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            eprintln!("[armin] Failed to create log directory {:?}: {}", parent, e);
        }
    }

    let file = match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
    {
        Ok(file) => file,
        Err(e) => {
            eprintln!("[armin] Failed to open log file {:?}: {}", path, e);
            init_stderr_logging();
            return None;
        }
    };

    let (non_blocking, guard) = tracing_appender::non_blocking(file);
    let subscriber = tracing_subscriber::registry().with(filter()).with(
        fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true)
            .with_file(true)
            .with_line_number(true),
    );

    match tracing::subscriber::set_global_default(subscriber) {
        Ok(()) => tracing::info!("Logging initialized, writing to {:?}", path),
        Err(e) => eprintln!("[armin] Failed to set tracing subscriber: {}", e),
    }
    Some(guard)
}

fn init_stderr_logging() {
    let subscriber = tracing_subscriber::registry().with(filter()).with(
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(true)
            .with_target(true),
    );
    let _ = tracing::subscriber::set_global_default(subscriber);
}
