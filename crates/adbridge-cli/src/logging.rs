use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn env_filter(level: Option<&str>) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.unwrap_or("info")))
}

/// Server mode: everything goes to stderr.
pub(crate) fn init_stderr(level: Option<&str>) {
    tracing_subscriber::registry()
        .with(env_filter(level))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

pub(crate) fn log_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("adbridge")
        .join("log")
}

/// Shell mode: logs go to a file so the prompt stays readable. The guard
/// must live until exit or buffered lines are lost.
pub(crate) fn init_file(level: Option<&str>) -> Option<(PathBuf, WorkerGuard)> {
    let dir = log_dir();
    std::fs::create_dir_all(&dir).ok()?;
    let path = dir.join("adbridge.log");
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .ok()?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file);
    tracing_subscriber::registry()
        .with(env_filter(level))
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .init();
    Some((path, guard))
}
