//! Logging setup: stdout plus an optional plain-text file mirror

use anyhow::Result;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

fn env_filter() -> Result<EnvFilter> {
    Ok(EnvFilter::from_default_env().add_directive("tripwire=info".parse()?))
}

/// Initialize logging
///
/// When `log_file` is set every event is also appended to it without ANSI
/// colours. The returned guard flushes the file writer and must be held for
/// the lifetime of the process.
pub fn init_logging(log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let stdout = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stdout)
        .with_filter(env_filter()?);

    let Some(path) = log_file else {
        tracing_subscriber::registry().with(stdout).init();
        return Ok(None);
    };

    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .ok_or_else(|| anyhow::anyhow!("log file '{}' has no file name", path.display()))?;
    std::fs::create_dir_all(dir)?;

    let appender = tracing_appender::rolling::never(dir, file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::registry()
        .with(stdout)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(env_filter()?),
        )
        .init();

    Ok(Some(guard))
}
