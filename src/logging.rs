use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::level_filters::LevelFilter;
use tracing_appender::rolling::Rotation;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::MakeWriterExt;

pub const TUI_PREFIX: &str = "tui";
pub const CLI_PREFIX: &str = "cli";
const MAX_LOG_FILES: usize = 5;

pub fn log_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("logs")
}

/// `RUST_LOG` wins over the default; an explicit level wins over both.
fn filter_directive(log_level: Option<LevelFilter>, env_value: Option<String>) -> String {
    let level = log_level
        .map(|level| level.to_string().to_lowercase())
        .or(env_value.filter(|value| !value.trim().is_empty()))
        .unwrap_or_else(|| "info".to_string());
    if level.contains('=') {
        level
    } else {
        format!("{}={level}", env!("CARGO_PKG_NAME").replace('-', "_"))
    }
}

/// The TUI owns the terminal, so only CLI runs mirror logs to stderr.
pub fn enable_logging(
    prefix: &str,
    data_dir: &Path,
    log_level: Option<LevelFilter>,
    show_stderr: bool,
) -> Result<()> {
    let appender = tracing_appender::rolling::Builder::new()
        .rotation(Rotation::DAILY)
        .max_log_files(MAX_LOG_FILES)
        .filename_prefix(prefix)
        .filename_suffix("log")
        .build(log_dir(data_dir))?;

    let stderr = std::io::stderr.with_filter(move |_| show_stderr);
    let directive = filter_directive(log_level, std::env::var("RUST_LOG").ok());

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(directive))
        .with_ansi(false)
        .with_writer(stderr.and(appender))
        .try_init()
        .map_err(|err| anyhow::anyhow!("logging already initialised: {err}"))?;
    Ok(())
}
