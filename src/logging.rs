//! Installs the global `tracing` subscriber for the command-line tool.
//!
//! The library itself only emits events. Nothing is recorded unless one of
//! these functions is called once at startup.

use std::{
    fs::{create_dir_all, OpenOptions},
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error as ThisError;
use tracing::{subscriber::SetGlobalDefaultError, Level};
use tracing_subscriber::FmtSubscriber;

/// Where JSON log files are written
pub const LOG_DIR: &str = "./logs";

/// Sends human-readable events at `level` and above to stderr.
pub fn init_stderr(level: Level) -> Result<(), LoggingError> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

/// Writes JSON events at `level` and above to a new timestamped file in
/// `dir`, returning the file's path.
pub fn init_file(dir: impl AsRef<Path>, level: Level) -> Result<PathBuf, LoggingError> {
    let dir = dir.as_ref();
    create_dir_all(dir)?;
    let path = dir.join(format!(
        "stcp-{}.log",
        chrono::offset::Local::now().format("%y-%m-%d_%H-%M-%S")
    ));
    let file = OpenOptions::new()
        .write(true)
        .append(true)
        .create(true)
        .open(&path)?;
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(Arc::new(file))
        .json()
        .finish();
    // All events from every task land in the same file
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(path)
}

/// Maps a `-v` count to a level, starting from warnings.
pub fn level_for(verbosity: u8) -> Level {
    match verbosity {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

#[derive(Debug, ThisError)]
pub enum LoggingError {
    #[error("Could not create the log file: {0}")]
    Io(#[from] std::io::Error),
    #[error("A global subscriber is already installed")]
    AlreadyInstalled(#[from] SetGlobalDefaultError),
}
