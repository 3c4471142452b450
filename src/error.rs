use std::path::PathBuf;

use thiserror::Error;

/// Invalid watcher configuration. Raised once, at construction, and never recovered.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("restart delay must be a non-negative finite number of milliseconds, got {0}")]
    InvalidDelay(f64),

    #[error("you can use exec or script, but not both")]
    ExecAndScript,

    #[error("watch pattern #{index} is empty")]
    EmptyWatchPattern { index: usize },

    #[error("extension #{index} is empty")]
    EmptyExtension { index: usize },

    #[error("extension `{extension}` does not form a valid glob: {message}")]
    InvalidExtension { extension: String, message: String },

    #[error("cannot determine the working directory: {0}")]
    WorkingDirectory(String),
}

/// Failures reported through the `error` notification.
///
/// None of these stop the engine; the caller decides whether they are fatal.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum WatchError {
    /// A path could not be stat'ed or a native watcher could not be opened for it.
    #[error("setup error: {}: {message}", path.display())]
    Setup { path: PathBuf, message: String },

    /// A native watcher failed after setup; its path is no longer watched.
    #[error("fs watcher error: {}: {message}", path.display())]
    FsWatcher { path: PathBuf, message: String },

    /// Closing a watcher during `stop()` failed.
    #[error("stop error: {}: {message}", path.display())]
    Stop { path: PathBuf, message: String },
}

impl WatchError {
    /// Short tag naming the phase the failure happened in.
    pub fn context(&self) -> &'static str {
        match self {
            Self::Setup { .. } => "setup error",
            Self::FsWatcher { .. } => "fs watcher error",
            Self::Stop { .. } => "stop error",
        }
    }

    pub fn path(&self) -> &PathBuf {
        match self {
            Self::Setup { path, .. } | Self::FsWatcher { path, .. } | Self::Stop { path, .. } => {
                path
            }
        }
    }
}

/// Child process failures, reported through the `proc-error` notification.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProcessError {
    #[error("failed to spawn `{program}`: {message}")]
    Spawn { program: String, message: String },

    #[error("failed to wait for child process: {0}")]
    Wait(String),
}
