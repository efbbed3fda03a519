//! Error types shared by every stage of a migration.
use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::workflow::Phase;

/// A condition that must hold before any device is touched.
#[derive(Debug, Error)]
pub enum PreconditionError {
    #[error("required tool not found: {}", .0.display())]
    MissingTool(PathBuf),

    #[error("flash encryption key not found: {}", .0.display())]
    MissingKeyFile(PathBuf),

    #[error("failed to open [{port}]: {reason}")]
    PortUnavailable { port: String, reason: String },

    #[error("staged image(s) already exist: {}", display_paths(.0))]
    StagedImagesPresent(Vec<PathBuf>),
}

/// Errors produced by the core library.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Precondition(#[from] PreconditionError),

    #[error("{tool} failed on [{artifact}] with exit status {status}")]
    ToolFailed {
        tool: &'static str,
        artifact: String,
        status: i32,
    },

    #[error("failed to launch {tool}")]
    ToolLaunch {
        tool: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("failed to access [{}]", .path.display())]
    FileAccess {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("partition table [{}] is {len} bytes, expected {expected}", .path.display())]
    PartitionTableTooShort {
        path: PathBuf,
        len: usize,
        expected: usize,
    },

    #[error("partition table record {index} is truncated ({available} of 32 bytes)")]
    TruncatedRecord { index: usize, available: usize },

    #[error("aborted by operator before the {0} phase")]
    Declined(Phase),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    pub(crate) fn file_access(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::FileAccess {
            path: path.into(),
            source,
        }
    }
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
