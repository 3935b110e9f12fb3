//! Replay error types.

use std::path::PathBuf;

use graphite::GraphiteError;
use thiserror::Error;
use whisper::WhisperError;

/// Crate-specific result type.
pub type Result<T> = std::result::Result<T, ReplayError>;

/// Failure to derive a metric name from a file path.
#[derive(Error, Debug)]
pub enum NamingError {
    #[error(
        "path {} for whisper file does not live in base path {}",
        path.display(),
        base.display()
    )]
    OutOfScope { path: PathBuf, base: PathBuf },

    #[error("failed to resolve absolute path for {}: {source}", path.display())]
    Resolve {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failure to decode points from an archive file.
#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("failed to open archive {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: WhisperError,
    },

    #[error("failed to fetch points from {}: {source}", path.display())]
    Fetch {
        path: PathBuf,
        #[source]
        source: WhisperError,
    },

    #[error("archive task for {} failed: {reason}", path.display())]
    Task { path: PathBuf, reason: String },
}

/// Failure while walking the source tree.
#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("failed to walk {}: {source}", root.display())]
    Walk {
        root: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("path queue closed before discovery finished, no worker is running")]
    QueueClosed,
}

#[derive(Error, Debug)]
pub enum ReplayError {
    #[error(transparent)]
    Naming(#[from] NamingError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error("failed to deliver metrics: {0}")]
    Delivery(#[from] GraphiteError),

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("worker task failed: {0}")]
    Worker(String),
}

impl ReplayError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether the error only concerns a single file, as opposed to the whole run.
    pub fn is_per_file(&self) -> bool {
        matches!(self, Self::Naming(_) | Self::Archive(_) | Self::Delivery(_))
    }
}
