use thiserror::Error;

/// Crate-specific result type.
pub type Result<T> = std::result::Result<T, WhisperError>;

/// Errors raised while reading or writing a whisper archive.
#[derive(Error, Debug)]
pub enum WhisperError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid whisper header: {reason}")]
    InvalidHeader { reason: String },

    #[error("unknown aggregation method: {0}")]
    UnknownAggregation(u32),

    #[error("invalid time interval: from time {from} is after until time {until}")]
    InvalidTimeRange { from: i64, until: i64 },
}

impl WhisperError {
    pub fn invalid_header(reason: impl Into<String>) -> Self {
        Self::InvalidHeader {
            reason: reason.into(),
        }
    }
}
