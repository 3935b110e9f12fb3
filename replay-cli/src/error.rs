use graphite::GraphiteError;
use replay_engine::ReplayError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Graphite error: {0}")]
    Graphite(#[from] GraphiteError),

    #[error("Replay error: {0}")]
    Replay(#[from] ReplayError),

    #[error("Failed to initialize logging: {0}")]
    Logging(String),
}
