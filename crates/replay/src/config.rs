//! Run configuration.

use std::path::PathBuf;

use crate::delivery::RetryPolicy;
use crate::error::{ReplayError, Result};

pub const DEFAULT_WORKERS: usize = 5;

/// Inclusive `[from, to]` range of epoch seconds to replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub from: i64,
    pub to: i64,
}

impl TimeWindow {
    pub fn new(from: i64, to: i64) -> Result<Self> {
        if from > to {
            return Err(ReplayError::config(format!(
                "time window start {from} is after its end {to}"
            )));
        }
        Ok(Self { from, to })
    }

    pub fn contains(&self, timestamp: i64) -> bool {
        (self.from..=self.to).contains(&timestamp)
    }
}

impl Default for TimeWindow {
    fn default() -> Self {
        Self {
            from: 0,
            to: i64::from(i32::MAX),
        }
    }
}

/// Everything a replay run needs apart from the sink and archive reader.
#[derive(Debug, Clone)]
pub struct ReplayConfig {
    /// Directory metric names are derived relative to.
    pub base_dir: PathBuf,
    /// Directory tree scanned for archives.
    pub source_dir: PathBuf,
    pub window: TimeWindow,
    pub workers: usize,
    /// Points per second across all workers; 0 disables limiting.
    pub points_per_second: u64,
    pub retry: RetryPolicy,
}

impl ReplayConfig {
    pub fn new(base_dir: impl Into<PathBuf>, source_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            source_dir: source_dir.into(),
            window: TimeWindow::default(),
            workers: DEFAULT_WORKERS,
            points_per_second: 0,
            retry: RetryPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_window(mut self, window: TimeWindow) -> Self {
        self.window = window;
        self
    }

    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    #[must_use]
    pub fn with_points_per_second(mut self, points_per_second: u64) -> Self {
        self.points_per_second = points_per_second;
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(ReplayError::config("at least one worker is required"));
        }
        if self.window.from > self.window.to {
            return Err(ReplayError::config(format!(
                "time window start {} is after its end {}",
                self.window.from, self.window.to
            )));
        }
        Ok(())
    }
}
