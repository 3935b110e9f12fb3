//! # Replay engine
//!
//! Replays the contents of whisper archives into Graphite.
//!
//! One discovery task walks the source tree and hands archive paths, one at
//! a time, to a fixed pool of workers over a rendezvous channel. Each worker
//! owns one Graphite connection and for every path:
//!
//! 1. derives the metric name from the path relative to the base directory
//! 2. reads the archive points inside the configured time window
//! 3. drops empty slots and converts the rest to [`graphite::Metric`]s
//! 4. waits on the shared [`RateLimiter`]
//! 5. delivers the batch with reconnect-and-retry
//!
//! A file that fails at any step is logged and skipped. The run ends when
//! discovery has handed off its last path and every worker is idle.

pub mod archive;
pub mod config;
pub mod delivery;
pub mod discovery;
pub mod error;
pub mod naming;
pub mod pool;
pub mod rate_limiter;
pub mod worker;

pub use archive::{ArchiveReader, WhisperReader, points_to_metrics};
pub use config::{DEFAULT_WORKERS, ReplayConfig, TimeWindow};
pub use delivery::{RetryPolicy, deliver};
pub use discovery::{discover, spawn_discovery};
pub use error::{ArchiveError, DiscoveryError, NamingError, ReplayError, Result};
pub use naming::metric_name;
pub use pool::{RunSummary, WorkerPool};
pub use rate_limiter::RateLimiter;
pub use worker::{SinkFactory, WorkerStats};
