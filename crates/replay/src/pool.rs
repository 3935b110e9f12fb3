//! Worker pool coordinating discovery, workers and the shared limiter.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::archive::{ArchiveReader, WhisperReader};
use crate::config::ReplayConfig;
use crate::discovery::spawn_discovery;
use crate::error::{ReplayError, Result};
use crate::rate_limiter::RateLimiter;
use crate::worker::{SinkFactory, WorkerContext, WorkerStats, run_worker};

/// Totals for a finished run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub files_discovered: usize,
    pub files_ok: u64,
    pub files_failed: u64,
    pub points_sent: u64,
    pub workers_started: usize,
    /// Workers whose sink could not be created.
    pub workers_failed: usize,
}

impl RunSummary {
    fn absorb(&mut self, stats: WorkerStats) {
        self.workers_started += 1;
        self.files_ok += stats.files_ok;
        self.files_failed += stats.files_failed;
        self.points_sent += stats.points_sent;
    }
}

/// Replays every archive under the source directory through a fixed set of workers.
pub struct WorkerPool<F, R = WhisperReader> {
    config: ReplayConfig,
    factory: Arc<F>,
    reader: Arc<R>,
}

impl<F: SinkFactory> WorkerPool<F, WhisperReader> {
    pub fn new(config: ReplayConfig, factory: F) -> Self {
        Self::with_reader(config, factory, WhisperReader)
    }
}

impl<F: SinkFactory, R: ArchiveReader> WorkerPool<F, R> {
    pub fn with_reader(config: ReplayConfig, factory: F, reader: R) -> Self {
        Self {
            config,
            factory: Arc::new(factory),
            reader: Arc::new(reader),
        }
    }

    pub fn config(&self) -> &ReplayConfig {
        &self.config
    }

    /// Runs discovery and the workers to completion.
    ///
    /// Per-file failures are counted in the summary. A failed walk, or a run
    /// where no worker could start while files were waiting, is an error.
    pub async fn run(&self) -> Result<RunSummary> {
        self.config.validate()?;

        let limiter = RateLimiter::new(self.config.points_per_second);
        let (queue_tx, queue_rx) = flume::bounded::<PathBuf>(0);
        let done = CancellationToken::new();
        let ctx = Arc::new(WorkerContext {
            base_dir: self.config.base_dir.clone(),
            window: self.config.window,
            retry: self.config.retry.clone(),
            limiter,
            reader: Arc::clone(&self.reader),
        });

        info!(
            workers = self.config.workers,
            source = %self.config.source_dir.display(),
            base = %self.config.base_dir.display(),
            from = self.config.window.from,
            to = self.config.window.to,
            pps = self.config.points_per_second,
            "Starting replay"
        );

        let mut workers = JoinSet::new();
        for id in 0..self.config.workers {
            let factory = Arc::clone(&self.factory);
            let queue = queue_rx.clone();
            let done = done.clone();
            let ctx = Arc::clone(&ctx);
            workers.spawn(async move {
                let sink = match factory.create().await {
                    Ok(sink) => sink,
                    Err(e) => {
                        error!(
                            worker = id,
                            error = %e,
                            "Failed to connect to Graphite, worker exiting"
                        );
                        return None;
                    }
                };
                Some(run_worker(id, sink, queue, done, ctx).await)
            });
        }
        // Only workers hold the queue, so it closes once they all exit.
        drop(queue_rx);

        let discovery = spawn_discovery(self.config.source_dir.clone(), queue_tx, done.clone());
        let discovered = match discovery.await {
            Ok(Ok(count)) => Ok(count),
            Ok(Err(e)) => Err(ReplayError::from(e)),
            Err(e) => Err(ReplayError::Worker(e.to_string())),
        };
        if let Err(e) = &discovered {
            error!(error = %e, "Discovery failed, stopping workers");
            done.cancel();
        }

        let mut summary = RunSummary::default();
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(Some(stats)) => summary.absorb(stats),
                Ok(None) => summary.workers_failed += 1,
                Err(e) => return Err(ReplayError::Worker(e.to_string())),
            }
        }
        summary.files_discovered = discovered?;

        info!(
            files = summary.files_discovered,
            ok = summary.files_ok,
            failed = summary.files_failed,
            points = summary.points_sent,
            workers_failed = summary.workers_failed,
            "Replay finished"
        );
        Ok(summary)
    }
}
