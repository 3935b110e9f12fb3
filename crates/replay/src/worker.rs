//! Per-worker replay loop.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use graphite::{Graphite, GraphiteConfig, GraphiteError, MetricSink};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span};
use whisper::Point;

use crate::archive::{ArchiveReader, points_to_metrics};
use crate::config::TimeWindow;
use crate::delivery::{RetryPolicy, deliver};
use crate::error::{ArchiveError, Result};
use crate::naming::metric_name;
use crate::rate_limiter::RateLimiter;

/// Opens one sink per worker.
#[async_trait]
pub trait SinkFactory: Send + Sync + 'static {
    type Sink: MetricSink + 'static;

    /// Creates a connected sink. A failure takes the calling worker out of the run.
    async fn create(&self) -> std::result::Result<Self::Sink, GraphiteError>;
}

#[async_trait]
impl SinkFactory for GraphiteConfig {
    type Sink = Graphite;

    async fn create(&self) -> std::result::Result<Graphite, GraphiteError> {
        Graphite::connect_new(self.clone()).await
    }
}

/// What one worker got through.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub files_ok: u64,
    pub files_failed: u64,
    pub points_sent: u64,
}

/// State shared by all workers of a run.
pub(crate) struct WorkerContext<R> {
    pub base_dir: PathBuf,
    pub window: TimeWindow,
    pub retry: RetryPolicy,
    pub limiter: RateLimiter,
    pub reader: Arc<R>,
}

/// Takes paths from `queue` until discovery is done or the queue closes.
///
/// A file that fails is logged and skipped; the worker moves on.
pub(crate) async fn run_worker<S, R>(
    id: usize,
    mut sink: S,
    queue: flume::Receiver<PathBuf>,
    done: CancellationToken,
    ctx: Arc<WorkerContext<R>>,
) -> WorkerStats
where
    S: MetricSink,
    R: ArchiveReader,
{
    let mut stats = WorkerStats::default();

    loop {
        let path = tokio::select! {
            biased;
            received = queue.recv_async() => match received {
                Ok(path) => path,
                Err(_) => break,
            },
            _ = done.cancelled() => break,
        };

        let span = info_span!("replay", worker = id, path = %path.display());
        match replay_file(&mut sink, &path, &ctx).instrument(span).await {
            Ok(sent) => {
                info!(worker = id, "OK: {}", path.display());
                stats.files_ok += 1;
                stats.points_sent += sent as u64;
            }
            Err(e) => {
                error!(worker = id, path = %path.display(), error = %e, "Failed to replay file");
                stats.files_failed += 1;
            }
        }
    }

    debug!(worker = id, ?stats, "Worker finished");
    stats
}

/// Names, reads, filters, throttles and delivers one archive.
async fn replay_file<S, R>(sink: &mut S, path: &Path, ctx: &WorkerContext<R>) -> Result<usize>
where
    S: MetricSink + ?Sized,
    R: ArchiveReader,
{
    let name = metric_name(path, &ctx.base_dir)?;
    let points = read_points(Arc::clone(&ctx.reader), path, ctx.window).await?;
    let metrics = points_to_metrics(&name, &points, ctx.window);
    if metrics.is_empty() {
        debug!(metric = %name, "No points in window");
        return Ok(0);
    }

    ctx.limiter.limit(metrics.len() as u64).await;
    let sent = deliver(sink, &metrics, &ctx.retry).await?;
    debug!(metric = %name, points = sent, "Delivered");
    Ok(sent)
}

async fn read_points<R: ArchiveReader>(
    reader: Arc<R>,
    path: &Path,
    window: TimeWindow,
) -> std::result::Result<Vec<Point>, ArchiveError> {
    let task_path = path.to_path_buf();
    tokio::task::spawn_blocking(move || reader.fetch(&task_path, window))
        .await
        .map_err(|e| ArchiveError::Task {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReplayError;
    use graphite::Metric;
    use std::io;
    use std::time::Duration;

    /// Reader serving fixed points, failing for paths containing "broken".
    struct FixedReader(Vec<Point>);

    impl ArchiveReader for FixedReader {
        fn fetch(
            &self,
            path: &Path,
            _window: TimeWindow,
        ) -> std::result::Result<Vec<Point>, ArchiveError> {
            if path.to_string_lossy().contains("broken") {
                return Err(ArchiveError::Open {
                    path: path.to_path_buf(),
                    source: io::Error::from(io::ErrorKind::NotFound).into(),
                });
            }
            Ok(self.0.clone())
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        sent: Vec<Metric>,
        fail: bool,
    }

    #[async_trait]
    impl MetricSink for RecordingSink {
        async fn connect(&mut self) -> graphite::Result<()> {
            Ok(())
        }

        async fn send_metrics(&mut self, metrics: &[Metric]) -> graphite::Result<usize> {
            if self.fail {
                return Err(GraphiteError::Io(io::Error::from(io::ErrorKind::BrokenPipe)));
            }
            self.sent.extend_from_slice(metrics);
            Ok(metrics.len())
        }
    }

    fn context(points: Vec<Point>, window: TimeWindow) -> Arc<WorkerContext<FixedReader>> {
        Arc::new(WorkerContext {
            base_dir: PathBuf::from("/data/whisper"),
            window,
            retry: RetryPolicy::new(1),
            limiter: RateLimiter::disabled(),
            reader: Arc::new(FixedReader(points)),
        })
    }

    #[tokio::test]
    async fn test_replay_file_filters_and_names() {
        let window = TimeWindow::new(100, 200).unwrap();
        let ctx = context(
            vec![
                Point { timestamp: 40, value: 1.0 },
                Point { timestamp: 100, value: 2.0 },
                Point { timestamp: 160, value: f64::NAN },
                Point { timestamp: 200, value: 3.0 },
            ],
            window,
        );
        let mut sink = RecordingSink::default();

        let sent = replay_file(&mut sink, Path::new("/data/whisper/host/cpu.wsp"), &ctx)
            .await
            .unwrap();

        assert_eq!(sent, 2);
        assert_eq!(
            sink.sent,
            vec![
                Metric::from_f64("host.cpu", 2.0, 100),
                Metric::from_f64("host.cpu", 3.0, 200),
            ]
        );
    }

    #[tokio::test]
    async fn test_replay_file_errors() {
        let ctx = context(vec![Point { timestamp: 100, value: 1.0 }], TimeWindow::default());
        let mut sink = RecordingSink::default();

        let err = replay_file(&mut sink, Path::new("/elsewhere/cpu.wsp"), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, ReplayError::Naming(_)));

        let err = replay_file(&mut sink, Path::new("/data/whisper/broken.wsp"), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, ReplayError::Archive(_)));

        let mut failing = RecordingSink {
            fail: true,
            ..Default::default()
        };
        let err = replay_file(&mut failing, Path::new("/data/whisper/cpu.wsp"), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, ReplayError::Delivery(_)));
        assert!(err.is_per_file());
    }

    #[tokio::test]
    async fn test_worker_survives_bad_files_and_stops_on_done() {
        let ctx = context(vec![Point { timestamp: 100, value: 1.0 }], TimeWindow::default());
        let (tx, rx) = flume::unbounded();
        let done = CancellationToken::new();

        tx.send(PathBuf::from("/data/whisper/a.wsp")).unwrap();
        tx.send(PathBuf::from("/data/whisper/broken.wsp")).unwrap();
        tx.send(PathBuf::from("/data/whisper/b.wsp")).unwrap();

        let worker = tokio::spawn(run_worker(
            0,
            RecordingSink::default(),
            rx,
            done.clone(),
            ctx,
        ));

        while !tx.is_empty() {
            tokio::task::yield_now().await;
        }
        done.cancel();
        // `tx` is still alive here, so only the done signal can end the loop.
        let stats = tokio::time::timeout(Duration::from_secs(5), worker)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(
            stats,
            WorkerStats {
                files_ok: 2,
                files_failed: 1,
                points_sent: 2,
            }
        );
        drop(tx);
    }

    #[tokio::test]
    async fn test_worker_stops_when_queue_closes() {
        let ctx = context(Vec::new(), TimeWindow::default());
        let (tx, rx) = flume::unbounded::<PathBuf>();
        tx.send(PathBuf::from("/data/whisper/empty.wsp")).unwrap();
        drop(tx);

        let stats = run_worker(0, RecordingSink::default(), rx, CancellationToken::new(), ctx).await;

        assert_eq!(stats.files_ok, 1);
        assert_eq!(stats.points_sent, 0);
    }
}
