//! Source tree walk feeding the worker queue.

use std::path::{Path, PathBuf};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};
use walkdir::WalkDir;

use crate::error::DiscoveryError;
use crate::naming::ARCHIVE_SUFFIX;

/// Walks `root` and sends every regular `*.wsp` file to `queue`.
///
/// Entries are visited in file-name order and symlinks are not followed.
/// Each send blocks until a worker takes the path when `queue` is a
/// rendezvous channel. `done` is cancelled only after the last path was
/// handed off; on error it is left untouched.
pub fn discover(
    root: &Path,
    queue: &flume::Sender<PathBuf>,
    done: &CancellationToken,
) -> Result<usize, DiscoveryError> {
    let mut emitted = 0;

    for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
        let entry = entry.map_err(|source| DiscoveryError::Walk {
            root: root.to_path_buf(),
            source,
        })?;
        if !entry.file_type().is_file() || !is_archive(entry.file_name()) {
            continue;
        }

        trace!(path = %entry.path().display(), "Discovered archive");
        queue
            .send(entry.into_path())
            .map_err(|_| DiscoveryError::QueueClosed)?;
        emitted += 1;
    }

    debug!(root = %root.display(), files = emitted, "Discovery finished");
    done.cancel();
    Ok(emitted)
}

/// Runs [`discover`] on the blocking pool. The sender is dropped when the walk ends.
pub fn spawn_discovery(
    root: PathBuf,
    queue: flume::Sender<PathBuf>,
    done: CancellationToken,
) -> JoinHandle<Result<usize, DiscoveryError>> {
    tokio::task::spawn_blocking(move || discover(&root, &queue, &done))
}

fn is_archive(file_name: &std::ffi::OsStr) -> bool {
    file_name.to_string_lossy().ends_with(ARCHIVE_SUFFIX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Duration;

    fn touch(path: &Path) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, b"").unwrap();
    }

    /// Receives from a rendezvous queue until discovery signals completion.
    async fn collect(rx: flume::Receiver<PathBuf>, done: CancellationToken) -> Vec<PathBuf> {
        let mut paths = Vec::new();
        loop {
            tokio::select! {
                biased;
                received = rx.recv_async() => match received {
                    Ok(path) => paths.push(path),
                    Err(_) => break,
                },
                _ = done.cancelled() => break,
            }
        }
        paths
    }

    #[tokio::test]
    async fn test_emits_only_archives() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("b/metric2.wsp"));
        touch(&dir.path().join("a/metric1.wsp"));
        touch(&dir.path().join("a/deep/nested/metric3.wsp"));
        touch(&dir.path().join("a/readme.txt"));
        fs::create_dir_all(dir.path().join("dir.wsp")).unwrap();

        let (tx, rx) = flume::bounded(0);
        let done = CancellationToken::new();
        let walk = spawn_discovery(dir.path().to_path_buf(), tx, done.clone());

        let paths = tokio::time::timeout(Duration::from_secs(10), collect(rx, done.clone()))
            .await
            .unwrap();
        let emitted = walk.await.unwrap().unwrap();

        assert_eq!(emitted, 3);
        assert!(done.is_cancelled());
        assert_eq!(
            paths,
            vec![
                dir.path().join("a/deep/nested/metric3.wsp"),
                dir.path().join("a/metric1.wsp"),
                dir.path().join("b/metric2.wsp"),
            ]
        );
    }

    #[tokio::test]
    async fn test_empty_tree_completes_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = flume::bounded(0);
        let done = CancellationToken::new();

        let emitted = spawn_discovery(dir.path().to_path_buf(), tx, done.clone())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(emitted, 0);
        assert!(done.is_cancelled());
        assert!(collect(rx, done).await.is_empty());
    }

    #[tokio::test]
    async fn test_missing_root_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, _rx) = flume::bounded(0);
        let done = CancellationToken::new();

        let err = spawn_discovery(dir.path().join("missing"), tx, done.clone())
            .await
            .unwrap()
            .unwrap_err();

        assert!(matches!(err, DiscoveryError::Walk { .. }));
        assert!(!done.is_cancelled());
    }

    #[test]
    fn test_closed_queue_stops_walk() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("metric.wsp"));
        let (tx, rx) = flume::bounded(0);
        drop(rx);
        let done = CancellationToken::new();

        let err = discover(dir.path(), &tx, &done).unwrap_err();

        assert!(matches!(err, DiscoveryError::QueueClosed));
        assert!(!done.is_cancelled());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_are_not_followed() {
        let dir = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        touch(&outside.path().join("linked.wsp"));
        touch(&dir.path().join("real.wsp"));
        std::os::unix::fs::symlink(outside.path(), dir.path().join("link")).unwrap();
        std::os::unix::fs::symlink(
            outside.path().join("linked.wsp"),
            dir.path().join("file-link.wsp"),
        )
        .unwrap();

        let (tx, rx) = flume::unbounded();
        let done = CancellationToken::new();
        let emitted = discover(dir.path(), &tx, &done).unwrap();

        assert_eq!(emitted, 1);
        assert_eq!(rx.try_recv().unwrap(), dir.path().join("real.wsp"));
    }
}
