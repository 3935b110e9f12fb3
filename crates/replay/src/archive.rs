//! Archive reading seam.

use std::path::Path;

use graphite::Metric;
use whisper::{Point, Whisper};

use crate::config::TimeWindow;
use crate::error::ArchiveError;

/// Decodes the points of one archive file.
///
/// Implementations do blocking file IO; callers run them on the blocking pool.
pub trait ArchiveReader: Send + Sync + 'static {
    /// Points of `path` whose timestamps fall in `window`. Missing slots come
    /// back as NaN values.
    fn fetch(&self, path: &Path, window: TimeWindow) -> Result<Vec<Point>, ArchiveError>;
}

/// [`ArchiveReader`] for whisper files.
#[derive(Debug, Clone, Copy, Default)]
pub struct WhisperReader;

impl ArchiveReader for WhisperReader {
    fn fetch(&self, path: &Path, window: TimeWindow) -> Result<Vec<Point>, ArchiveError> {
        let mut file = Whisper::open(path).map_err(|source| ArchiveError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let series = file
            .fetch(window.from, window.to)
            .map_err(|source| ArchiveError::Fetch {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(series.points())
    }
}

/// Turns decoded points into metrics named `name`.
///
/// NaN points and points outside `window` are dropped, whatever the reader
/// returned.
pub fn points_to_metrics(name: &str, points: &[Point], window: TimeWindow) -> Vec<Metric> {
    points
        .iter()
        .filter(|point| !point.value.is_nan() && window.contains(point.timestamp))
        .map(|point| Metric::from_f64(name, point.value, point.timestamp))
        .collect()
}
