use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use byteorder::{BigEndian, ReadBytesExt};
use tracing::trace;

use crate::error::{Result, WhisperError};
use crate::header::{ArchiveInfo, Header, POINT_SIZE};

/// One decoded sample. A NaN value marks a slot with no data.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub timestamp: i64,
    pub value: f64,
}

/// A contiguous run of values at a fixed step, as returned by a fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeries {
    pub from: i64,
    pub until: i64,
    pub step: i64,
    pub values: Vec<f64>,
}

impl TimeSeries {
    fn empty() -> Self {
        Self {
            from: 0,
            until: 0,
            step: 0,
            values: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Pairs every value with the timestamp of its slot.
    pub fn points(&self) -> Vec<Point> {
        self.values
            .iter()
            .enumerate()
            .map(|(i, &value)| Point {
                timestamp: self.from + self.step * i as i64,
                value,
            })
            .collect()
    }
}

/// An open whisper file.
#[derive(Debug)]
pub struct Whisper {
    path: PathBuf,
    file: File,
    header: Header,
}

impl Whisper {
    /// Opens the file and parses its header.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let header = Header::parse(&mut BufReader::new(&file))?;
        header.check_extents(file.metadata()?.len())?;
        trace!(
            path = %path.display(),
            archives = header.archives.len(),
            aggregation = %header.metadata.aggregation,
            "Opened whisper file"
        );
        Ok(Self { path, file, header })
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Fetches the values stored between `from` and `until` relative to the
    /// current wall clock.
    pub fn fetch(&mut self, from: i64, until: i64) -> Result<TimeSeries> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or_default();
        self.fetch_at(from, until, now)
    }

    /// Fetches the values stored between `from` and `until`, treating `now` as
    /// the current time.
    ///
    /// The range is clamped to what the file can hold at `now`. The archive
    /// used is the most precise one whose retention reaches back to `from`.
    /// Slots that were never written, or that hold a point from an earlier lap
    /// of the ring, come back as NaN.
    pub fn fetch_at(&mut self, from: i64, until: i64, now: i64) -> Result<TimeSeries> {
        if from > until {
            return Err(WhisperError::InvalidTimeRange { from, until });
        }

        let oldest = now - i64::from(self.header.metadata.max_retention);
        if from > now || until < oldest {
            return Ok(TimeSeries::empty());
        }
        let from = from.max(oldest);
        let until = until.min(now);

        let diff = now - from;
        let archive = *self
            .header
            .archives
            .iter()
            .find(|archive| archive.retention() >= diff)
            .or(self.header.archives.last())
            .ok_or_else(|| WhisperError::invalid_header("file declares no archives"))?;

        let step = archive.step();
        let from_interval = archive.interval(from);
        let mut until_interval = archive.interval(until);

        let base_interval = self.read_base_interval(&archive)?;
        if base_interval == 0 {
            let count = ((until_interval - from_interval) / step).max(0) as usize;
            return Ok(TimeSeries {
                from: from_interval,
                until: until_interval,
                step,
                values: vec![f64::NAN; count],
            });
        }

        // A zero-length range still yields the next point.
        if from_interval == until_interval {
            until_interval += step;
        }

        let from_offset = archive.point_offset(base_interval, from_interval);
        let until_offset = archive.point_offset(base_interval, until_interval);
        let series = self.read_series(from_offset, until_offset, &archive)?;

        let mut values = vec![f64::NAN; series.len()];
        let mut current = from_interval;
        for (slot, (interval, value)) in values.iter_mut().zip(series) {
            if interval == current {
                *slot = value;
            }
            current += step;
        }

        Ok(TimeSeries {
            from: from_interval,
            until: until_interval,
            step,
            values,
        })
    }

    fn read_base_interval(&mut self, archive: &ArchiveInfo) -> Result<i64> {
        self.file.seek(SeekFrom::Start(u64::from(archive.offset)))?;
        Ok(i64::from(self.file.read_u32::<BigEndian>()?))
    }

    fn read_series(
        &mut self,
        start: u64,
        end: u64,
        archive: &ArchiveInfo,
    ) -> Result<Vec<(i64, f64)>> {
        let mut buf = Vec::new();
        if start < end {
            self.read_range(start, end, &mut buf)?;
        } else {
            self.read_range(start, archive.end(), &mut buf)?;
            self.read_range(u64::from(archive.offset), end, &mut buf)?;
        }

        let mut cursor = buf.as_slice();
        let mut points = Vec::with_capacity(buf.len() / POINT_SIZE as usize);
        while !cursor.is_empty() {
            let interval = cursor.read_u32::<BigEndian>()?;
            let value = cursor.read_f64::<BigEndian>()?;
            points.push((i64::from(interval), value));
        }
        Ok(points)
    }

    fn read_range(&mut self, start: u64, end: u64, buf: &mut Vec<u8>) -> Result<()> {
        let len = end.saturating_sub(start) as usize;
        if len == 0 {
            return Ok(());
        }
        let filled = buf.len();
        buf.resize(filled + len, 0);
        self.file.seek(SeekFrom::Start(start))?;
        self.file.read_exact(&mut buf[filled..])?;
        Ok(())
    }
}
