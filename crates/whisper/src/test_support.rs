//! Whisper file builders for tests.
//!
//! This module is available for local whisper tests and optionally for
//! downstream crate tests when the `test-utils` feature is enabled.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{Result, WhisperError};
use crate::header::{AggregationMethod, ArchiveInfo, Header, Metadata, POINT_SIZE};

/// Resolution of one archive to create.
#[derive(Debug, Clone, Copy)]
pub struct ArchiveSpec {
    pub seconds_per_point: u32,
    pub points: u32,
}

/// Writes raw points into a whisper file without any cross-archive propagation.
pub struct WhisperWriter {
    path: PathBuf,
    header: Header,
}

impl WhisperWriter {
    /// Creates a zero-filled whisper file with the given archives, most precise first.
    pub fn create(
        path: impl AsRef<Path>,
        archives: &[ArchiveSpec],
        aggregation: AggregationMethod,
        x_files_factor: f32,
    ) -> Result<Self> {
        if archives.is_empty() {
            return Err(WhisperError::invalid_header("at least one archive is required"));
        }

        let mut offset = crate::header::METADATA_SIZE
            + archives.len() as u64 * crate::header::ARCHIVE_INFO_SIZE;
        let mut infos = Vec::with_capacity(archives.len());
        for spec in archives {
            infos.push(ArchiveInfo {
                offset: offset as u32,
                seconds_per_point: spec.seconds_per_point,
                points: spec.points,
            });
            offset += u64::from(spec.points) * POINT_SIZE;
        }

        let max_retention = infos
            .iter()
            .map(|a| a.retention())
            .max()
            .unwrap_or_default() as u32;
        let header = Header {
            metadata: Metadata {
                aggregation,
                max_retention,
                x_files_factor,
                archive_count: infos.len() as u32,
            },
            archives: infos,
        };

        let mut file = File::create(path.as_ref())?;
        header.write(&mut file)?;
        let data_len = offset - header.size();
        file.write_all(&vec![0u8; data_len as usize])?;
        file.flush()?;

        Ok(Self {
            path: path.as_ref().to_path_buf(),
            header,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stores `value` in archive `archive_index` at the slot for `timestamp`.
    pub fn write_point(&mut self, archive_index: usize, timestamp: i64, value: f64) -> Result<()> {
        let archive = *self.header.archives.get(archive_index).ok_or_else(|| {
            WhisperError::invalid_header(format!("no archive at index {archive_index}"))
        })?;
        let interval = timestamp - timestamp.rem_euclid(archive.step());

        let mut file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        file.seek(SeekFrom::Start(u64::from(archive.offset)))?;
        let base_interval = i64::from(BufReader::new(&file).read_u32::<BigEndian>()?);

        let offset = if base_interval == 0 {
            u64::from(archive.offset)
        } else {
            archive.point_offset(base_interval, interval)
        };
        file.seek(SeekFrom::Start(offset))?;
        file.write_u32::<BigEndian>(interval as u32)?;
        file.write_f64::<BigEndian>(value)?;
        file.flush()?;
        Ok(())
    }
}
