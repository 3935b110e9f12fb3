use std::fmt::Display;
use std::io::{Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{Result, WhisperError};

/// Size of the fixed metadata block at the start of every file.
pub const METADATA_SIZE: u64 = 16;
/// Size of one archive descriptor following the metadata block.
pub const ARCHIVE_INFO_SIZE: u64 = 12;
/// Size of one stored point: `u32` interval + `f64` value.
pub const POINT_SIZE: u64 = 12;

// Real files carry a handful of archives. Anything above this is a corrupt header
// and would otherwise make us allocate a huge descriptor table.
const MAX_ARCHIVES: u32 = 1024;

/// How lower-precision archives roll up points from higher-precision ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregationMethod {
    Average,
    Sum,
    Last,
    Max,
    Min,
}

impl TryFrom<u32> for AggregationMethod {
    type Error = WhisperError;

    fn try_from(value: u32) -> Result<Self> {
        match value {
            1 => Ok(Self::Average),
            2 => Ok(Self::Sum),
            3 => Ok(Self::Last),
            4 => Ok(Self::Max),
            5 => Ok(Self::Min),
            other => Err(WhisperError::UnknownAggregation(other)),
        }
    }
}

impl From<AggregationMethod> for u32 {
    fn from(method: AggregationMethod) -> Self {
        match method {
            AggregationMethod::Average => 1,
            AggregationMethod::Sum => 2,
            AggregationMethod::Last => 3,
            AggregationMethod::Max => 4,
            AggregationMethod::Min => 5,
        }
    }
}

impl Display for AggregationMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Average => "average",
            Self::Sum => "sum",
            Self::Last => "last",
            Self::Max => "max",
            Self::Min => "min",
        };
        f.write_str(name)
    }
}

/// The 16-byte metadata block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Metadata {
    pub aggregation: AggregationMethod,
    /// Longest retention of any archive, in seconds.
    pub max_retention: u32,
    pub x_files_factor: f32,
    pub archive_count: u32,
}

/// Location and resolution of one round-robin archive inside the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveInfo {
    /// Byte offset of the first point slot.
    pub offset: u32,
    pub seconds_per_point: u32,
    /// Number of point slots in the ring.
    pub points: u32,
}

impl ArchiveInfo {
    /// Time span covered by this archive, in seconds.
    pub fn retention(&self) -> i64 {
        i64::from(self.seconds_per_point) * i64::from(self.points)
    }

    pub fn step(&self) -> i64 {
        i64::from(self.seconds_per_point)
    }

    /// Size of the ring in bytes.
    pub fn size(&self) -> u64 {
        u64::from(self.points) * POINT_SIZE
    }

    /// Byte offset one past the last point slot.
    pub fn end(&self) -> u64 {
        u64::from(self.offset) + self.size()
    }

    /// The first step boundary strictly after `time`.
    pub fn interval(&self, time: i64) -> i64 {
        time - time.rem_euclid(self.step()) + self.step()
    }

    /// Byte offset of the slot holding `interval`, given the interval stored
    /// in the first slot of the ring.
    pub fn point_offset(&self, base_interval: i64, interval: i64) -> u64 {
        let point_distance = (interval - base_interval) / self.step();
        let byte_distance = point_distance * POINT_SIZE as i64;
        // `size()` is bounded by u32::MAX * 12, well inside i64.
        let wrapped = byte_distance.rem_euclid(self.size() as i64) as u64;
        u64::from(self.offset) + wrapped
    }
}

/// Parsed file header: metadata plus one descriptor per archive, ordered from
/// highest to lowest precision.
#[derive(Debug, Clone, PartialEq)]
pub struct Header {
    pub metadata: Metadata,
    pub archives: Vec<ArchiveInfo>,
}

impl Header {
    /// Parses the header from a reader positioned at the start of the file.
    pub fn parse<R: Read>(reader: &mut R) -> Result<Self> {
        let aggregation = AggregationMethod::try_from(reader.read_u32::<BigEndian>()?)?;
        let max_retention = reader.read_u32::<BigEndian>()?;
        let x_files_factor = reader.read_f32::<BigEndian>()?;
        let archive_count = reader.read_u32::<BigEndian>()?;

        if archive_count == 0 {
            return Err(WhisperError::invalid_header("file declares no archives"));
        }
        if archive_count > MAX_ARCHIVES {
            return Err(WhisperError::invalid_header(format!(
                "archive count too large: {archive_count}"
            )));
        }

        let data_start = METADATA_SIZE + u64::from(archive_count) * ARCHIVE_INFO_SIZE;
        let mut archives = Vec::with_capacity(archive_count as usize);
        for index in 0..archive_count {
            let archive = ArchiveInfo {
                offset: reader.read_u32::<BigEndian>()?,
                seconds_per_point: reader.read_u32::<BigEndian>()?,
                points: reader.read_u32::<BigEndian>()?,
            };
            if archive.seconds_per_point == 0 || archive.points == 0 {
                return Err(WhisperError::invalid_header(format!(
                    "archive {index} has an empty layout ({} points of {}s)",
                    archive.points, archive.seconds_per_point
                )));
            }
            if u64::from(archive.offset) < data_start {
                return Err(WhisperError::invalid_header(format!(
                    "archive {index} offset {} overlaps the header",
                    archive.offset
                )));
            }
            archives.push(archive);
        }

        Ok(Header {
            metadata: Metadata {
                aggregation,
                max_retention,
                x_files_factor,
                archive_count,
            },
            archives,
        })
    }

    /// Checks the layout against the real file size.
    ///
    /// Every archive must end within the file, and `max_retention` may not
    /// exceed what the largest archive covers. Reads are sized from these
    /// fields, so a truncated or corrupt file is rejected here.
    pub fn check_extents(&self, file_len: u64) -> Result<()> {
        for (index, archive) in self.archives.iter().enumerate() {
            if archive.end() > file_len {
                return Err(WhisperError::invalid_header(format!(
                    "archive {index} ends at byte {} past end of file ({file_len} bytes)",
                    archive.end()
                )));
            }
        }

        let covered = self
            .archives
            .iter()
            .map(ArchiveInfo::retention)
            .max()
            .unwrap_or_default();
        if i64::from(self.metadata.max_retention) > covered {
            return Err(WhisperError::invalid_header(format!(
                "max retention {}s exceeds the {covered}s covered by its archives",
                self.metadata.max_retention
            )));
        }
        Ok(())
    }

    pub fn write<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_u32::<BigEndian>(self.metadata.aggregation.into())?;
        writer.write_u32::<BigEndian>(self.metadata.max_retention)?;
        writer.write_f32::<BigEndian>(self.metadata.x_files_factor)?;
        writer.write_u32::<BigEndian>(self.archives.len() as u32)?;
        for archive in &self.archives {
            writer.write_u32::<BigEndian>(archive.offset)?;
            writer.write_u32::<BigEndian>(archive.seconds_per_point)?;
            writer.write_u32::<BigEndian>(archive.points)?;
        }
        Ok(())
    }

    /// Size of the metadata block and archive table together.
    pub fn size(&self) -> u64 {
        METADATA_SIZE + self.archives.len() as u64 * ARCHIVE_INFO_SIZE
    }
}
