//! # Whisper
//!
//! Reader for Graphite whisper files: fixed-size round-robin databases holding
//! one or more archives of `(interval, value)` points at decreasing precision.
//!
//! ## File layout
//!
//! All integers are big-endian.
//!
//! - metadata: aggregation method `u32`, max retention `u32`,
//!   x-files factor `f32`, archive count `u32`
//! - one descriptor per archive: offset `u32`, seconds per point `u32`,
//!   point count `u32`
//! - archive data: `points` slots of interval `u32` + value `f64`
//!
//! ## Usage
//!
//! ```no_run
//! use whisper::Whisper;
//!
//! let mut file = Whisper::open("/var/lib/graphite/whisper/load/shortterm.wsp")?;
//! for point in file.fetch(0, i64::from(i32::MAX))?.points() {
//!     if !point.value.is_nan() {
//!         println!("{} {}", point.timestamp, point.value);
//!     }
//! }
//! # Ok::<(), whisper::WhisperError>(())
//! ```

mod archive;
pub mod error;
pub mod header;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_support;

pub use archive::{Point, TimeSeries, Whisper};
pub use error::{Result, WhisperError};
pub use header::{AggregationMethod, ArchiveInfo, Header, Metadata};
