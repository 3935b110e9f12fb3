//! Library target for the `whisper-replay` package.
//!
//! The primary deliverable of this package is the `whisper-replay` binary
//! (`src/main.rs`); flag parsing and error types live here so they can be
//! tested.

pub mod cli;
pub mod error;

pub use cli::{Args, RunSettings};
pub use error::{AppError, Result};
