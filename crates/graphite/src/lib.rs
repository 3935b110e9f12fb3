//! # Graphite
//!
//! Client for the Graphite plaintext protocol:
//!
//! ```text
//! [prefix.]name value timestamp\n
//! ```
//!
//! - [`Metric`] - one sample with pre-formatted value text
//! - [`Graphite`] - a tcp, udp or nop endpoint plus its live connection
//! - [`MetricSink`] - the trait delivery code is written against
//!
//! Over tcp a batch is written in one call; over udp every metric is its own
//! datagram. The nop protocol logs metrics instead of sending them.

mod client;
pub mod error;
mod metric;

pub use client::{DEFAULT_TIMEOUT, Graphite, GraphiteConfig, MetricSink, Protocol};
pub use error::{GraphiteError, Result};
pub use metric::{Metric, VALUE_PRECISION};
