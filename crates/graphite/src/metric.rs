use std::fmt::Display;

use chrono::DateTime;

/// One sample destined for Graphite.
///
/// `value` holds already-formatted decimal text so that nothing between decode
/// and send re-serializes the float. A metric whose fields are all empty/zero
/// (`Metric::default()`) is treated as uninitialized and never sent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Metric {
    pub name: String,
    pub value: String,
    pub timestamp: i64,
}

/// Digits after the decimal point used by [`Metric::from_f64`].
pub const VALUE_PRECISION: usize = 20;

impl Metric {
    pub fn new(name: impl Into<String>, value: impl Into<String>, timestamp: i64) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            timestamp,
        }
    }

    /// Builds a metric whose value is rendered in fixed-point notation with
    /// [`VALUE_PRECISION`] fractional digits.
    pub fn from_f64(name: impl Into<String>, value: f64, timestamp: i64) -> Self {
        Self::new(name, format!("{value:.prec$}", prec = VALUE_PRECISION), timestamp)
    }

    pub fn is_zero(&self) -> bool {
        self.name.is_empty() && self.value.is_empty() && self.timestamp == 0
    }
}

impl Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let time = DateTime::from_timestamp(self.timestamp, 0).unwrap_or_default();
        write!(
            f,
            "{} {} {}",
            self.name,
            self.value,
            time.format("%Y-%m-%d %H:%M:%S")
        )
    }
}
