//! Graphite client error types.

use std::time::Duration;

use thiserror::Error;

/// Crate-specific result type.
pub type Result<T> = std::result::Result<T, GraphiteError>;

/// Errors raised while connecting to or writing to a Graphite endpoint.
#[derive(Error, Debug)]
pub enum GraphiteError {
    #[error("Graphite protocol {protocol} not supported, use tcp/udp/nop.")]
    UnsupportedProtocol { protocol: String },

    #[error("failed to resolve {address}: {source}")]
    Resolve {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("no usable address for {address}")]
    NoAddress { address: String },

    #[error("failed to connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("connection to {address} timed out after {timeout:?}")]
    ConnectTimeout { address: String, timeout: Duration },

    #[error("not connected to {address}")]
    NotConnected { address: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GraphiteError {
    pub fn unsupported_protocol(protocol: impl Into<String>) -> Self {
        Self::UnsupportedProtocol {
            protocol: protocol.into(),
        }
    }

    /// Whether the failure happened while (re)establishing a connection rather
    /// than while writing.
    pub fn is_connect(&self) -> bool {
        matches!(
            self,
            Self::Resolve { .. }
                | Self::NoAddress { .. }
                | Self::Connect { .. }
                | Self::ConnectTimeout { .. }
        )
    }
}
