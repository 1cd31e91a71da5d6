//! Error types for the serial network core

use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, NetworkError>;

/// Errors raised by the serial network core
///
/// None of these terminate the worker loop: endpoint-level failures are
/// reported per attempt over the command channel and forwarding carries on.
#[derive(Debug, Error)]
pub enum NetworkError {
    /// Invalid endpoint parameters, rejected at the boundary
    #[error("configuration error: {0}")]
    Config(String),

    /// Descriptor creation or open failure
    #[error("resource error: {0}")]
    Resource(String),

    /// Malformed or unrecognized command frame
    #[error("protocol error: {0}")]
    Protocol(String),

    /// I/O failure on a descriptor
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failure reported by the serial port stack
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// The command channel is disconnected
    #[error("command channel closed")]
    ChannelClosed,
}

#[cfg(unix)]
impl From<nix::Error> for NetworkError {
    fn from(err: nix::Error) -> Self {
        NetworkError::Io(std::io::Error::from(err))
    }
}
