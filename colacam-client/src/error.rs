//! Client error types.

use colacam_protocol::{DeviceError, FramingError, ProtocolError};
use std::io;
use thiserror::Error;

/// Transport-level failures.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("operation timed out")]
    Timeout,

    #[error("connection closed")]
    Closed,

    #[error("I/O error: {0}")]
    Io(io::Error),

    #[error("read of {size} bytes exceeds limit of {max} bytes")]
    TooLarge { size: usize, max: usize },

    #[error("short write: {written} of {expected} bytes")]
    ShortWrite { written: usize, expected: usize },
}

impl From<io::Error> for TransportError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => TransportError::Timeout,
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected => TransportError::Closed,
            _ => TransportError::Io(err),
        }
    }
}

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("framing error: {0}")]
    Framing(#[from] FramingError),

    #[error("device error: {0}")]
    Device(DeviceError),

    #[error("network error")]
    Network,

    #[error("unexpected response: expected {expected}, got {actual}")]
    UnexpectedResponse { expected: String, actual: String },

    #[error("failed to open session: {0}")]
    SessionOpen(String),

    #[error("authentication failed")]
    AuthFailed,

    #[error("no authenticator installed")]
    NoAuthenticator,

    #[error("not connected")]
    NotConnected,
}
