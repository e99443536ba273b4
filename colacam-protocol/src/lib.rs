//! # colacam-protocol
//!
//! Wire protocol implementation for the CoLa command language spoken by
//! Visionary-class sensors.
//!
//! This crate provides:
//! - `Command` encoding/decoding (the `sRN`/`sWN`/`sMN`/... request units)
//! - CoLa-B framing (STX prefix, length, XOR checksum)
//! - CoLa-2 framing (session id and request id header)
//! - Typed parameter writer/reader for the binary CoLa encoding
//! - Device error codes
//!
//! No I/O happens here; transports live in `colacam-client`.

pub mod codec;
pub mod command;
pub mod error;
pub mod frame;

pub use codec::{ParameterReader, ParameterWriter};
pub use command::{Command, CommandType};
pub use error::{DeviceError, FramingError, ProtocolError};
pub use frame::{cola2, colab, SyncTracker, STX, SYNC_LEN};

/// Default control port for the CoLa-B dialect.
pub const COLA_B_PORT: u16 = 2112;

/// Default control port for the CoLa-2 dialect.
pub const COLA_2_PORT: u16 = 2122;

/// Default port of the streaming (blob) channel.
pub const STREAMING_PORT: u16 = 2114;

/// Largest payload accepted from a length field (125 MiB).
///
/// Lengths above this are treated as garbage from a desynchronised stream.
pub const MAX_PAYLOAD_SIZE: u32 = 125 * 1024 * 1024;
