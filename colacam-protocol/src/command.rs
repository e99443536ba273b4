//! CoLa command units.
//!
//! A command on the wire (inside the dialect framing) looks like:
//!
//! ```text
//! +-----+-----+-------+-----+------------+
//! | tag | ' ' | name  | ' ' | parameters |
//! | 3 B | 1 B | ASCII | 1 B | raw bytes  |
//! +-----+-----+-------+-----+------------+
//! ```
//!
//! Error replies are `sFA` followed by a big-endian 16-bit error code.

use crate::error::{DeviceError, ProtocolError};
use bytes::{BufMut, Bytes, BytesMut};

/// Offset of the command name (after the 3-byte tag and a space).
pub const NAME_OFFSET: usize = 4;

/// Command kind, derived from the 3-letter tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandType {
    ReadVariable,
    ReadVariableResponse,
    WriteVariable,
    WriteVariableResponse,
    MethodInvocation,
    MethodReturn,
    Error,
    /// Local marker for a failed exchange; never on the wire.
    NetworkError,
    Unknown,
}

impl CommandType {
    /// Returns the wire tag, if the type has one.
    pub fn tag(&self) -> Option<&'static [u8; 3]> {
        match self {
            CommandType::ReadVariable => Some(b"sRN"),
            CommandType::ReadVariableResponse => Some(b"sRA"),
            CommandType::WriteVariable => Some(b"sWN"),
            CommandType::WriteVariableResponse => Some(b"sWA"),
            CommandType::MethodInvocation => Some(b"sMN"),
            CommandType::MethodReturn => Some(b"sAN"),
            CommandType::Error => Some(b"sFA"),
            CommandType::NetworkError | CommandType::Unknown => None,
        }
    }

    /// Maps a 3-byte tag to a type; unrecognised tags become `Unknown`.
    pub fn from_tag(tag: &[u8]) -> Self {
        match tag {
            b"sRN" => CommandType::ReadVariable,
            b"sRA" => CommandType::ReadVariableResponse,
            b"sWN" => CommandType::WriteVariable,
            b"sWA" => CommandType::WriteVariableResponse,
            b"sMN" => CommandType::MethodInvocation,
            b"sAN" => CommandType::MethodReturn,
            b"sFA" => CommandType::Error,
            _ => CommandType::Unknown,
        }
    }

    /// Returns the reply type a device sends for this request type.
    pub fn response_type(&self) -> Option<CommandType> {
        match self {
            CommandType::ReadVariable => Some(CommandType::ReadVariableResponse),
            CommandType::WriteVariable => Some(CommandType::WriteVariableResponse),
            CommandType::MethodInvocation => Some(CommandType::MethodReturn),
            _ => None,
        }
    }
}

/// A single CoLa request or response.
///
/// Immutable once built. Parameters are only accessible when `error()` is
/// `DeviceError::Ok`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    kind: CommandType,
    name: String,
    parameter_offset: usize,
    error: DeviceError,
    buffer: Bytes,
}

impl Command {
    /// Builds a command from its parts.
    ///
    /// The name is followed by a space so that decoders can find where the
    /// parameters begin, even when there are none.
    pub fn new(kind: CommandType, name: &str, parameters: &[u8]) -> Self {
        let tag = kind.tag().unwrap_or(b"???");
        let mut buf = BytesMut::with_capacity(NAME_OFFSET + name.len() + 1 + parameters.len());
        buf.put_slice(tag);
        buf.put_u8(b' ');
        buf.put_slice(name.as_bytes());
        buf.put_u8(b' ');
        let parameter_offset = buf.len();
        buf.put_slice(parameters);

        Self {
            kind,
            name: name.to_string(),
            parameter_offset,
            error: DeviceError::Ok,
            buffer: buf.freeze(),
        }
    }

    /// Decodes a command from a raw (unframed) buffer.
    pub fn decode(buffer: Bytes) -> Result<Self, ProtocolError> {
        if buffer.len() < 3 {
            return Err(ProtocolError::TooShort {
                len: buffer.len(),
                needed: 3,
            });
        }

        let kind = CommandType::from_tag(&buffer[..3]);
        match kind {
            CommandType::Error => {
                if buffer.len() < 5 {
                    return Err(ProtocolError::TooShort {
                        len: buffer.len(),
                        needed: 5,
                    });
                }
                let code = u16::from_be_bytes([buffer[3], buffer[4]]);
                Ok(Self {
                    kind,
                    name: String::new(),
                    parameter_offset: 3,
                    error: DeviceError::from_code(code),
                    buffer,
                })
            }
            CommandType::Unknown => Ok(Self {
                kind,
                name: String::new(),
                parameter_offset: 0,
                error: DeviceError::Ok,
                buffer,
            }),
            _ => {
                let space = buffer
                    .iter()
                    .skip(NAME_OFFSET)
                    .position(|&b| b == b' ')
                    .map(|pos| pos + NAME_OFFSET)
                    .ok_or(ProtocolError::MissingNameTerminator)?;
                let name_bytes = &buffer[NAME_OFFSET..space];
                if !name_bytes.is_ascii() {
                    return Err(ProtocolError::InvalidName);
                }
                let name = String::from_utf8_lossy(name_bytes).into_owned();
                Ok(Self {
                    kind,
                    name,
                    parameter_offset: space + 1,
                    error: DeviceError::Ok,
                    buffer,
                })
            }
        }
    }

    /// Builds a command from a device reply without failing.
    ///
    /// Undecodable replies become an `Unknown` command carrying
    /// `DeviceError::Unknown`, so callers only need to inspect `error()`.
    pub fn from_response(buffer: Bytes) -> Self {
        Self::decode(buffer.clone()).unwrap_or_else(|_| Self::unknown(buffer))
    }

    /// Marker command for an exchange that failed at the transport level.
    pub fn network_error() -> Self {
        Self {
            kind: CommandType::NetworkError,
            name: String::new(),
            parameter_offset: 0,
            error: DeviceError::NetworkError,
            buffer: Bytes::new(),
        }
    }

    /// Marker command for a reply that could not be understood.
    pub fn unknown(buffer: Bytes) -> Self {
        Self {
            kind: CommandType::Unknown,
            name: String::new(),
            parameter_offset: 0,
            error: DeviceError::Unknown,
            buffer,
        }
    }

    pub fn kind(&self) -> CommandType {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parameter_offset(&self) -> usize {
        self.parameter_offset
    }

    pub fn error(&self) -> DeviceError {
        self.error
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_ok()
    }

    /// Returns the complete encoded command.
    pub fn buffer(&self) -> &Bytes {
        &self.buffer
    }

    /// Returns the parameter bytes, refusing when the command carries an error.
    pub fn parameters(&self) -> Result<&[u8], ProtocolError> {
        if !self.error.is_ok() {
            return Err(ProtocolError::Device(self.error));
        }
        Ok(&self.buffer[self.parameter_offset.min(self.buffer.len())..])
    }
}
