//! Protocol error types and device error codes.

use std::fmt;
use thiserror::Error;

/// Errors raised while decoding or building CoLa commands.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("command too short: {len} bytes (need at least {needed})")]
    TooShort { len: usize, needed: usize },

    #[error("command name is not terminated by a space")]
    MissingNameTerminator,

    #[error("command name is not valid ASCII")]
    InvalidName,

    #[error("parameter buffer underflow: need {needed} bytes, {remaining} remaining")]
    BufferUnderflow { needed: usize, remaining: usize },

    #[error("invalid UTF-8 in string parameter")]
    InvalidUtf8,

    #[error("string parameter too long: {0} bytes")]
    StringTooLong(usize),

    #[error("device reported error: {0}")]
    Device(DeviceError),

    #[error("framing error: {0}")]
    Framing(#[from] FramingError),
}

/// Errors in the byte framing around a command.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FramingError {
    #[error("length field {0} below minimum")]
    LengthUnderflow(u32),

    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: u32, max: u32 },

    #[error("checksum mismatch: expected {expected:#04x}, got {actual:#04x}")]
    ChecksumMismatch { expected: u8, actual: u8 },

    #[error("truncated frame: need {needed} more bytes")]
    Truncated { needed: usize },
}

/// Error codes reported by the device in `sFA` replies.
///
/// `NetworkError` and `Unknown` never travel on the wire: they mark a failed
/// exchange and an undecodable reply respectively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceError {
    NetworkError,
    Unknown,
    Ok,
    MethodAccessDenied,
    MethodUnknownIndex,
    VariableUnknownIndex,
    LocalConditionFailed,
    InvalidData,
    UnknownError,
    BufferOverflow,
    BufferUnderflow,
    UnknownType,
    VariableWriteAccessDenied,
    UnknownCommandForNameserver,
    UnknownColaCommand,
    MethodServerBusy,
    FlexOutOfBounds,
    EventRegUnknownIndex,
    ColaAValueOverflow,
    ColaAInvalidCharacter,
    OsaiNoMessage,
    OsaiNoAnswerMessage,
    Internal,
    HubAddressCorrupted,
    HubAddressDecoding,
    HubAddressExceeded,
    HubAddressBlankExpected,
    AsyncMethodsSuppressed,
    ComplexArraysNotSupported,
    SessionNoResources,
    SessionUnknownId,
    CannotConnect,
    PortNotConnected,
    Other(u16),
}

impl DeviceError {
    /// Maps a wire error code to a `DeviceError`.
    pub fn from_code(code: u16) -> Self {
        match code {
            0 => DeviceError::Ok,
            1 => DeviceError::MethodAccessDenied,
            2 => DeviceError::MethodUnknownIndex,
            3 => DeviceError::VariableUnknownIndex,
            4 => DeviceError::LocalConditionFailed,
            5 => DeviceError::InvalidData,
            6 => DeviceError::UnknownError,
            7 => DeviceError::BufferOverflow,
            8 => DeviceError::BufferUnderflow,
            9 => DeviceError::UnknownType,
            10 => DeviceError::VariableWriteAccessDenied,
            11 => DeviceError::UnknownCommandForNameserver,
            12 => DeviceError::UnknownColaCommand,
            13 => DeviceError::MethodServerBusy,
            14 => DeviceError::FlexOutOfBounds,
            15 => DeviceError::EventRegUnknownIndex,
            16 => DeviceError::ColaAValueOverflow,
            17 => DeviceError::ColaAInvalidCharacter,
            18 => DeviceError::OsaiNoMessage,
            19 => DeviceError::OsaiNoAnswerMessage,
            20 => DeviceError::Internal,
            21 => DeviceError::HubAddressCorrupted,
            22 => DeviceError::HubAddressDecoding,
            23 => DeviceError::HubAddressExceeded,
            24 => DeviceError::HubAddressBlankExpected,
            25 => DeviceError::AsyncMethodsSuppressed,
            32 => DeviceError::ComplexArraysNotSupported,
            33 => DeviceError::SessionNoResources,
            34 => DeviceError::SessionUnknownId,
            35 => DeviceError::CannotConnect,
            36 => DeviceError::PortNotConnected,
            other => DeviceError::Other(other),
        }
    }

    /// Returns the wire code, or `None` for the local pseudo codes.
    pub fn code(&self) -> Option<u16> {
        let code = match self {
            DeviceError::NetworkError | DeviceError::Unknown => return None,
            DeviceError::Ok => 0,
            DeviceError::MethodAccessDenied => 1,
            DeviceError::MethodUnknownIndex => 2,
            DeviceError::VariableUnknownIndex => 3,
            DeviceError::LocalConditionFailed => 4,
            DeviceError::InvalidData => 5,
            DeviceError::UnknownError => 6,
            DeviceError::BufferOverflow => 7,
            DeviceError::BufferUnderflow => 8,
            DeviceError::UnknownType => 9,
            DeviceError::VariableWriteAccessDenied => 10,
            DeviceError::UnknownCommandForNameserver => 11,
            DeviceError::UnknownColaCommand => 12,
            DeviceError::MethodServerBusy => 13,
            DeviceError::FlexOutOfBounds => 14,
            DeviceError::EventRegUnknownIndex => 15,
            DeviceError::ColaAValueOverflow => 16,
            DeviceError::ColaAInvalidCharacter => 17,
            DeviceError::OsaiNoMessage => 18,
            DeviceError::OsaiNoAnswerMessage => 19,
            DeviceError::Internal => 20,
            DeviceError::HubAddressCorrupted => 21,
            DeviceError::HubAddressDecoding => 22,
            DeviceError::HubAddressExceeded => 23,
            DeviceError::HubAddressBlankExpected => 24,
            DeviceError::AsyncMethodsSuppressed => 25,
            DeviceError::ComplexArraysNotSupported => 32,
            DeviceError::SessionNoResources => 33,
            DeviceError::SessionUnknownId => 34,
            DeviceError::CannotConnect => 35,
            DeviceError::PortNotConnected => 36,
            DeviceError::Other(code) => *code,
        };
        Some(code)
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, DeviceError::Ok)
    }

    /// Returns whether the error means the device forgot our session.
    pub fn is_session_lost(&self) -> bool {
        matches!(self, DeviceError::SessionUnknownId)
    }
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceError::NetworkError => write!(f, "NETWORK_ERROR"),
            DeviceError::Unknown => write!(f, "UNKNOWN"),
            DeviceError::Ok => write!(f, "OK"),
            DeviceError::MethodAccessDenied => write!(f, "METHOD_IN_ACCESS_DENIED"),
            DeviceError::MethodUnknownIndex => write!(f, "METHOD_IN_UNKNOWN_INDEX"),
            DeviceError::VariableUnknownIndex => write!(f, "VARIABLE_UNKNOWN_INDEX"),
            DeviceError::LocalConditionFailed => write!(f, "LOCAL_CONDITION_FAILED"),
            DeviceError::InvalidData => write!(f, "INVALID_DATA"),
            DeviceError::UnknownError => write!(f, "UNKNOWN_ERROR"),
            DeviceError::BufferOverflow => write!(f, "BUFFER_OVERFLOW"),
            DeviceError::BufferUnderflow => write!(f, "BUFFER_UNDERFLOW"),
            DeviceError::UnknownType => write!(f, "ERROR_UNKNOWN_TYPE"),
            DeviceError::VariableWriteAccessDenied => write!(f, "VARIABLE_WRITE_ACCESS_DENIED"),
            DeviceError::UnknownCommandForNameserver => write!(f, "UNKNOWN_CMD_FOR_NAMESERVER"),
            DeviceError::UnknownColaCommand => write!(f, "UNKNOWN_COLA_COMMAND"),
            DeviceError::MethodServerBusy => write!(f, "METHOD_IN_SERVER_BUSY"),
            DeviceError::FlexOutOfBounds => write!(f, "FLEX_OUT_OF_BOUNDS"),
            DeviceError::EventRegUnknownIndex => write!(f, "EVENTREG_UNKNOWN_INDEX"),
            DeviceError::ColaAValueOverflow => write!(f, "COLA_A_VALUE_OVERFLOW"),
            DeviceError::ColaAInvalidCharacter => write!(f, "COLA_A_INVALID_CHARACTER"),
            DeviceError::OsaiNoMessage => write!(f, "OSAI_NO_MESSAGE"),
            DeviceError::OsaiNoAnswerMessage => write!(f, "OSAI_NO_ANSWER_MESSAGE"),
            DeviceError::Internal => write!(f, "INTERNAL"),
            DeviceError::HubAddressCorrupted => write!(f, "HUB_ADDRESS_CORRUPTED"),
            DeviceError::HubAddressDecoding => write!(f, "HUB_ADDRESS_DECODING"),
            DeviceError::HubAddressExceeded => write!(f, "HUB_ADDRESS_ADDRESS_EXCEEDED"),
            DeviceError::HubAddressBlankExpected => write!(f, "HUB_ADDRESS_BLANK_EXPECTED"),
            DeviceError::AsyncMethodsSuppressed => write!(f, "ASYNC_METHODS_ARE_SUPPRESSED"),
            DeviceError::ComplexArraysNotSupported => write!(f, "COMPLEX_ARRAYS_NOT_SUPPORTED"),
            DeviceError::SessionNoResources => write!(f, "SESSION_NO_RESOURCES"),
            DeviceError::SessionUnknownId => write!(f, "SESSION_UNKNOWN_ID"),
            DeviceError::CannotConnect => write!(f, "CANNOT_CONNECT"),
            DeviceError::PortNotConnected => write!(f, "PORT_NOT_CONNECTED"),
            DeviceError::Other(code) => write!(f, "DEVICE_ERROR_{code:#06x}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_error_code_roundtrip() {
        for code in 0u16..=40 {
            let err = DeviceError::from_code(code);
            assert_eq!(err.code(), Some(code));
        }
        assert_eq!(DeviceError::from_code(0x1234), DeviceError::Other(0x1234));
    }

    #[test]
    fn test_pseudo_codes_have_no_wire_code() {
        assert_eq!(DeviceError::NetworkError.code(), None);
        assert_eq!(DeviceError::Unknown.code(), None);
    }

    #[test]
    fn test_session_unknown_id() {
        let err = DeviceError::from_code(0x22);
        assert_eq!(err, DeviceError::SessionUnknownId);
        assert!(err.is_session_lost());
        assert!(!DeviceError::Ok.is_session_lost());
    }

    #[test]
    fn test_device_error_display() {
        assert_eq!(format!("{}", DeviceError::Ok), "OK");
        assert_eq!(
            format!("{}", DeviceError::SessionUnknownId),
            "SESSION_UNKNOWN_ID"
        );
        assert_eq!(format!("{}", DeviceError::NetworkError), "NETWORK_ERROR");
        assert_eq!(format!("{}", DeviceError::Other(0x99)), "DEVICE_ERROR_0x0099");
    }

    #[test]
    fn test_protocol_error_display() {
        let err = ProtocolError::TooShort { len: 2, needed: 3 };
        assert!(err.to_string().contains('2'));

        let err = ProtocolError::BufferUnderflow {
            needed: 4,
            remaining: 1,
        };
        assert!(err.to_string().contains("underflow"));

        let err = FramingError::ChecksumMismatch {
            expected: 0xAB,
            actual: 0xCD,
        };
        let msg = err.to_string();
        assert!(msg.contains("ab") && msg.contains("cd"));

        let err = ProtocolError::from(FramingError::LengthUnderflow(3));
        assert!(err.to_string().contains("below minimum"));
    }
}
