//! Dialect framing for CoLa commands.
//!
//! CoLa-B frame layout:
//!
//! ```text
//! +-----------+-------------+----------+----------+
//! | STX x 4   | payload_len | payload  | checksum |
//! | 4 bytes   | 4 bytes BE  | n bytes  | 1 byte   |
//! +-----------+-------------+----------+----------+
//! ```
//!
//! CoLa-2 frame layout (no checksum):
//!
//! ```text
//! +---------+------------+-----+-----+------------+--------+---------+
//! | STX x 4 | length     | hub | noc | session_id | req_id | payload |
//! | 4 bytes | 4 bytes BE | 1 B | 1 B | 4 bytes BE | 2 B BE | n bytes |
//! +---------+------------+-----+-----+------------+--------+---------+
//! ```
//!
//! In both dialects the length field counts everything after itself except
//! the CoLa-B checksum byte.

use crate::error::FramingError;
use crate::MAX_PAYLOAD_SIZE;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Start-of-text marker used for stream synchronisation.
pub const STX: u8 = 0x02;

/// Number of consecutive STX bytes that mark the start of a frame.
pub const SYNC_LEN: usize = 4;

/// Tracks consecutive STX bytes while scanning a byte stream.
///
/// Feeding any other byte resets the count, so arbitrary garbage before a
/// frame is skipped.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncTracker {
    seen: usize,
}

impl SyncTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one byte. Returns `true` once the sync sequence is complete.
    pub fn push(&mut self, byte: u8) -> bool {
        if byte == STX {
            self.seen += 1;
        } else {
            self.seen = 0;
        }
        self.is_synced()
    }

    pub fn is_synced(&self) -> bool {
        self.seen >= SYNC_LEN
    }
}

fn check_length(len: u32) -> Result<(), FramingError> {
    if len > MAX_PAYLOAD_SIZE {
        return Err(FramingError::FrameTooLarge {
            size: len,
            max: MAX_PAYLOAD_SIZE,
        });
    }
    Ok(())
}

/// CoLa-B (binary, checksummed) framing.
pub mod colab {
    use super::*;

    /// Bytes before the payload: 4 STX plus the length field.
    pub const HEADER_LEN: usize = 8;

    /// XOR of all payload bytes.
    pub fn checksum(payload: &[u8]) -> u8 {
        payload.iter().fold(0u8, |acc, b| acc ^ b)
    }

    /// Wraps an encoded command into a CoLa-B frame.
    pub fn encode(payload: &[u8]) -> Result<BytesMut, FramingError> {
        let len = payload.len() as u32;
        check_length(len)?;

        let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len() + 1);
        buf.put_bytes(STX, SYNC_LEN);
        buf.put_u32(len);
        buf.put_slice(payload);
        buf.put_u8(checksum(payload));
        Ok(buf)
    }

    /// Splits the trailing checksum from a received `payload ++ checksum`
    /// body, optionally verifying it.
    pub fn split_checksum(mut body: Bytes, verify: bool) -> Result<Bytes, FramingError> {
        if body.is_empty() {
            return Err(FramingError::Truncated { needed: 1 });
        }
        let received = body[body.len() - 1];
        body.truncate(body.len() - 1);
        if verify {
            let computed = checksum(&body);
            if computed != received {
                return Err(FramingError::ChecksumMismatch {
                    expected: received,
                    actual: computed,
                });
            }
        }
        Ok(body)
    }
}

/// CoLa-2 (session-oriented) framing.
pub mod cola2 {
    use super::*;
    use crate::command::Command;

    /// Bytes before the payload: STX, length, hub, noc, session id, request id.
    pub const HEADER_LEN: usize = 16;

    /// Header bytes counted by the length field.
    pub const INNER_HEADER_LEN: usize = 8;

    /// Open-session request and reply codes.
    pub const OPEN_SESSION: &[u8; 2] = b"Ox";
    pub const OPEN_SESSION_REPLY: &[u8; 2] = b"OA";

    /// Close-session request and reply codes.
    pub const CLOSE_SESSION: &[u8; 2] = b"CX";
    pub const CLOSE_SESSION_REPLY: &[u8; 2] = b"CA";

    /// Per-frame addressing fields.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct Header {
        pub hub_counter: u8,
        pub noc: u8,
        pub session_id: u32,
        pub request_id: u16,
    }

    impl Header {
        pub fn new(session_id: u32, request_id: u16) -> Self {
            Self {
                hub_counter: 0,
                noc: 0,
                session_id,
                request_id,
            }
        }
    }

    /// Wraps a payload into a CoLa-2 frame.
    pub fn encode(header: Header, payload: &[u8]) -> Result<BytesMut, FramingError> {
        let len = (INNER_HEADER_LEN + payload.len()) as u32;
        check_length(len)?;

        let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
        buf.put_bytes(STX, SYNC_LEN);
        buf.put_u32(len);
        buf.put_u8(header.hub_counter);
        buf.put_u8(header.noc);
        buf.put_u32(header.session_id);
        buf.put_u16(header.request_id);
        buf.put_slice(payload);
        Ok(buf)
    }

    /// Frames a command. CoLa-2 drops the leading `s` of the tag.
    pub fn encode_command(header: Header, command: &Command) -> Result<BytesMut, FramingError> {
        let raw = command.buffer();
        let payload = if raw.first() == Some(&b's') {
            &raw[1..]
        } else {
            &raw[..]
        };
        encode(header, payload)
    }

    /// Splits the bytes following the length field into header and payload.
    pub fn decode_body(mut body: Bytes) -> Result<(Header, Bytes), FramingError> {
        if body.len() < INNER_HEADER_LEN {
            return Err(FramingError::Truncated {
                needed: INNER_HEADER_LEN - body.len(),
            });
        }
        let header = Header {
            hub_counter: body.get_u8(),
            noc: body.get_u8(),
            session_id: body.get_u32(),
            request_id: body.get_u16(),
        };
        Ok((header, body))
    }

    /// Restores the `s` tag prefix CoLa-2 strips from command replies.
    pub fn reply_to_command_bytes(payload: &[u8]) -> Bytes {
        let mut buf = BytesMut::with_capacity(payload.len() + 1);
        buf.put_u8(b's');
        buf.put_slice(payload);
        buf.freeze()
    }

    /// Builds the open-session payload: `Ox`, timeout, flex-string client id.
    pub fn open_session_payload(timeout_secs: u8, client_id: &str) -> BytesMut {
        let id = client_id.as_bytes();
        let mut buf = BytesMut::with_capacity(OPEN_SESSION.len() + 3 + id.len());
        buf.put_slice(OPEN_SESSION);
        buf.put_u8(timeout_secs);
        buf.put_u16(id.len() as u16);
        buf.put_slice(id);
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{Command, CommandType};
    use proptest::prelude::*;

    #[test]
    fn test_sync_tracker() {
        let mut tracker = SyncTracker::new();
        assert!(!tracker.push(STX));
        assert!(!tracker.push(STX));
        assert!(!tracker.push(0x41));
        assert!(!tracker.push(STX));
        assert!(!tracker.push(STX));
        assert!(!tracker.push(STX));
        assert!(tracker.push(STX));
        assert!(tracker.is_synced());
    }

    #[test]
    fn test_colab_encode_device_ident() {
        let cmd = Command::new(CommandType::ReadVariable, "DeviceIdent", &[]);
        let frame = colab::encode(cmd.buffer()).unwrap();

        // Four STX bytes, then the big-endian length.
        assert_eq!(&frame[..4], &[STX; 4]);
        let len = u32::from_be_bytes([frame[4], frame[5], frame[6], frame[7]]) as usize;
        assert_eq!(len, cmd.buffer().len());
        assert_eq!(&frame[8..8 + len], b"sRN DeviceIdent ");
        assert_eq!(frame[frame.len() - 1], colab::checksum(cmd.buffer()));

        let payload = &frame[colab::HEADER_LEN..frame.len() - 1];
        let decoded = Command::decode(Bytes::copy_from_slice(payload)).unwrap();
        assert_eq!(decoded.kind(), CommandType::ReadVariable);
        assert_eq!(decoded.name(), "DeviceIdent");
    }

    #[test]
    fn test_colab_checksum_mismatch() {
        let frame = colab::encode(b"sWA Param ").unwrap();
        let mut body = frame[colab::HEADER_LEN..].to_vec();
        let last = body.len() - 1;
        body[last] ^= 0xFF;
        let body = Bytes::from(body);

        let result = colab::split_checksum(body.clone(), true);
        assert!(matches!(
            result,
            Err(FramingError::ChecksumMismatch { .. })
        ));

        // Lenient mode ignores the checksum byte.
        let payload = colab::split_checksum(body, false).unwrap();
        assert_eq!(payload.as_ref(), b"sWA Param ");
    }

    #[test]
    fn test_split_checksum_empty() {
        let result = colab::split_checksum(Bytes::new(), true);
        assert!(matches!(result, Err(FramingError::Truncated { needed: 1 })));
    }

    #[test]
    fn test_cola2_encode_layout() {
        let cmd = Command::new(CommandType::MethodInvocation, "PLAYSTART", &[]);
        let header = cola2::Header::new(0xDEADBEEF, 7);
        let frame = cola2::encode_command(header, &cmd).unwrap();

        assert_eq!(&frame[..4], &[STX; 4]);
        let len = u32::from_be_bytes([frame[4], frame[5], frame[6], frame[7]]) as usize;
        assert_eq!(len, frame.len() - 8);
        assert_eq!(frame[8], 0);
        assert_eq!(frame[9], 0);
        assert_eq!(&frame[10..14], &0xDEADBEEFu32.to_be_bytes());
        assert_eq!(&frame[14..16], &7u16.to_be_bytes());
        assert_eq!(&frame[16..], b"MN PLAYSTART ");
    }

    #[test]
    fn test_cola2_decode_body() {
        let header = cola2::Header::new(42, 3);
        let frame = cola2::encode(header, b"AN PLAYSTART \x01").unwrap();
        let body = Bytes::copy_from_slice(&frame[colab::HEADER_LEN..]);

        let (decoded, payload) = cola2::decode_body(body).unwrap();
        assert_eq!(decoded, header);
        let cmd = Command::decode(cola2::reply_to_command_bytes(&payload)).unwrap();
        assert_eq!(cmd.kind(), CommandType::MethodReturn);
        assert_eq!(cmd.name(), "PLAYSTART");
        assert_eq!(cmd.parameters().unwrap(), &[0x01]);
    }

    #[test]
    fn test_cola2_body_truncated() {
        let result = cola2::decode_body(Bytes::from_static(&[0, 0, 0]));
        assert!(matches!(result, Err(FramingError::Truncated { needed: 5 })));
    }

    #[test]
    fn test_cola2_open_session_payload() {
        let payload = cola2::open_session_payload(5, "colacam");
        assert_eq!(&payload[..2], b"Ox");
        assert_eq!(payload[2], 5);
        assert_eq!(&payload[3..5], &7u16.to_be_bytes());
        assert_eq!(&payload[5..], b"colacam");
    }

    proptest! {
        #[test]
        fn prop_checksum_is_xor_of_payload(payload in proptest::collection::vec(any::<u8>(), 0..256)) {
            let frame = colab::encode(&payload).unwrap();
            let expected = payload.iter().fold(0u8, |acc, b| acc ^ b);
            prop_assert_eq!(frame[frame.len() - 1], expected);
        }

        #[test]
        fn prop_length_field_matches_frame(payload in proptest::collection::vec(any::<u8>(), 0..256)) {
            let frame = colab::encode(&payload).unwrap();
            let len = u32::from_be_bytes([frame[4], frame[5], frame[6], frame[7]]) as usize;
            // Length excludes the 8-byte prefix and the checksum byte.
            prop_assert_eq!(len, frame.len() - colab::HEADER_LEN - 1);
        }
    }
}
