//! Streaming frame demultiplexer.
//!
//! A streaming packet looks like:
//!
//! ```text
//! +-----------+--------+---------+------+----------------------------+
//! | 0x02 x 4  | length | version | type | blob                       |
//! |           | BE32   | BE16    | u8   | length - 3 bytes           |
//! +-----------+--------+---------+------+----------------------------+
//! ```
//!
//! The blob starts with a segment table:
//!
//! ```text
//! +---------+-------+---------------------------------------+
//! | blob id | count | count x (offset BE32, changed BE32)   |
//! | BE16    | BE16  |                                       |
//! +---------+-------+---------------------------------------+
//! ```
//!
//! Offsets are relative to the start of the blob. Segment 0 is the XML
//! metadata, segment 1 the binary frame data.

use crate::error::DemuxError;
use crate::handler::FrameDataHandler;
use bytes::{Buf, Bytes};
use colacam_client::{Transport, TransportError};
use colacam_protocol::{SyncTracker, MAX_PAYLOAD_SIZE};
use tracing::{debug, error, trace, warn, Level};

/// Supported streaming protocol version.
pub const PROTOCOL_VERSION: u16 = 1;

/// Packet type of a blob packet.
pub const BLOB_PACKET_TYPE: u8 = 0x62;

/// Version and type bytes at the start of every packet.
pub const PACKET_HEADER_LEN: usize = 3;

/// Blob id and segment count.
const SEGMENT_HEADER_LEN: usize = 4;

/// Offset and change counter.
const SEGMENT_ENTRY_LEN: usize = 8;

/// Keep-alive token sent by `is_connected`.
pub const KEEPALIVE_TOKEN: &[u8; 7] = b"BlbRqst";

/// Fewest segments a blob can have: metadata, binary and the end offset.
pub const MIN_SEGMENTS: u16 = 3;

/// Demultiplexer settings.
#[derive(Debug, Clone, Copy)]
pub struct DemuxConfig {
    /// Fewest segments accepted in a blob, never below [`MIN_SEGMENTS`].
    pub min_segments: u16,
}

impl Default for DemuxConfig {
    fn default() -> Self {
        Self {
            min_segments: MIN_SEGMENTS,
        }
    }
}

impl DemuxConfig {
    pub fn with_min_segments(mut self, min: u16) -> Self {
        self.min_segments = min.max(MIN_SEGMENTS);
        self
    }
}

/// Validates the packet header and returns the blob.
pub fn parse_packet(mut packet: Bytes) -> Result<Bytes, DemuxError> {
    if packet.len() < PACKET_HEADER_LEN {
        return Err(DemuxError::PacketTooShort(packet.len() as u32));
    }
    let version = packet.get_u16();
    if version != PROTOCOL_VERSION {
        return Err(DemuxError::Version(version));
    }
    let packet_type = packet.get_u8();
    if packet_type != BLOB_PACKET_TYPE {
        return Err(DemuxError::PacketType(packet_type));
    }
    Ok(packet)
}

/// One entry of the segment table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentEntry {
    pub offset: u32,
    pub change_counter: u32,
}

/// Validated segment table of a blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentTable {
    blob_id: u16,
    entries: Vec<SegmentEntry>,
}

impl SegmentTable {
    /// Parses and validates the table at the start of `blob`.
    ///
    /// Offsets must strictly increase, the first must not point into the
    /// table itself and the last must lie within the blob.
    pub fn parse(blob: &[u8], min_segments: u16) -> Result<Self, DemuxError> {
        if blob.len() < SEGMENT_HEADER_LEN {
            return Err(DemuxError::HeaderTruncated(blob.len()));
        }
        let mut buf = blob;
        let blob_id = buf.get_u16();
        let count = buf.get_u16();
        let min = min_segments.max(MIN_SEGMENTS);
        if count < min {
            return Err(DemuxError::SegmentCount { count, min });
        }

        let table_len = SEGMENT_HEADER_LEN + count as usize * SEGMENT_ENTRY_LEN;
        if blob.len() < table_len {
            return Err(DemuxError::TableTruncated {
                needed: table_len,
                available: blob.len(),
            });
        }

        let entries: Vec<SegmentEntry> = (0..count)
            .map(|_| SegmentEntry {
                offset: buf.get_u32(),
                change_counter: buf.get_u32(),
            })
            .collect();

        let first = entries[0].offset as usize;
        if first < table_len {
            return Err(DemuxError::SegmentOutOfBounds {
                index: 0,
                start: first,
                end: entries[1].offset as usize,
                len: blob.len(),
            });
        }
        for (i, pair) in entries.windows(2).enumerate() {
            if pair[1].offset <= pair[0].offset {
                return Err(DemuxError::NonMonotonicOffsets(i + 1));
            }
        }
        let last = entries[entries.len() - 1].offset as usize;
        if last > blob.len() {
            return Err(DemuxError::SegmentOutOfBounds {
                index: entries.len() - 2,
                start: entries[entries.len() - 2].offset as usize,
                end: last,
                len: blob.len(),
            });
        }

        Ok(Self { blob_id, entries })
    }

    pub fn blob_id(&self) -> u16 {
        self.blob_id
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[SegmentEntry] {
        &self.entries
    }

    /// Returns segment `index` of `blob` with its change counter.
    pub fn segment<'a>(&self, blob: &'a [u8], index: usize) -> Option<(&'a [u8], u32)> {
        let entry = self.entries.get(index)?;
        let end = self.entries.get(index + 1)?.offset as usize;
        let data = blob.get(entry.offset as usize..end)?;
        Some((data, entry.change_counter))
    }
}

/// Reads blob packets from a streaming connection.
pub struct DataStream<T: Transport> {
    transport: T,
    config: DemuxConfig,
}

impl<T: Transport> DataStream<T> {
    pub fn new(transport: T, config: DemuxConfig) -> Self {
        Self { transport, config }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Reads one packet and feeds its segments to `handler`.
    ///
    /// Nothing reaches the handler unless the whole packet and segment table
    /// are valid. Errors are logged and returned; there is no retry.
    pub fn next_frame(&mut self, handler: &mut dyn FrameDataHandler) -> Result<(), DemuxError> {
        let result = self.read_frame(handler);
        if let Err(e) = &result {
            let level = failure_level(e);
            if level == Level::DEBUG {
                debug!(error = %e, "no frame before read timeout");
            } else if level == Level::WARN {
                warn!(error = %e, "stream read failed");
            } else {
                error!(error = %e, "failed to read frame");
            }
        }
        result
    }

    fn sync(&self) -> Result<(), DemuxError> {
        let mut tracker = SyncTracker::new();
        loop {
            let byte = self.transport.read_exact(1)?;
            if tracker.push(byte[0]) {
                return Ok(());
            }
        }
    }

    fn read_frame(&mut self, handler: &mut dyn FrameDataHandler) -> Result<(), DemuxError> {
        self.sync()?;

        let raw = self.transport.read_exact(4)?;
        let length = u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]);
        if (length as usize) < PACKET_HEADER_LEN {
            return Err(DemuxError::PacketTooShort(length));
        }
        if length > MAX_PAYLOAD_SIZE {
            return Err(DemuxError::PacketTooLarge {
                size: length,
                max: MAX_PAYLOAD_SIZE,
            });
        }
        trace!(length, "packet header");

        let packet = self.transport.read_exact(length as usize)?;
        let blob = parse_packet(packet)?;
        let table = SegmentTable::parse(&blob, self.config.min_segments)?;

        let (xml, change_counter) = segment_or_err(&table, &blob, 0)?;
        let (binary, _) = segment_or_err(&table, &blob, 1)?;
        debug!(
            blob_id = table.blob_id(),
            segments = table.len(),
            xml_len = xml.len(),
            binary_len = binary.len(),
            "blob received"
        );

        handler.parse_metadata(xml, change_counter)?;
        handler.parse_binary(binary)
    }

    /// Checks the connection by sending a keep-alive token.
    pub fn is_connected(&self) -> bool {
        let sent = self.transport.send(KEEPALIVE_TOKEN).is_ok();
        sent && self.transport.last_error().is_none()
    }

    pub fn shutdown(&self) {
        self.transport.shutdown();
    }
}

/// Log level for a failed read. An idle device produces read timeouts.
fn failure_level(error: &DemuxError) -> Level {
    match error {
        DemuxError::Transport(TransportError::Timeout) => Level::DEBUG,
        DemuxError::Transport(_) => Level::WARN,
        _ => Level::ERROR,
    }
}

fn segment_or_err<'a>(
    table: &SegmentTable,
    blob: &'a [u8],
    index: usize,
) -> Result<(&'a [u8], u32), DemuxError> {
    table
        .segment(blob, index)
        .ok_or(DemuxError::SegmentOutOfBounds {
            index,
            start: table.entries().get(index).map_or(0, |e| e.offset as usize),
            end: table
                .entries()
                .get(index + 1)
                .map_or(0, |e| e.offset as usize),
            len: blob.len(),
        })
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use crate::frame::Frame;
    use crate::handler::fixtures as depth;
    use crate::handler::DepthMapHandler;
    use bytes::BufMut;
    use colacam_client::MemoryTransport;
    use proptest::prelude::*;
    use std::time::Duration;

    #[derive(Default)]
    struct Recording {
        metadata: Vec<(Vec<u8>, u32)>,
        binary: Vec<Vec<u8>>,
    }

    impl FrameDataHandler for Recording {
        fn parse_metadata(&mut self, xml: &[u8], change_counter: u32) -> Result<(), DemuxError> {
            self.metadata.push((xml.to_vec(), change_counter));
            Ok(())
        }

        fn parse_binary(&mut self, data: &[u8]) -> Result<(), DemuxError> {
            self.binary.push(data.to_vec());
            Ok(())
        }

        fn take_frame(&mut self) -> Option<Frame> {
            None
        }
    }

    fn stream(bytes: Vec<u8>) -> DataStream<MemoryTransport> {
        DataStream::new(MemoryTransport::from_bytes(bytes), DemuxConfig::default())
    }

    #[test]
    fn test_segments_delivered() {
        let data = packet(1, 0x62, &blob(&[b"<xml/>", b"\x01\x02\x03"], 1));
        let mut handler = Recording::default();
        stream(data).next_frame(&mut handler).unwrap();

        assert_eq!(handler.metadata, vec![(b"<xml/>".to_vec(), 10)]);
        assert_eq!(handler.binary, vec![vec![1, 2, 3]]);
    }

    #[test]
    fn test_version_two_rejected_without_handler_calls() {
        let data = packet(2, 0x62, &blob(&[b"<xml/>", b"\x01"], 1));
        let mut handler = Recording::default();
        let result = stream(data).next_frame(&mut handler);

        assert!(matches!(result, Err(DemuxError::Version(2))));
        assert!(handler.metadata.is_empty());
        assert!(handler.binary.is_empty());
    }

    #[test]
    fn test_wrong_packet_type_rejected() {
        let data = packet(1, 0x63, &blob(&[b"<xml/>", b"\x01"], 1));
        let mut handler = Recording::default();
        let result = stream(data).next_frame(&mut handler);
        assert!(matches!(result, Err(DemuxError::PacketType(0x63))));
        assert!(handler.metadata.is_empty());
    }

    #[test]
    fn test_short_packet_length() {
        let mut data = vec![0x02; 4];
        data.put_u32(2);
        data.extend_from_slice(&[0, 1]);
        let result = stream(data).next_frame(&mut Recording::default());
        assert!(matches!(result, Err(DemuxError::PacketTooShort(2))));
    }

    #[test]
    fn test_oversized_packet_length() {
        let mut data = vec![0x02; 4];
        data.put_u32(u32::MAX);
        let result = stream(data).next_frame(&mut Recording::default());
        assert!(matches!(result, Err(DemuxError::PacketTooLarge { .. })));
    }

    #[test]
    fn test_too_few_segments() {
        let mut blob = Vec::new();
        blob.put_u16(1);
        blob.put_u16(2);
        blob.put_u32(20);
        blob.put_u32(0);
        blob.put_u32(21);
        blob.put_u32(0);
        blob.put_u8(0);
        let mut handler = Recording::default();
        let result = stream(packet(1, 0x62, &blob)).next_frame(&mut handler);
        assert!(matches!(
            result,
            Err(DemuxError::SegmentCount { count: 2, min: 3 })
        ));
        assert!(handler.metadata.is_empty());
    }

    #[test]
    fn test_idle_timeout_is_not_an_error() {
        let transport = MemoryTransport::new().with_read_timeout(Duration::from_millis(10));
        let mut stream = DataStream::new(transport, DemuxConfig::default());
        let mut handler = DepthMapHandler::new();
        let err = stream.next_frame(&mut handler).unwrap_err();
        assert!(matches!(err, DemuxError::Transport(TransportError::Timeout)));
        assert_eq!(failure_level(&err), Level::DEBUG);

        let closed = DemuxError::Transport(TransportError::Closed);
        assert_eq!(failure_level(&closed), Level::WARN);
        assert_eq!(failure_level(&DemuxError::Version(2)), Level::ERROR);
    }

    #[test]
    fn test_min_segments_configurable() {
        let xml = depth::metadata_xml(2, 2);
        let data = depth::binary(2, 2, 1, 0, 0);
        let three = blob(&[xml.as_bytes(), &data], 1);
        let four = blob(&[xml.as_bytes(), &data], 2);

        assert!(SegmentTable::parse(&three, 3).is_ok());
        assert!(matches!(
            SegmentTable::parse(&three, 4),
            Err(DemuxError::SegmentCount { count: 3, min: 4 })
        ));
        assert_eq!(SegmentTable::parse(&four, 4).unwrap().len(), 4);
    }

    #[test]
    fn test_min_segments_never_below_three() {
        assert_eq!(DemuxConfig::default().with_min_segments(2).min_segments, 3);

        // Metadata and binary with no end offset: segment 1 cannot be read.
        let mut blob = Vec::new();
        blob.put_u16(1);
        blob.put_u16(2);
        blob.put_u32(20);
        blob.put_u32(5);
        blob.put_u32(22);
        blob.put_u32(0);
        blob.put_slice(b"abcd");
        assert!(matches!(
            SegmentTable::parse(&blob, 2),
            Err(DemuxError::SegmentCount { count: 2, min: 3 })
        ));

        let transport = MemoryTransport::from_bytes(packet(1, 0x62, &blob));
        let mut stream =
            DataStream::new(transport, DemuxConfig::default().with_min_segments(2));
        let mut handler = DepthMapHandler::new();
        assert!(matches!(
            stream.next_frame(&mut handler),
            Err(DemuxError::SegmentCount { count: 2, min: 3 })
        ));
        assert!(handler.layout().is_none());
    }

    #[test]
    fn test_segment_table_truncated() {
        let mut blob = Vec::new();
        blob.put_u16(1);
        blob.put_u16(3);
        blob.put_u32(28);
        let result = SegmentTable::parse(&blob, 3);
        assert!(matches!(
            result,
            Err(DemuxError::TableTruncated {
                needed: 28,
                available: 8
            })
        ));
    }

    #[test]
    fn test_segment_offset_past_blob() {
        let mut blob = blob(&[b"<xml/>", b"\x01\x02"], 1);
        // Point the trailing offset past the end.
        let len = blob.len() as u32;
        blob[20..24].copy_from_slice(&(len + 100).to_be_bytes());
        let mut handler = Recording::default();
        let result = stream(packet(1, 0x62, &blob)).next_frame(&mut handler);
        assert!(matches!(result, Err(DemuxError::SegmentOutOfBounds { .. })));
        assert!(handler.metadata.is_empty());
    }

    #[test]
    fn test_segment_offset_inside_table() {
        let mut blob = blob(&[b"<xml/>", b"\x01\x02"], 1);
        blob[4..8].copy_from_slice(&4u32.to_be_bytes());
        let result = SegmentTable::parse(&blob, 3);
        assert!(matches!(
            result,
            Err(DemuxError::SegmentOutOfBounds { index: 0, .. })
        ));
    }

    #[test]
    fn test_non_monotonic_offsets() {
        let mut blob = blob(&[b"<xml/>", b"\x01\x02"], 1);
        let first = u32::from_be_bytes([blob[4], blob[5], blob[6], blob[7]]);
        blob[12..16].copy_from_slice(&first.to_be_bytes());
        let result = SegmentTable::parse(&blob, 3);
        assert!(matches!(result, Err(DemuxError::NonMonotonicOffsets(1))));
    }

    #[test]
    fn test_sync_after_garbage() {
        let mut data = b"\x00\x02\x02\x02\xffnoise".to_vec();
        data.extend(packet(1, 0x62, &blob(&[b"<m/>", b"\x07"], 1)));
        let mut handler = Recording::default();
        let transport = MemoryTransport::from_bytes(data).with_max_chunk(3);
        DataStream::new(transport, DemuxConfig::default())
            .next_frame(&mut handler)
            .unwrap();
        assert_eq!(handler.binary, vec![vec![7]]);
    }

    #[test]
    fn test_consecutive_packets() {
        let mut data = packet(1, 0x62, &blob(&[b"<a/>", b"\x01"], 1));
        data.extend(packet(1, 0x62, &blob(&[b"<b/>", b"\x02"], 1)));
        let mut ds = stream(data);
        let mut handler = Recording::default();
        ds.next_frame(&mut handler).unwrap();
        ds.next_frame(&mut handler).unwrap();
        assert_eq!(handler.binary, vec![vec![1], vec![2]]);
        assert!(matches!(
            ds.next_frame(&mut handler),
            Err(DemuxError::Transport(_))
        ));
    }

    #[test]
    fn test_depth_map_end_to_end() {
        let xml = depth::metadata_xml(3, 2);
        let binary = depth::binary(3, 2, 9, depth::packed_time(1, 2, 3, 4), 50);
        let data = packet(1, 0x62, &blob(&[xml.as_bytes(), &binary], 1));

        let mut handler = DepthMapHandler::new();
        stream(data).next_frame(&mut handler).unwrap();
        let frame = handler.take_frame().unwrap();
        assert_eq!(frame.size(), (2, 3));
        assert_eq!(frame.sequence, 9);
        assert_eq!(frame.data, vec![50, 51, 52, 53, 54, 55]);
    }

    #[test]
    fn test_is_connected_sends_token() {
        let transport = MemoryTransport::new();
        let ds = DataStream::new(transport, DemuxConfig::default());
        assert!(ds.is_connected());
        assert_eq!(ds.transport().written(), KEEPALIVE_TOKEN);

        ds.transport().set_fail_sends(true);
        assert!(!ds.is_connected());
    }

    proptest! {
        #[test]
        fn prop_garbage_prefix_without_stx_is_skipped(
            garbage in proptest::collection::vec(any::<u8>().prop_filter("no STX", |b| *b != 0x02), 0..64),
            payload in proptest::collection::vec(any::<u8>(), 1..32),
        ) {
            let mut data = garbage;
            data.extend(packet(1, 0x62, &blob(&[b"<x/>", &payload], 1)));
            let mut handler = Recording::default();
            stream(data).next_frame(&mut handler).unwrap();
            prop_assert_eq!(&handler.binary, &vec![payload]);
        }
    }
}
