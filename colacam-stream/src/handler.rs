//! Frame-data handlers.
//!
//! The demultiplexer hands the metadata segment and the binary segment of
//! every blob to a [`FrameDataHandler`], which turns them into a [`Frame`].

use crate::error::DemuxError;
use crate::frame::Frame;
use bytes::Buf;
use tracing::{debug, trace};

/// Device-specific frame decoding.
pub trait FrameDataHandler: Send {
    /// Parses the XML metadata segment.
    fn parse_metadata(&mut self, xml: &[u8], change_counter: u32) -> Result<(), DemuxError>;

    /// Parses the binary data segment.
    fn parse_binary(&mut self, data: &[u8]) -> Result<(), DemuxError>;

    /// Returns the frame decoded by the last successful `parse_binary`.
    fn take_frame(&mut self) -> Option<Frame>;
}

impl<H: FrameDataHandler + ?Sized> FrameDataHandler for Box<H> {
    fn parse_metadata(&mut self, xml: &[u8], change_counter: u32) -> Result<(), DemuxError> {
        (**self).parse_metadata(xml, change_counter)
    }

    fn parse_binary(&mut self, data: &[u8]) -> Result<(), DemuxError> {
        (**self).parse_binary(data)
    }

    fn take_frame(&mut self) -> Option<Frame> {
        (**self).take_frame()
    }
}

const HOUR_MASK: u64 = 0x0000_001F_0000_0000;
const HOUR_SHIFT: u32 = 32;
const MINUTE_MASK: u64 = 0x0000_0000_FC00_0000;
const MINUTE_SHIFT: u32 = 26;
const SECOND_MASK: u64 = 0x0000_0000_03F0_0000;
const SECOND_SHIFT: u32 = 20;
const MILLIS_MASK: u64 = 0x0000_0000_000F_FC00;
const MILLIS_SHIFT: u32 = 10;

/// Decodes the packed device timestamp into milliseconds of the day.
pub fn timestamp_ms(packed: u64) -> u64 {
    let hour = (packed & HOUR_MASK) >> HOUR_SHIFT;
    let minute = (packed & MINUTE_MASK) >> MINUTE_SHIFT;
    let second = (packed & SECOND_MASK) >> SECOND_SHIFT;
    let millis = (packed & MILLIS_MASK) >> MILLIS_SHIFT;
    hour * 3_600_000 + minute * 60_000 + second * 1000 + millis
}

/// Returns the trimmed text of the first `<tag>` element, `""` for `<tag/>`.
///
/// Only meant for the flat device metadata: the first match anywhere in the
/// document wins, whatever its nesting, and comments are not skipped.
fn element_text<'a>(xml: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{}", tag);
    let close = format!("</{}>", tag);
    let mut from = 0;
    while let Some(pos) = xml[from..].find(&open) {
        let start = from + pos + open.len();
        let rest = &xml[start..];
        match rest.chars().next() {
            Some('>') | Some('/') => {}
            Some(c) if c.is_whitespace() => {}
            _ => {
                from = start;
                continue;
            }
        }
        let gt = rest.find('>')?;
        if rest[..gt].ends_with('/') {
            return Some("");
        }
        let body = &rest[gt + 1..];
        let end = body.find(&close)?;
        return Some(body[..end].trim());
    }
    None
}

fn parse_dimension(xml: &str, tag: &str) -> Result<u32, DemuxError> {
    element_text(xml, tag)
        .and_then(|text| text.parse().ok())
        .ok_or_else(|| DemuxError::Handler(format!("metadata has no valid <{}>", tag)))
}

/// Map dimensions and channels announced by the metadata segment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DepthMapLayout {
    pub width: u32,
    pub height: u32,
    pub distance: bool,
    pub intensity: bool,
    pub confidence: bool,
}

impl DepthMapLayout {
    pub fn from_xml(xml: &str) -> Result<Self, DemuxError> {
        Ok(Self {
            width: parse_dimension(xml, "Width")?,
            height: parse_dimension(xml, "Height")?,
            distance: element_text(xml, "Distance").is_some(),
            intensity: element_text(xml, "Intensity").is_some(),
            confidence: element_text(xml, "Confidence").is_some(),
        })
    }

    /// Pixels per map, or `None` if the dimensions overflow `usize`.
    pub fn pixels(&self) -> Option<usize> {
        (self.width as usize).checked_mul(self.height as usize)
    }

    /// Bytes per map.
    fn map_bytes(&self) -> Option<usize> {
        self.pixels()?.checked_mul(2)
    }

    /// Bytes of a binary segment carrying every announced map.
    fn binary_len(&self) -> Option<usize> {
        self.map_bytes()?
            .checked_mul(self.map_count())?
            .checked_add(BINARY_HEADER_LEN + BINARY_TRAILER_LEN)
    }

    fn map_count(&self) -> usize {
        [self.distance, self.intensity, self.confidence]
            .iter()
            .filter(|&&present| present)
            .count()
    }
}

/// Fixed part before the maps: length, timestamp, version, frame number,
/// quality, status.
const BINARY_HEADER_LEN: usize = 4 + 8 + 2 + 4 + 1 + 1;

/// Trailing CRC and repeated length.
const BINARY_TRAILER_LEN: usize = 4 + 4;

/// Reads one map of `bytes` bytes. The caller has checked the length.
fn read_map(buf: &mut &[u8], bytes: usize) -> Vec<u16> {
    let map = buf[..bytes]
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    buf.advance(bytes);
    map
}

/// Decodes depth-map blobs: distance, intensity and confidence maps of
/// 16-bit values.
///
/// The frame carries the distance map; the other maps stay available on the
/// handler until the next blob.
#[derive(Debug, Default)]
pub struct DepthMapHandler {
    layout: Option<DepthMapLayout>,
    change_counter: Option<u32>,
    pending: Option<Frame>,
    intensity: Vec<u16>,
    confidence: Vec<u16>,
    quality: u8,
    status: u8,
}

impl DepthMapHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn layout(&self) -> Option<&DepthMapLayout> {
        self.layout.as_ref()
    }

    pub fn intensity_map(&self) -> &[u16] {
        &self.intensity
    }

    pub fn confidence_map(&self) -> &[u16] {
        &self.confidence
    }

    /// Data quality byte of the last blob.
    pub fn quality(&self) -> u8 {
        self.quality
    }

    /// Device status byte of the last blob.
    pub fn status(&self) -> u8 {
        self.status
    }
}

impl FrameDataHandler for DepthMapHandler {
    fn parse_metadata(&mut self, xml: &[u8], change_counter: u32) -> Result<(), DemuxError> {
        if self.layout.is_some() && self.change_counter == Some(change_counter) {
            trace!(change_counter, "metadata unchanged");
            return Ok(());
        }

        let text = std::str::from_utf8(xml)
            .map_err(|_| DemuxError::Handler("metadata is not valid UTF-8".to_string()))?;
        let layout = DepthMapLayout::from_xml(text)?;
        debug!(
            width = layout.width,
            height = layout.height,
            distance = layout.distance,
            intensity = layout.intensity,
            confidence = layout.confidence,
            change_counter,
            "metadata parsed"
        );
        self.layout = Some(layout);
        self.change_counter = Some(change_counter);
        Ok(())
    }

    fn parse_binary(&mut self, data: &[u8]) -> Result<(), DemuxError> {
        let layout = self
            .layout
            .ok_or_else(|| DemuxError::Handler("binary segment before metadata".to_string()))?;

        let (map_bytes, needed) = layout
            .map_bytes()
            .zip(layout.binary_len())
            .ok_or_else(|| {
                DemuxError::Handler(format!(
                    "map size {}x{} is too large",
                    layout.width, layout.height
                ))
            })?;
        if data.len() < needed {
            return Err(DemuxError::Handler(format!(
                "binary segment has {} bytes, need {}",
                data.len(),
                needed
            )));
        }

        let mut buf = data;
        let length = buf.get_u32_le();
        if length as usize > data.len() {
            return Err(DemuxError::Handler(format!(
                "binary length {} exceeds segment of {} bytes",
                length,
                data.len()
            )));
        }
        let packed_time = buf.get_u64_le();
        let _version = buf.get_u16_le();
        let sequence = buf.get_u32_le();
        let quality = buf.get_u8();
        let status = buf.get_u8();

        let distance = if layout.distance {
            read_map(&mut buf, map_bytes)
        } else {
            Vec::new()
        };
        let intensity = if layout.intensity {
            read_map(&mut buf, map_bytes)
        } else {
            Vec::new()
        };
        let confidence = if layout.confidence {
            read_map(&mut buf, map_bytes)
        } else {
            Vec::new()
        };

        let _crc = buf.get_u32_le();
        let length_copy = buf.get_u32_le();
        if length_copy != length {
            return Err(DemuxError::Handler(format!(
                "binary length mismatch: {} != {}",
                length, length_copy
            )));
        }

        self.intensity = intensity;
        self.confidence = confidence;
        self.quality = quality;
        self.status = status;
        self.pending = Some(Frame::new(
            distance,
            layout.height,
            layout.width,
            sequence,
            timestamp_ms(packed_time),
        ));
        Ok(())
    }

    fn take_frame(&mut self) -> Option<Frame> {
        self.pending.take()
    }
}

/// Builders for synthetic depth-map blobs.
#[cfg(test)]
pub(crate) mod fixtures {
    use bytes::BufMut;

    pub fn metadata_xml(width: u32, height: u32) -> String {
        format!(
            "<SickRecord><DataSets><DataSetDepthMap><FormatDescriptionDepthMap>\
             <DataStream><Interleaved>false</Interleaved>\
             <Width>{}</Width><Height>{}</Height>\
             <Distance decimalexponent=\"0\">uint16</Distance>\
             <Intensity>uint16</Intensity>\
             <Confidence>uint16</Confidence>\
             </DataStream></FormatDescriptionDepthMap></DataSetDepthMap></DataSets></SickRecord>",
            width, height
        )
    }

    pub fn packed_time(hour: u64, minute: u64, second: u64, millis: u64) -> u64 {
        (hour << 32) | (minute << 26) | (second << 20) | (millis << 10)
    }

    pub fn binary(width: u32, height: u32, sequence: u32, packed: u64, base: u16) -> Vec<u8> {
        let pixels = (width * height) as usize;
        let mut body = Vec::new();
        let length = (super::BINARY_HEADER_LEN + pixels * 6 + 4) as u32;
        body.put_u32_le(length);
        body.put_u64_le(packed);
        body.put_u16_le(2);
        body.put_u32_le(sequence);
        body.put_u8(1);
        body.put_u8(0);
        for map in 0..3u16 {
            for i in 0..pixels as u16 {
                body.put_u16_le(base + map * 1000 + i);
            }
        }
        body.put_u32_le(0);
        body.put_u32_le(length);
        body
    }
}
