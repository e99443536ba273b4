//! Streaming error types.

use colacam_client::TransportError;
use std::io;
use thiserror::Error;

/// Failures while reading one frame from the streaming channel.
#[derive(Debug, Error)]
pub enum DemuxError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("invalid packet length {0}, must be at least 3")]
    PacketTooShort(u32),

    #[error("packet length {size} exceeds maximum {max}")]
    PacketTooLarge { size: u32, max: u32 },

    #[error("unsupported protocol version {0}")]
    Version(u16),

    #[error("unsupported packet type {0:#04x}")]
    PacketType(u8),

    #[error("segment header truncated: {0} bytes")]
    HeaderTruncated(usize),

    #[error("too few segments: {count}, need at least {min}")]
    SegmentCount { count: u16, min: u16 },

    #[error("segment table truncated: need {needed} bytes, have {available}")]
    TableTruncated { needed: usize, available: usize },

    #[error("segment offsets not increasing at index {0}")]
    NonMonotonicOffsets(usize),

    #[error("segment {index} out of bounds: {start}..{end} in blob of {len} bytes")]
    SegmentOutOfBounds {
        index: usize,
        start: usize,
        end: usize,
        len: usize,
    },

    #[error("frame data rejected: {0}")]
    Handler(String),
}

/// Frame grabber lifecycle errors.
#[derive(Debug, Error)]
pub enum GrabberError {
    #[error("grabber already started")]
    AlreadyStarted,

    #[error("grabber stopped")]
    Stopped,

    #[error("failed to spawn grabber thread: {0}")]
    Spawn(#[from] io::Error),
}
