//! # colacam-stream
//!
//! Streaming channel for CoLa devices.
//!
//! This crate provides:
//! - Blob packet demultiplexing with segment table validation
//! - A depth-map handler turning blobs into frames
//! - A background frame grabber with automatic reconnect
//! - A latest-wins mailbox for handing frames to a worker

pub mod demux;
pub mod error;
pub mod frame;
pub mod grabber;
pub mod handler;
pub mod mailbox;

pub use demux::{DataStream, DemuxConfig, SegmentEntry, SegmentTable};
pub use error::{DemuxError, GrabberError};
pub use frame::Frame;
pub use grabber::{
    tcp_connector, FrameGrabber, FrameReader, GrabberConfig, GrabberState, GrabberStats,
    StreamConnector,
};
pub use handler::{DepthMapHandler, DepthMapLayout, FrameDataHandler};
pub use mailbox::Mailbox;
