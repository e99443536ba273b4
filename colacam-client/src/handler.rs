//! Protocol handlers for the CoLa dialects.
//!
//! A handler owns one transport and turns a [`Command`] into a framed
//! request, waits for the reply and decodes it. Transport failures never
//! escape `send`: they come back as [`Command::network_error`].

use crate::error::{ClientError, TransportError};
use crate::transport::Transport;
use bytes::Bytes;
use colacam_protocol::frame::{cola2, colab};
use colacam_protocol::{Command, FramingError, SyncTracker, MAX_PAYLOAD_SIZE, STX};
use tracing::{debug, warn};

/// Session lifecycle and request/response exchange for one dialect.
pub trait ProtocolHandler: Send {
    /// Opens a session with the given device-side timeout.
    fn open_session(&mut self, timeout_secs: u8) -> Result<(), ClientError>;

    /// Closes the session, if one is open.
    fn close_session(&mut self) -> Result<(), ClientError>;

    /// Sends a command and returns the device's reply.
    fn send(&mut self, command: &Command) -> Command;

    fn is_open(&self) -> bool;

    /// Tears down the underlying transport.
    fn shutdown(&mut self);
}

/// Scans byte by byte for the STX sync sequence, then reads the length field.
fn read_sync_and_length<T: Transport>(transport: &T) -> Result<u32, ClientError> {
    let mut tracker = SyncTracker::new();
    let mut skipped = 0usize;
    loop {
        let byte = transport.recv(1)?;
        let Some(&b) = byte.first() else {
            return Err(TransportError::Closed.into());
        };
        if tracker.push(b) {
            break;
        }
        if b != STX {
            skipped += 1;
        }
    }
    if skipped > 0 {
        debug!(skipped, "discarded bytes before sync");
    }

    let raw = transport.read_exact(4)?;
    let len = u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]);
    if len > MAX_PAYLOAD_SIZE {
        return Err(FramingError::FrameTooLarge {
            size: len,
            max: MAX_PAYLOAD_SIZE,
        }
        .into());
    }
    Ok(len)
}

/// Settings for the CoLa-B handler.
#[derive(Debug, Clone, Copy)]
pub struct ColaBConfig {
    /// Reject replies whose XOR checksum does not match.
    pub verify_checksum: bool,
}

impl Default for ColaBConfig {
    fn default() -> Self {
        Self {
            verify_checksum: true,
        }
    }
}

/// CoLa-B: sessionless, checksummed framing.
pub struct ColaBHandler<T: Transport> {
    transport: T,
    config: ColaBConfig,
    open: bool,
}

impl<T: Transport> ColaBHandler<T> {
    pub fn new(transport: T, config: ColaBConfig) -> Self {
        Self {
            transport,
            config,
            open: false,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn exchange(&mut self, command: &Command) -> Result<Command, ClientError> {
        let frame = colab::encode(command.buffer())?;
        self.transport.send(&frame)?;

        let len = read_sync_and_length(&self.transport)?;
        let body = self.transport.read_exact(len as usize + 1)?;
        match colab::split_checksum(body.clone(), self.config.verify_checksum) {
            Ok(payload) => Ok(Command::from_response(payload)),
            Err(FramingError::ChecksumMismatch { expected, actual }) => {
                warn!(
                    command = command.name(),
                    expected, actual, "checksum mismatch in reply"
                );
                Ok(Command::unknown(body.slice(..body.len() - 1)))
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl<T: Transport> ProtocolHandler for ColaBHandler<T> {
    fn open_session(&mut self, _timeout_secs: u8) -> Result<(), ClientError> {
        self.open = true;
        Ok(())
    }

    fn close_session(&mut self) -> Result<(), ClientError> {
        self.open = false;
        Ok(())
    }

    fn send(&mut self, command: &Command) -> Command {
        match self.exchange(command) {
            Ok(response) => response,
            Err(e) => {
                warn!(command = command.name(), error = %e, "exchange failed");
                Command::network_error()
            }
        }
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn shutdown(&mut self) {
        self.open = false;
        self.transport.shutdown();
    }
}

/// CoLa-2: session-oriented framing without checksum.
pub struct Cola2Handler<T: Transport> {
    transport: T,
    client_id: String,
    session_id: u32,
    request_id: u16,
    open: bool,
}

impl<T: Transport> Cola2Handler<T> {
    pub fn new(transport: T, client_id: impl Into<String>) -> Self {
        Self {
            transport,
            client_id: client_id.into(),
            session_id: 0,
            request_id: 0,
            open: false,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn session_id(&self) -> u32 {
        self.session_id
    }

    fn next_header(&mut self) -> cola2::Header {
        self.request_id = self.request_id.wrapping_add(1);
        cola2::Header::new(self.session_id, self.request_id)
    }

    fn receive(&mut self) -> Result<(cola2::Header, Bytes), ClientError> {
        let len = read_sync_and_length(&self.transport)?;
        if (len as usize) < cola2::INNER_HEADER_LEN {
            return Err(FramingError::LengthUnderflow(len).into());
        }
        let body = self.transport.read_exact(len as usize)?;
        let (header, payload) = cola2::decode_body(body)?;
        if header.request_id != self.request_id {
            debug!(
                expected = self.request_id,
                actual = header.request_id,
                "reply for a different request id"
            );
        }
        Ok((header, payload))
    }

    fn exchange(&mut self, command: &Command) -> Result<Command, ClientError> {
        let header = self.next_header();
        let frame = cola2::encode_command(header, command)?;
        self.transport.send(&frame)?;
        let (_, payload) = self.receive()?;
        Ok(Command::from_response(cola2::reply_to_command_bytes(
            &payload,
        )))
    }
}

fn reply_code(payload: &[u8]) -> String {
    String::from_utf8_lossy(&payload[..payload.len().min(2)]).into_owned()
}

impl<T: Transport> ProtocolHandler for Cola2Handler<T> {
    fn open_session(&mut self, timeout_secs: u8) -> Result<(), ClientError> {
        self.session_id = 0;
        let header = self.next_header();
        let payload = cola2::open_session_payload(timeout_secs, &self.client_id);
        let frame = cola2::encode(header, &payload)?;
        self.transport.send(&frame)?;

        let (reply, payload) = self.receive()?;
        if !payload.starts_with(cola2::OPEN_SESSION_REPLY) {
            return Err(ClientError::SessionOpen(format!(
                "unexpected reply {:?}",
                reply_code(&payload)
            )));
        }
        self.session_id = reply.session_id;
        self.open = true;
        debug!(session_id = self.session_id, "session opened");
        Ok(())
    }

    fn close_session(&mut self) -> Result<(), ClientError> {
        if !self.open {
            return Ok(());
        }
        let header = self.next_header();
        let frame = cola2::encode(header, cola2::CLOSE_SESSION)?;
        self.open = false;
        self.transport.send(&frame)?;

        let (_, payload) = self.receive()?;
        let session_id = std::mem::take(&mut self.session_id);
        if !payload.starts_with(cola2::CLOSE_SESSION_REPLY) {
            return Err(ClientError::UnexpectedResponse {
                expected: "CA".to_string(),
                actual: reply_code(&payload),
            });
        }
        debug!(session_id, "session closed");
        Ok(())
    }

    fn send(&mut self, command: &Command) -> Command {
        match self.exchange(command) {
            Ok(response) => response,
            Err(e) => {
                warn!(command = command.name(), error = %e, "exchange failed");
                Command::network_error()
            }
        }
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn shutdown(&mut self) {
        self.open = false;
        self.transport.shutdown();
    }
}
