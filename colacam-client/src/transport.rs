//! Byte transports.
//!
//! A [`Transport`] is a blocking, thread-safe byte pipe. All methods take
//! `&self` so one thread can shut a transport down while another is blocked
//! reading from it.

use crate::error::TransportError;
use bytes::{Bytes, BytesMut};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Largest single `read_exact` request (125 MiB).
pub const MAX_READ_SIZE: usize = 125 * 1024 * 1024;

/// A connected byte stream.
pub trait Transport: Send + Sync {
    /// Writes all of `data`. A partial write is an error.
    fn send(&self, data: &[u8]) -> Result<usize, TransportError>;

    /// Performs a single best-effort read of at most `max` bytes.
    fn recv(&self, max: usize) -> Result<Bytes, TransportError>;

    /// Reads exactly `n` bytes, looping over short reads.
    fn read_exact(&self, n: usize) -> Result<Bytes, TransportError>;

    /// Closes both directions. Blocked readers return promptly.
    fn shutdown(&self);

    /// Returns the error left by the most recent operation, if it failed.
    fn last_error(&self) -> Option<io::Error>;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn send(&self, data: &[u8]) -> Result<usize, TransportError> {
        (**self).send(data)
    }

    fn recv(&self, max: usize) -> Result<Bytes, TransportError> {
        (**self).recv(max)
    }

    fn read_exact(&self, n: usize) -> Result<Bytes, TransportError> {
        (**self).read_exact(n)
    }

    fn shutdown(&self) {
        (**self).shutdown()
    }

    fn last_error(&self) -> Option<io::Error> {
        (**self).last_error()
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn send(&self, data: &[u8]) -> Result<usize, TransportError> {
        (**self).send(data)
    }

    fn recv(&self, max: usize) -> Result<Bytes, TransportError> {
        (**self).recv(max)
    }

    fn read_exact(&self, n: usize) -> Result<Bytes, TransportError> {
        (**self).read_exact(n)
    }

    fn shutdown(&self) {
        (**self).shutdown()
    }

    fn last_error(&self) -> Option<io::Error> {
        (**self).last_error()
    }
}

fn check_read_size(n: usize) -> Result<(), TransportError> {
    if n > MAX_READ_SIZE {
        return Err(TransportError::TooLarge {
            size: n,
            max: MAX_READ_SIZE,
        });
    }
    Ok(())
}

/// Records the outcome of the most recent operation.
#[derive(Default)]
struct LastError(Mutex<Option<(io::ErrorKind, String)>>);

impl LastError {
    fn clear(&self) {
        *self.0.lock() = None;
    }

    fn set(&self, err: &TransportError) {
        let kind = match err {
            TransportError::Connect { source, .. } => source.kind(),
            TransportError::Io(e) => e.kind(),
            TransportError::Timeout => io::ErrorKind::TimedOut,
            TransportError::Closed => io::ErrorKind::ConnectionAborted,
            TransportError::TooLarge { .. } => io::ErrorKind::InvalidInput,
            TransportError::ShortWrite { .. } => io::ErrorKind::WriteZero,
        };
        *self.0.lock() = Some((kind, err.to_string()));
    }

    fn get(&self) -> Option<io::Error> {
        self.0
            .lock()
            .as_ref()
            .map(|(kind, msg)| io::Error::new(*kind, msg.clone()))
    }

    fn record<T>(&self, result: Result<T, TransportError>) -> Result<T, TransportError> {
        match &result {
            Ok(_) => self.clear(),
            Err(e) => self.set(e),
        }
        result
    }
}

/// TCP transport with connect and read timeouts.
pub struct TcpTransport {
    stream: TcpStream,
    peer: String,
    closed: AtomicBool,
    last_error: LastError,
}

impl TcpTransport {
    /// Connects to `host:port`, trying each resolved address in turn.
    ///
    /// `timeout` bounds the connect and is used as the read/write timeout.
    pub fn connect(host: &str, port: u16, timeout: Duration) -> Result<Self, TransportError> {
        let peer = format!("{}:{}", host, port);
        let addrs = (host, port)
            .to_socket_addrs()
            .map_err(|source| TransportError::Connect {
                addr: peer.clone(),
                source,
            })?;

        let mut last_err = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    stream.set_read_timeout(Some(timeout))?;
                    stream.set_write_timeout(Some(timeout))?;
                    debug!(peer = %peer, "connected");
                    return Ok(Self {
                        stream,
                        peer,
                        closed: AtomicBool::new(false),
                        last_error: LastError::default(),
                    });
                }
                Err(e) => last_err = Some(e),
            }
        }

        Err(TransportError::Connect {
            addr: peer,
            source: last_err
                .unwrap_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no address resolved")),
        })
    }

    /// Changes the read timeout. `None` blocks indefinitely.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<(), TransportError> {
        self.stream.set_read_timeout(timeout)?;
        Ok(())
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        Ok(())
    }

    fn write_all(&self, data: &[u8]) -> Result<usize, TransportError> {
        self.ensure_open()?;
        let mut written = 0;
        while written < data.len() {
            match (&self.stream).write(&data[written..]) {
                Ok(0) => {
                    return Err(TransportError::ShortWrite {
                        written,
                        expected: data.len(),
                    })
                }
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(written)
    }

    fn read_once(&self, max: usize) -> Result<Bytes, TransportError> {
        check_read_size(max)?;
        self.ensure_open()?;
        let mut buf = vec![0u8; max];
        loop {
            match (&self.stream).read(&mut buf) {
                Ok(0) if max > 0 => return Err(TransportError::Closed),
                Ok(n) => {
                    buf.truncate(n);
                    return Ok(Bytes::from(buf));
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn read_full(&self, n: usize) -> Result<Bytes, TransportError> {
        check_read_size(n)?;
        self.ensure_open()?;
        let mut buf = BytesMut::zeroed(n);
        let mut filled = 0;
        while filled < n {
            match (&self.stream).read(&mut buf[filled..]) {
                Ok(0) => return Err(TransportError::Closed),
                Ok(read) => filled += read,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        trace!(bytes = n, "read");
        Ok(buf.freeze())
    }
}

impl Transport for TcpTransport {
    fn send(&self, data: &[u8]) -> Result<usize, TransportError> {
        self.last_error.record(self.write_all(data))
    }

    fn recv(&self, max: usize) -> Result<Bytes, TransportError> {
        self.last_error.record(self.read_once(max))
    }

    fn read_exact(&self, n: usize) -> Result<Bytes, TransportError> {
        self.last_error.record(self.read_full(n))
    }

    fn shutdown(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!(peer = %self.peer, "shutting down transport");
            let _ = self.stream.shutdown(Shutdown::Both);
        }
    }

    fn last_error(&self) -> Option<io::Error> {
        self.last_error.get()
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[derive(Default)]
struct MemoryState {
    incoming: VecDeque<u8>,
    written: Vec<u8>,
    finished: bool,
    shutdown: bool,
    fail_sends: bool,
}

/// In-memory transport fed from a script of incoming bytes.
///
/// Reads block until enough bytes are pushed, the script is finished
/// (end of stream) or the transport is shut down. Everything sent is
/// captured for inspection.
#[derive(Default)]
pub struct MemoryTransport {
    state: Mutex<MemoryState>,
    readable: Condvar,
    read_timeout: Option<Duration>,
    max_chunk: Option<usize>,
    last_error: LastError,
}

impl MemoryTransport {
    /// Creates an open transport with nothing to read yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a transport that yields `data` and then reports end of stream.
    pub fn from_bytes(data: impl AsRef<[u8]>) -> Self {
        let transport = Self::new();
        transport.push_incoming(data);
        transport.finish();
        transport
    }

    /// Makes blocked reads fail with `Timeout` after `timeout`.
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    /// Limits every underlying read to `chunk` bytes, forcing short reads.
    pub fn with_max_chunk(mut self, chunk: usize) -> Self {
        self.max_chunk = Some(chunk.max(1));
        self
    }

    /// Appends bytes for readers.
    pub fn push_incoming(&self, data: impl AsRef<[u8]>) {
        let mut state = self.state.lock();
        state.incoming.extend(data.as_ref());
        self.readable.notify_all();
    }

    /// Marks the end of the incoming script.
    pub fn finish(&self) {
        self.state.lock().finished = true;
        self.readable.notify_all();
    }

    /// Makes subsequent sends fail as if the peer went away.
    pub fn set_fail_sends(&self, fail: bool) {
        self.state.lock().fail_sends = fail;
    }

    /// Returns everything sent so far.
    pub fn written(&self) -> Vec<u8> {
        self.state.lock().written.clone()
    }

    /// Returns and clears everything sent so far.
    pub fn take_written(&self) -> Vec<u8> {
        std::mem::take(&mut self.state.lock().written)
    }

    pub fn is_shutdown(&self) -> bool {
        self.state.lock().shutdown
    }

    /// Blocks until some bytes are buffered and takes up to `want` of them.
    fn wait_readable(&self, want: usize) -> Result<Vec<u8>, TransportError> {
        let deadline = self.read_timeout.map(|t| Instant::now() + t);
        let mut state = self.state.lock();
        loop {
            if state.shutdown {
                return Err(TransportError::Closed);
            }
            if !state.incoming.is_empty() {
                let take = want.min(state.incoming.len());
                let take = self.max_chunk.map_or(take, |c| take.min(c));
                return Ok(state.incoming.drain(..take).collect());
            }
            if state.finished {
                return Err(TransportError::Closed);
            }
            match deadline {
                Some(deadline) => {
                    if self.readable.wait_until(&mut state, deadline).timed_out() {
                        return Err(TransportError::Timeout);
                    }
                }
                None => self.readable.wait(&mut state),
            }
        }
    }

    fn read_full(&self, n: usize) -> Result<Bytes, TransportError> {
        check_read_size(n)?;
        let mut buf = BytesMut::with_capacity(n);
        while buf.len() < n {
            let chunk = self.wait_readable(n - buf.len())?;
            buf.extend_from_slice(&chunk);
        }
        Ok(buf.freeze())
    }
}

impl Transport for MemoryTransport {
    fn send(&self, data: &[u8]) -> Result<usize, TransportError> {
        let result = {
            let mut state = self.state.lock();
            if state.shutdown || state.fail_sends {
                Err(TransportError::Io(io::Error::from(io::ErrorKind::BrokenPipe)))
            } else {
                state.written.extend_from_slice(data);
                Ok(data.len())
            }
        };
        self.last_error.record(result)
    }

    fn recv(&self, max: usize) -> Result<Bytes, TransportError> {
        let result = if max == 0 {
            Ok(Bytes::new())
        } else {
            self.wait_readable(max).map(Bytes::from)
        };
        self.last_error.record(result)
    }

    fn read_exact(&self, n: usize) -> Result<Bytes, TransportError> {
        self.last_error.record(self.read_full(n))
    }

    fn shutdown(&self) {
        self.state.lock().shutdown = true;
        self.readable.notify_all();
    }

    fn last_error(&self) -> Option<io::Error> {
        self.last_error.get()
    }
}
