//! Background frame acquisition.
//!
//! A [`FrameGrabber`] owns one thread that keeps the streaming connection
//! alive, decodes blobs and publishes the newest frame. Consumers either
//! peek at the latest frame or wait for the next one.

use crate::demux::{DataStream, DemuxConfig};
use crate::error::GrabberError;
use crate::frame::Frame;
use crate::handler::FrameDataHandler;
use colacam_client::{TcpTransport, Transport, TransportError};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Opens a streaming connection.
pub trait StreamConnector: Send + 'static {
    fn connect(&self) -> Result<Arc<dyn Transport>, TransportError>;
}

impl<F> StreamConnector for F
where
    F: Fn() -> Result<Arc<dyn Transport>, TransportError> + Send + 'static,
{
    fn connect(&self) -> Result<Arc<dyn Transport>, TransportError> {
        self()
    }
}

/// Connector for a TCP streaming port.
pub fn tcp_connector(host: impl Into<String>, port: u16, timeout: Duration) -> impl StreamConnector {
    let host = host.into();
    move || -> Result<Arc<dyn Transport>, TransportError> {
        let transport = TcpTransport::connect(&host, port, timeout)?;
        Ok(Arc::new(transport))
    }
}

/// Grabber settings.
#[derive(Debug, Clone)]
pub struct GrabberConfig {
    /// Pause between failed connection attempts.
    pub reconnect_delay: Duration,
    pub demux: DemuxConfig,
    pub thread_name: String,
}

impl Default for GrabberConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(1),
            demux: DemuxConfig::default(),
            thread_name: "colacam-grabber".to_string(),
        }
    }
}

impl GrabberConfig {
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn with_demux(mut self, demux: DemuxConfig) -> Self {
        self.demux = demux;
        self
    }
}

/// Grabber lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrabberState {
    NotStarted,
    Running,
    Stopped,
}

/// Counters since start.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GrabberStats {
    /// Frames published.
    pub frames: u64,
    /// Acquisition cycles that ended in an error.
    pub failures: u64,
    /// Connections re-established after a loss.
    pub reconnects: u64,
}

struct Latest {
    frame: Option<Arc<Frame>>,
    generation: u64,
    stopped: bool,
}

struct Shared {
    running: AtomicBool,
    latest: Mutex<Latest>,
    frame_ready: Condvar,
    transport: Mutex<Option<Arc<dyn Transport>>>,
    frames: AtomicU64,
    failures: AtomicU64,
    reconnects: AtomicU64,
}

impl Shared {
    fn new() -> Self {
        Self {
            running: AtomicBool::new(false),
            latest: Mutex::new(Latest {
                frame: None,
                generation: 0,
                stopped: false,
            }),
            frame_ready: Condvar::new(),
            transport: Mutex::new(None),
            frames: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
        }
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn publish(&self, frame: Frame) {
        let frame = Arc::new(frame);
        {
            let mut latest = self.latest.lock();
            latest.frame = Some(frame);
            latest.generation += 1;
        }
        self.frame_ready.notify_all();
        self.frames.fetch_add(1, Ordering::Relaxed);
    }

    fn current(&self) -> Option<Arc<Frame>> {
        self.latest.lock().frame.clone()
    }

    fn generation(&self) -> u64 {
        self.latest.lock().generation
    }

    /// Waits for a frame published after generation `after`.
    fn wait_newer(&self, after: u64, timeout: Duration) -> Option<(u64, Arc<Frame>)> {
        let deadline = Instant::now() + timeout;
        let mut latest = self.latest.lock();
        while latest.generation <= after {
            if latest.stopped {
                return None;
            }
            if self.frame_ready.wait_until(&mut latest, deadline).timed_out() {
                break;
            }
        }
        if latest.generation <= after {
            return None;
        }
        let generation = latest.generation;
        latest.frame.clone().map(|frame| (generation, frame))
    }

    /// Sleeps for `delay` unless the grabber is stopped first.
    fn pause(&self, delay: Duration) {
        let mut latest = self.latest.lock();
        if !latest.stopped {
            self.frame_ready.wait_for(&mut latest, delay);
        }
    }

    fn mark_stopped(&self) {
        self.running.store(false, Ordering::Release);
        self.latest.lock().stopped = true;
        self.frame_ready.notify_all();
    }

    fn stats(&self) -> GrabberStats {
        GrabberStats {
            frames: self.frames.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
        }
    }
}

/// An independent consumer cursor over a grabber's frames.
///
/// A reader only waits for frames published after it was created or after
/// the last frame it returned.
pub struct FrameReader {
    shared: Arc<Shared>,
    cursor: u64,
}

impl FrameReader {
    /// Waits up to `timeout` for a frame this reader has not seen.
    pub fn next_frame(&mut self, timeout: Duration) -> Option<Frame> {
        let (generation, frame) = self.shared.wait_newer(self.cursor, timeout)?;
        self.cursor = generation;
        Some(Frame::clone(&frame))
    }

    pub fn current_frame(&self) -> Option<Frame> {
        self.shared.current().map(|frame| Frame::clone(&frame))
    }
}

/// Background frame acquisition thread.
pub struct FrameGrabber {
    shared: Arc<Shared>,
    config: GrabberConfig,
    cursor: Mutex<u64>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl FrameGrabber {
    pub fn new(config: GrabberConfig) -> Self {
        Self {
            shared: Arc::new(Shared::new()),
            config,
            cursor: Mutex::new(0),
            thread: Mutex::new(None),
        }
    }

    /// Spawns the acquisition thread.
    pub fn start<C, H>(&self, connector: C, handler: H) -> Result<(), GrabberError>
    where
        C: StreamConnector,
        H: FrameDataHandler + 'static,
    {
        let mut thread = self.thread.lock();
        if self.shared.latest.lock().stopped {
            return Err(GrabberError::Stopped);
        }
        if thread.is_some() {
            return Err(GrabberError::AlreadyStarted);
        }

        self.shared.running.store(true, Ordering::Release);
        let shared = Arc::clone(&self.shared);
        let config = self.config.clone();
        let spawned = thread::Builder::new()
            .name(self.config.thread_name.clone())
            .spawn(move || run(shared, connector, handler, config));

        match spawned {
            Ok(handle) => {
                *thread = Some(handle);
                info!("frame grabber started");
                Ok(())
            }
            Err(e) => {
                self.shared.running.store(false, Ordering::Release);
                Err(e.into())
            }
        }
    }

    pub fn state(&self) -> GrabberState {
        if self.shared.latest.lock().stopped {
            GrabberState::Stopped
        } else if self.thread.lock().is_some() {
            GrabberState::Running
        } else {
            GrabberState::NotStarted
        }
    }

    /// Returns a copy of the latest frame, if any has arrived.
    pub fn get_current_frame(&self) -> Option<Frame> {
        self.shared.current().map(|frame| Frame::clone(&frame))
    }

    /// Waits up to `timeout` for a frame newer than the last one returned
    /// here. Returns immediately if one is already waiting.
    pub fn get_next_frame(&self, timeout: Duration) -> Option<Frame> {
        let mut cursor = self.cursor.lock();
        let (generation, frame) = self.shared.wait_newer(*cursor, timeout)?;
        *cursor = generation;
        Some(Frame::clone(&frame))
    }

    /// Creates a consumer with its own cursor.
    pub fn reader(&self) -> FrameReader {
        FrameReader {
            shared: Arc::clone(&self.shared),
            cursor: self.shared.generation(),
        }
    }

    pub fn stats(&self) -> GrabberStats {
        self.shared.stats()
    }

    /// Stops the thread and closes the connection. Safe to call repeatedly.
    ///
    /// The transport is shut down before joining so a blocked read returns.
    pub fn stop(&self) {
        let handle = self.thread.lock().take();
        self.shared.mark_stopped();
        if let Some(transport) = self.shared.transport.lock().take() {
            transport.shutdown();
        }

        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("frame grabber thread panicked");
            }
            let stats = self.shared.stats();
            info!(
                frames = stats.frames,
                failures = stats.failures,
                reconnects = stats.reconnects,
                "frame grabber stopped"
            );
        }
    }
}

impl Drop for FrameGrabber {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run<C, H>(shared: Arc<Shared>, connector: C, mut handler: H, config: GrabberConfig)
where
    C: StreamConnector,
    H: FrameDataHandler,
{
    let mut stream: Option<DataStream<Arc<dyn Transport>>> = None;
    let mut connected_once = false;

    while shared.is_running() {
        if stream.is_none() {
            match connector.connect() {
                Ok(transport) => {
                    *shared.transport.lock() = Some(Arc::clone(&transport));
                    if !shared.is_running() {
                        transport.shutdown();
                        break;
                    }
                    if connected_once {
                        shared.reconnects.fetch_add(1, Ordering::Relaxed);
                        info!("stream reconnected");
                    } else {
                        info!("stream connected");
                    }
                    connected_once = true;
                    stream = Some(DataStream::new(transport, config.demux));
                }
                Err(e) => {
                    warn!(error = %e, "stream connect failed");
                    shared.pause(config.reconnect_delay);
                }
            }
            continue;
        }

        let Some(ds) = stream.as_mut() else {
            continue;
        };
        match ds.next_frame(&mut handler) {
            Ok(()) => match handler.take_frame() {
                Some(frame) => shared.publish(frame),
                None => debug!("blob carried no frame"),
            },
            Err(_) => {
                shared.failures.fetch_add(1, Ordering::Relaxed);
                if !shared.is_running() {
                    break;
                }
                if !ds.is_connected() {
                    warn!("stream connection lost");
                    ds.shutdown();
                    stream = None;
                    shared.transport.lock().take();
                }
            }
        }
    }

    if let Some(ds) = stream {
        ds.shutdown();
    }
    debug!("grabber thread exiting");
}
