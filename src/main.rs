//! colacam - headless acquisition
//!
//! Connects to a CoLa sensor, starts continuous acquisition and hands each
//! new frame to a worker thread until interrupted.

mod config;

use colacam_client::DeviceControl;
use colacam_stream::{tcp_connector, DepthMapHandler, Frame, FrameGrabber, Mailbox};
use config::Config;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // A config file named explicitly must load; otherwise fall back to defaults.
    let config = match Config::load() {
        Ok(c) => {
            if let Ok(path) = std::env::var("COLACAM_CONFIG") {
                tracing::info!("Loaded config from {}", path);
            }
            c
        }
        Err(e) => {
            if std::env::var("COLACAM_CONFIG").is_ok() {
                tracing::error!("Failed to load config: {}", e);
                return Err(e.into());
            }
            tracing::info!("Using default configuration");
            Config::default()
        }
    };

    tracing::info!("Starting colacam");
    tracing::info!("  Device: {}", config.device.host);
    tracing::info!(
        "  Control: {} on port {}",
        config.device.protocol,
        config.device.control_port()
    );
    tracing::info!("  Streaming port: {}", config.stream.port);

    let device = DeviceControl::open(config.device.control_config())?;
    match device.device_ident() {
        Ok(ident) => tracing::info!("  Device ident: {}", ident),
        Err(e) => tracing::warn!("Failed to read device ident: {}", e),
    }

    let grabber = FrameGrabber::new(config.stream.grabber_config());
    grabber.start(
        tcp_connector(
            config.device.host.clone(),
            config.stream.port,
            config.device.connect_timeout(),
        ),
        DepthMapHandler::new(),
    )?;

    // Restart acquisition so the stream begins from a clean state.
    if let Err(e) = device.stop_acquisition() {
        tracing::warn!("Failed to stop acquisition: {}", e);
    }
    device.start_acquisition()?;
    tracing::info!("Acquisition started");

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        if let Err(e) = ctrlc::set_handler(move || {
            running.store(false, Ordering::Release);
        }) {
            tracing::warn!("Failed to install interrupt handler: {}", e);
        }
    }

    let mailbox: Arc<Mailbox<Frame>> = Arc::new(Mailbox::new());
    let worker = {
        let mailbox = mailbox.clone();
        let timeout = config.stream.frame_timeout();
        thread::Builder::new()
            .name("colacam-worker".to_string())
            .spawn(move || loop {
                match mailbox.take_timeout(timeout) {
                    Some(frame) => process_frame(&frame),
                    None if mailbox.is_closed() => break,
                    None => {}
                }
            })?
    };

    let mut reader = grabber.reader();
    let frame_timeout = config.stream.frame_timeout();
    while running.load(Ordering::Acquire) {
        match reader.next_frame(frame_timeout) {
            Some(frame) => {
                if mailbox.put(frame) {
                    tracing::debug!("Worker busy, replaced pending frame");
                }
            }
            None => tracing::warn!("No frame within {:?}", frame_timeout),
        }
    }

    tracing::info!("Received shutdown signal, stopping acquisition...");
    mailbox.close();
    if worker.join().is_err() {
        tracing::error!("Worker thread panicked");
    }
    grabber.stop();

    if let Err(e) = device.stop_acquisition() {
        tracing::warn!("Failed to stop acquisition: {}", e);
    }
    device.close();

    let stats = grabber.stats();
    tracing::info!(
        "Stopped ({} frames, {} failures, {} reconnects)",
        stats.frames,
        stats.failures,
        stats.reconnects
    );
    Ok(())
}

fn process_frame(frame: &Frame) {
    match frame.valid_range() {
        Some((min, max)) => tracing::info!(
            sequence = frame.sequence,
            width = frame.width,
            height = frame.height,
            timestamp_ms = frame.timestamp_ms,
            min,
            max,
            "frame"
        ),
        None => tracing::info!(
            sequence = frame.sequence,
            width = frame.width,
            height = frame.height,
            timestamp_ms = frame.timestamp_ms,
            "frame without valid pixels"
        ),
    }
}
