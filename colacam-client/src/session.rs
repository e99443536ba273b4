//! Control session: serialised request dispatch with auto-reconnect.

use crate::error::ClientError;
use crate::handler::ProtocolHandler;
use colacam_protocol::{Command, CommandType, DeviceError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

/// Produces a freshly connected protocol handler.
pub trait Connector: Send + Sync {
    fn connect(&self) -> Result<Box<dyn ProtocolHandler>, ClientError>;
}

impl<F> Connector for F
where
    F: Fn() -> Result<Box<dyn ProtocolHandler>, ClientError> + Send + Sync,
{
    fn connect(&self) -> Result<Box<dyn ProtocolHandler>, ClientError> {
        self()
    }
}

/// Session settings.
#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    /// Timeout the device applies to an idle session.
    pub session_timeout_secs: u8,
    /// Reconnect once when the device reports an unknown session.
    pub auto_reconnect: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_timeout_secs: 5,
            auto_reconnect: true,
        }
    }
}

/// Serialises commands onto one protocol handler.
pub struct ControlSession {
    handler: Mutex<Box<dyn ProtocolHandler>>,
    connector: Option<Box<dyn Connector>>,
    config: SessionConfig,
    reconnects: AtomicU64,
}

impl ControlSession {
    pub fn new(handler: Box<dyn ProtocolHandler>, config: SessionConfig) -> Self {
        Self {
            handler: Mutex::new(handler),
            connector: None,
            config,
            reconnects: AtomicU64::new(0),
        }
    }

    /// Installs the connector used to replace a lost session.
    pub fn with_connector(mut self, connector: impl Connector + 'static) -> Self {
        self.connector = Some(Box::new(connector));
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Opens the session on the current handler.
    pub fn open(&self) -> Result<(), ClientError> {
        self.handler
            .lock()
            .open_session(self.config.session_timeout_secs)
    }

    /// Closes the session on the current handler.
    pub fn close(&self) -> Result<(), ClientError> {
        self.handler.lock().close_session()
    }

    pub fn is_open(&self) -> bool {
        self.handler.lock().is_open()
    }

    /// Tears down the current handler's transport.
    pub fn shutdown(&self) {
        self.handler.lock().shutdown();
    }

    /// Number of successful reconnects so far.
    pub fn reconnect_count(&self) -> u64 {
        self.reconnects.load(Ordering::Relaxed)
    }

    /// Sends a command and returns the reply.
    ///
    /// When the device answers `SESSION_UNKNOWN_ID` and a connector is
    /// installed, the handler is replaced and the command resent once. The
    /// retry's reply is returned, or the original reply if reconnecting fails.
    pub fn send(&self, command: &Command) -> Command {
        let mut handler = self.handler.lock();
        let response = handler.send(command);

        if !self.config.auto_reconnect || !response.error().is_session_lost() {
            return response;
        }
        let Some(connector) = self.connector.as_deref() else {
            return response;
        };

        warn!(command = command.name(), "session lost, reconnecting");
        match self.reconnect(&mut handler, connector) {
            Ok(()) => {
                self.reconnects.fetch_add(1, Ordering::Relaxed);
                info!("session re-established");
                handler.send(command)
            }
            Err(e) => {
                warn!(error = %e, "reconnect failed");
                response
            }
        }
    }

    fn reconnect(
        &self,
        handler: &mut Box<dyn ProtocolHandler>,
        connector: &dyn Connector,
    ) -> Result<(), ClientError> {
        handler.shutdown();
        let mut fresh = connector.connect()?;
        fresh.open_session(self.config.session_timeout_secs)?;
        *handler = fresh;
        Ok(())
    }

    /// Reads a variable (`sRN`).
    pub fn read_variable(&self, name: &str) -> Result<Command, ClientError> {
        let command = Command::new(CommandType::ReadVariable, name, &[]);
        self.request(&command)
    }

    /// Writes a variable (`sWN`).
    pub fn write_variable(&self, name: &str, params: &[u8]) -> Result<(), ClientError> {
        let command = Command::new(CommandType::WriteVariable, name, params);
        self.request(&command).map(|_| ())
    }

    /// Invokes a method (`sMN`) and returns its reply.
    pub fn invoke(&self, name: &str, params: &[u8]) -> Result<Command, ClientError> {
        let command = Command::new(CommandType::MethodInvocation, name, params);
        self.request(&command)
    }

    /// Sends an already built command, checking the reply type and error.
    pub fn request(&self, command: &Command) -> Result<Command, ClientError> {
        debug!(kind = ?command.kind(), name = command.name(), "request");
        let response = self.send(command);
        check_response(command, response)
    }
}

fn check_response(command: &Command, response: Command) -> Result<Command, ClientError> {
    match response.error() {
        DeviceError::Ok => {}
        DeviceError::NetworkError => return Err(ClientError::Network),
        err => return Err(ClientError::Device(err)),
    }

    if let Some(expected) = command.kind().response_type() {
        if response.kind() != expected {
            return Err(ClientError::UnexpectedResponse {
                expected: format!("{:?}", expected),
                actual: format!("{:?}", response.kind()),
            });
        }
    }
    Ok(response)
}
