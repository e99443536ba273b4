//! High-level device control API.

use crate::auth::{Authenticator, LegacyAuthentication, PasswordHasher, UserLevel};
use crate::error::ClientError;
use crate::handler::{Cola2Handler, ColaBConfig, ColaBHandler, ProtocolHandler};
use crate::session::{ControlSession, SessionConfig};
use crate::transport::TcpTransport;
use colacam_protocol::{ParameterReader, COLA_2_PORT, COLA_B_PORT};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

/// Control channel dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    ColaB,
    Cola2,
}

impl Dialect {
    /// Default control port for the dialect.
    pub fn default_port(&self) -> u16 {
        match self {
            Dialect::ColaB => COLA_B_PORT,
            Dialect::Cola2 => COLA_2_PORT,
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialect::ColaB => f.write_str("cola-b"),
            Dialect::Cola2 => f.write_str("cola-2"),
        }
    }
}

impl FromStr for Dialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cola-b" | "colab" | "b" => Ok(Dialect::ColaB),
            "cola-2" | "cola2" | "2" => Ok(Dialect::Cola2),
            other => Err(format!("unknown dialect: {}", other)),
        }
    }
}

/// Control connection configuration.
#[derive(Clone)]
pub struct ControlConfig {
    /// Device host name or address.
    pub host: String,
    /// Control port.
    pub port: u16,
    pub dialect: Dialect,
    /// Connect (and read) timeout.
    pub connect_timeout: Duration,
    /// Idle timeout requested from the device.
    pub session_timeout: Duration,
    /// Reconnect once when the device forgets the session.
    pub auto_reconnect: bool,
    /// Verify CoLa-B reply checksums.
    pub verify_checksum: bool,
    /// Client identifier sent when opening a CoLa-2 session.
    pub client_id: String,
    /// Password hash for access-mode login. Login is unavailable without it.
    pub password_hasher: Option<PasswordHasher>,
}

impl fmt::Debug for ControlConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("dialect", &self.dialect)
            .field("connect_timeout", &self.connect_timeout)
            .field("session_timeout", &self.session_timeout)
            .field("auto_reconnect", &self.auto_reconnect)
            .field("verify_checksum", &self.verify_checksum)
            .field("client_id", &self.client_id)
            .field("password_hasher", &self.password_hasher.is_some())
            .finish()
    }
}

impl ControlConfig {
    pub fn new(host: impl Into<String>, dialect: Dialect) -> Self {
        Self {
            host: host.into(),
            port: dialect.default_port(),
            dialect,
            connect_timeout: Duration::from_secs(5),
            session_timeout: Duration::from_secs(5),
            auto_reconnect: true,
            verify_checksum: true,
            client_id: "colacam".to_string(),
            password_hasher: None,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = timeout;
        self
    }

    pub fn with_auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }

    pub fn with_verify_checksum(mut self, enabled: bool) -> Self {
        self.verify_checksum = enabled;
        self
    }

    pub fn with_client_id(mut self, id: impl Into<String>) -> Self {
        self.client_id = id.into();
        self
    }

    pub fn with_password_hasher(mut self, hasher: PasswordHasher) -> Self {
        self.password_hasher = Some(hasher);
        self
    }

    /// Session timeout in whole seconds, as carried on the wire.
    pub fn session_timeout_secs(&self) -> u8 {
        u8::try_from(self.session_timeout.as_secs()).unwrap_or(u8::MAX)
    }

    fn session_config(&self) -> SessionConfig {
        SessionConfig {
            session_timeout_secs: self.session_timeout_secs(),
            auto_reconnect: self.auto_reconnect,
        }
    }
}

/// Connects a new TCP transport and wraps it in the dialect's handler.
pub fn connect_handler(config: &ControlConfig) -> Result<Box<dyn ProtocolHandler>, ClientError> {
    let transport = TcpTransport::connect(&config.host, config.port, config.connect_timeout)?;
    let handler: Box<dyn ProtocolHandler> = match config.dialect {
        Dialect::ColaB => Box::new(ColaBHandler::new(
            transport,
            ColaBConfig {
                verify_checksum: config.verify_checksum,
            },
        )),
        Dialect::Cola2 => Box::new(Cola2Handler::new(transport, config.client_id.clone())),
    };
    Ok(handler)
}

/// Device control over one control session.
pub struct DeviceControl {
    session: ControlSession,
    auth: Option<Box<dyn Authenticator>>,
}

impl DeviceControl {
    /// Connects to the device and opens a session.
    pub fn open(config: ControlConfig) -> Result<Self, ClientError> {
        let handler = connect_handler(&config)?;
        info!(
            host = %config.host,
            port = config.port,
            dialect = %config.dialect,
            "control channel connected"
        );

        let reconnect_config = config.clone();
        let session = ControlSession::new(handler, config.session_config())
            .with_connector(move || connect_handler(&reconnect_config));
        Self::from_session(session, &config)
    }

    /// Builds device control over an existing session and opens it.
    pub fn from_session(session: ControlSession, config: &ControlConfig) -> Result<Self, ClientError> {
        if let Err(e) = session.open() {
            session.shutdown();
            return Err(e);
        }
        let auth = config
            .password_hasher
            .clone()
            .map(|hasher| Box::new(LegacyAuthentication::new(hasher)) as Box<dyn Authenticator>);
        Ok(Self { session, auth })
    }

    /// Replaces the authenticator.
    pub fn with_authenticator(mut self, auth: impl Authenticator + 'static) -> Self {
        self.auth = Some(Box::new(auth));
        self
    }

    /// Raw session access for variable reads and writes.
    pub fn session(&self) -> &ControlSession {
        &self.session
    }

    /// Reads the device identification string.
    pub fn device_ident(&self) -> Result<String, ClientError> {
        let reply = self.session.read_variable("DeviceIdent")?;
        let mut reader = ParameterReader::new(&reply)?;
        Ok(reader.read_flex_string()?)
    }

    /// Starts continuous acquisition.
    pub fn start_acquisition(&self) -> Result<(), ClientError> {
        self.session.invoke("PLAYSTART", &[]).map(|_| ())
    }

    /// Acquires a single frame.
    pub fn step_acquisition(&self) -> Result<(), ClientError> {
        self.session.invoke("PLAYNEXT", &[]).map(|_| ())
    }

    /// Stops acquisition.
    pub fn stop_acquisition(&self) -> Result<(), ClientError> {
        self.session.invoke("PLAYSTOP", &[]).map(|_| ())
    }

    /// Requests the streaming channel configuration.
    pub fn data_stream_config(&self) -> Result<(), ClientError> {
        self.session.invoke("GetBlobClientConfig", &[]).map(|_| ())
    }

    pub fn login(&self, level: UserLevel, password: &str) -> Result<(), ClientError> {
        let auth = self.auth.as_ref().ok_or(ClientError::NoAuthenticator)?;
        auth.login(&self.session, level, password)
    }

    pub fn logout(&self) -> Result<(), ClientError> {
        let auth = self.auth.as_ref().ok_or(ClientError::NoAuthenticator)?;
        auth.logout(&self.session)
    }

    /// Logs out, closes the session and shuts the transport down.
    pub fn close(self) {
        if let Some(auth) = &self.auth {
            if let Err(e) = auth.logout(&self.session) {
                warn!(error = %e, "logout failed during close");
            }
        }
        if let Err(e) = self.session.close() {
            warn!(error = %e, "close session failed");
        }
        self.session.shutdown();
        info!("control channel closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryTransport;
    use colacam_protocol::{cola2, colab};
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::sync::Arc;
    use std::thread;

    fn colab_control(replies: &[&[u8]]) -> (DeviceControl, Arc<MemoryTransport>) {
        let transport = MemoryTransport::new();
        for reply in replies {
            transport.push_incoming(colab::encode(reply).unwrap());
        }
        transport.finish();
        let transport = Arc::new(transport);
        let handler = ColaBHandler::new(Arc::clone(&transport), ColaBConfig::default());
        let config = ControlConfig::new("localhost", Dialect::ColaB);
        let session = ControlSession::new(Box::new(handler), config.session_config());
        (
            DeviceControl::from_session(session, &config).unwrap(),
            transport,
        )
    }

    #[test]
    fn test_device_ident() {
        let (control, _) = colab_control(&[b"sRA DeviceIdent \x00\x0bVisionary-T\x00\x041.00"]);
        assert_eq!(control.device_ident().unwrap(), "Visionary-T");
    }

    #[test]
    fn test_acquisition_commands() {
        let (control, transport) = colab_control(&[
            b"sAN PLAYSTART ",
            b"sAN PLAYNEXT ",
            b"sAN PLAYSTOP ",
            b"sAN GetBlobClientConfig \x00",
        ]);
        control.start_acquisition().unwrap();
        control.step_acquisition().unwrap();
        control.stop_acquisition().unwrap();
        control.data_stream_config().unwrap();

        let written = transport.written();
        let text = String::from_utf8_lossy(&written);
        for name in ["PLAYSTART", "PLAYNEXT", "PLAYSTOP", "GetBlobClientConfig"] {
            assert!(text.contains(&format!("sMN {} ", name)));
        }
    }

    #[test]
    fn test_device_error_propagates() {
        let (control, _) = colab_control(&[b"sFA\x00\x0d"]);
        assert!(matches!(
            control.start_acquisition(),
            Err(ClientError::Device(colacam_protocol::DeviceError::MethodServerBusy))
        ));
    }

    #[test]
    fn test_login_without_authenticator() {
        let (control, _) = colab_control(&[]);
        assert!(matches!(
            control.login(UserLevel::Service, "pw"),
            Err(ClientError::NoAuthenticator)
        ));
    }

    #[test]
    fn test_close_shuts_down_transport() {
        let (control, transport) = colab_control(&[]);
        control.close();
        assert!(transport.is_shutdown());
    }

    #[test]
    fn test_dialect_parse_and_ports() {
        assert_eq!("cola-b".parse::<Dialect>().unwrap(), Dialect::ColaB);
        assert_eq!("CoLa2".parse::<Dialect>().unwrap(), Dialect::Cola2);
        assert!("cola-a".parse::<Dialect>().is_err());
        assert_eq!(Dialect::ColaB.default_port(), 2112);
        assert_eq!(Dialect::Cola2.default_port(), 2122);
    }

    #[test]
    fn test_session_timeout_secs_saturates() {
        let config = ControlConfig::new("h", Dialect::Cola2)
            .with_session_timeout(Duration::from_secs(1000));
        assert_eq!(config.session_timeout_secs(), u8::MAX);
    }

    #[test]
    fn test_open_over_tcp_cola2() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            let mut header = [0u8; 8];
            socket.read_exact(&mut header).unwrap();
            let len = u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize;
            let mut body = vec![0u8; len];
            socket.read_exact(&mut body).unwrap();
            assert_eq!(&body[8..10], b"Ox");

            let reply = cola2::encode(cola2::Header::new(42, 1), b"OA").unwrap();
            socket.write_all(&reply).unwrap();

            socket.read_exact(&mut header).unwrap();
            let len = u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize;
            let mut body = vec![0u8; len];
            socket.read_exact(&mut body).unwrap();
            let reply =
                cola2::encode(cola2::Header::new(42, 2), b"RA DeviceIdent \x00\x02V3").unwrap();
            socket.write_all(&reply).unwrap();
        });

        let config = ControlConfig::new("127.0.0.1", Dialect::Cola2)
            .with_port(port)
            .with_connect_timeout(Duration::from_secs(2));
        let control = DeviceControl::open(config).unwrap();
        assert_eq!(control.device_ident().unwrap(), "V3");
        server.join().unwrap();
    }
}
