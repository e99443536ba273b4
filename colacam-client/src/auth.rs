//! Device login and logout.

use crate::error::ClientError;
use crate::session::ControlSession;
use colacam_protocol::{CommandType, ParameterReader, ParameterWriter};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Access levels known to the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UserLevel {
    Run,
    Operator,
    Maintenance,
    AuthorizedClient,
    Service,
}

impl UserLevel {
    pub fn as_i8(&self) -> i8 {
        match self {
            UserLevel::Run => 0,
            UserLevel::Operator => 1,
            UserLevel::Maintenance => 2,
            UserLevel::AuthorizedClient => 3,
            UserLevel::Service => 4,
        }
    }
}

impl fmt::Display for UserLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UserLevel::Run => "run",
            UserLevel::Operator => "operator",
            UserLevel::Maintenance => "maintenance",
            UserLevel::AuthorizedClient => "authorized-client",
            UserLevel::Service => "service",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for UserLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "run" => Ok(UserLevel::Run),
            "operator" => Ok(UserLevel::Operator),
            "maintenance" => Ok(UserLevel::Maintenance),
            "authorized-client" | "authorizedclient" => Ok(UserLevel::AuthorizedClient),
            "service" => Ok(UserLevel::Service),
            other => Err(format!("unknown user level: {}", other)),
        }
    }
}

/// Login/logout contract.
pub trait Authenticator: Send + Sync {
    fn login(
        &self,
        session: &ControlSession,
        level: UserLevel,
        password: &str,
    ) -> Result<(), ClientError>;

    fn logout(&self, session: &ControlSession) -> Result<(), ClientError>;
}

/// Computes the 32-bit password hash sent with `SetAccessMode`.
pub type PasswordHasher = Arc<dyn Fn(UserLevel, &str) -> u32 + Send + Sync>;

/// Access-mode login used by CoLa-B devices.
///
/// The hash is supplied by the application.
pub struct LegacyAuthentication {
    hasher: PasswordHasher,
}

impl LegacyAuthentication {
    pub fn new(hasher: PasswordHasher) -> Self {
        Self { hasher }
    }
}

fn success_flag(reply: &colacam_protocol::Command) -> Result<bool, ClientError> {
    let mut reader = ParameterReader::new(reply)?;
    Ok(reader.read_u8()? != 0)
}

impl Authenticator for LegacyAuthentication {
    fn login(
        &self,
        session: &ControlSession,
        level: UserLevel,
        password: &str,
    ) -> Result<(), ClientError> {
        let hash = (self.hasher)(level, password);
        let command = ParameterWriter::new(CommandType::MethodInvocation, "SetAccessMode")
            .s8(level.as_i8())
            .u32(hash)
            .build();
        let reply = session.request(&command)?;
        if !success_flag(&reply)? {
            warn!(%level, "login rejected");
            return Err(ClientError::AuthFailed);
        }
        debug!(%level, "logged in");
        Ok(())
    }

    fn logout(&self, session: &ControlSession) -> Result<(), ClientError> {
        let reply = session.invoke("Run", &[])?;
        if !success_flag(&reply)? {
            return Err(ClientError::AuthFailed);
        }
        debug!("logged out");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{ColaBConfig, ColaBHandler};
    use crate::session::SessionConfig;
    use crate::transport::MemoryTransport;
    use colacam_protocol::colab;

    fn session_with(replies: &[&[u8]]) -> (ControlSession, Arc<MemoryTransport>) {
        let transport = MemoryTransport::new();
        for reply in replies {
            transport.push_incoming(colab::encode(reply).unwrap());
        }
        transport.finish();
        let transport = Arc::new(transport);
        let handler = ColaBHandler::new(Arc::clone(&transport), ColaBConfig::default());
        (
            ControlSession::new(Box::new(handler), SessionConfig::default()),
            transport,
        )
    }

    fn fixed_hash() -> PasswordHasher {
        Arc::new(|_: UserLevel, _: &str| 0xDEAD_BEEF_u32)
    }

    #[test]
    fn test_login_sends_level_and_hash() {
        let (session, transport) = session_with(&[b"sAN SetAccessMode \x01"]);
        let auth = LegacyAuthentication::new(fixed_hash());
        auth.login(&session, UserLevel::Service, "secret").unwrap();

        let written = transport.written();
        let payload = &written[colab::HEADER_LEN..written.len() - 1];
        assert_eq!(payload, b"sMN SetAccessMode \x04\xde\xad\xbe\xef");
    }

    #[test]
    fn test_login_rejected() {
        let (session, _) = session_with(&[b"sAN SetAccessMode \x00"]);
        let auth = LegacyAuthentication::new(fixed_hash());
        let result = auth.login(&session, UserLevel::Maintenance, "wrong");
        assert!(matches!(result, Err(ClientError::AuthFailed)));
    }

    #[test]
    fn test_logout_runs() {
        let (session, transport) = session_with(&[b"sAN Run \x01"]);
        let auth = LegacyAuthentication::new(fixed_hash());
        auth.logout(&session).unwrap();

        let written = transport.written();
        assert_eq!(&written[colab::HEADER_LEN..written.len() - 1], b"sMN Run ");
    }

    #[test]
    fn test_user_level_parse() {
        assert_eq!("Service".parse::<UserLevel>().unwrap(), UserLevel::Service);
        assert_eq!(
            "authorized-client".parse::<UserLevel>().unwrap(),
            UserLevel::AuthorizedClient
        );
        assert!("root".parse::<UserLevel>().is_err());
    }
}
