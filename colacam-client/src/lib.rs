//! # colacam-client
//!
//! Control channel for CoLa devices.
//!
//! This crate provides:
//! - Blocking byte transports (TCP and scripted in-memory)
//! - CoLa-B and CoLa-2 protocol handlers
//! - A serialised control session with single-shot reconnect
//! - High-level device control (ident, acquisition, login)

pub mod auth;
pub mod control;
pub mod error;
pub mod handler;
pub mod session;
pub mod transport;

pub use auth::{Authenticator, LegacyAuthentication, PasswordHasher, UserLevel};
pub use control::{connect_handler, ControlConfig, DeviceControl, Dialect};
pub use error::{ClientError, TransportError};
pub use handler::{Cola2Handler, ColaBConfig, ColaBHandler, ProtocolHandler};
pub use session::{Connector, ControlSession, SessionConfig};
pub use transport::{MemoryTransport, TcpTransport, Transport, MAX_READ_SIZE};
