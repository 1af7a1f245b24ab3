//! SOCKS proxy client
//!
//! Provides:
//! - [`Address`]: destination / proxy endpoint value used as pool key
//! - [`ProxyClient`]: one CONNECT handshake over one transport, with
//!   optional TLS to the destination

mod address;
mod client;

pub use address::{Address, Scheme};
pub use client::{ClientState, ProxyClient, ProxyClientOptions};

use crate::protocol::{socks4::ConnectStatus, socks5::ReplyCode, ProtocolError};
use crate::transport::TransportError;
use std::fmt;
use thiserror::Error;

/// Proxy errors
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("Transport error: {0}")]
    Transport(TransportError),

    #[error("Framing error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Proxy rejected CONNECT: {0}")]
    ConnectRejected(Rejection),

    #[error("TLS handshake failed: {0}")]
    Tls(String),

    #[error("Cannot {operation} while {state:?}")]
    InvalidState {
        operation: &'static str,
        state: ClientState,
    },

    #[error("Timeout")]
    Timeout,

    #[error("Cancelled")]
    Cancelled,

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("No proxy configured for {0}")]
    NoProxy(String),
}

impl From<TransportError> for ProxyError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Timeout => ProxyError::Timeout,
            TransportError::Tls(msg) => ProxyError::Tls(msg),
            other => ProxyError::Transport(other),
        }
    }
}

/// Dialect-specific status carried by a rejected CONNECT
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    Socks4(ConnectStatus),
    Socks5(ReplyCode),
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::Socks4(status) => write!(f, "SOCKS4 {}", status),
            Rejection::Socks5(code) => write!(f, "SOCKS5 {}", code),
        }
    }
}

/// Proxy credentials
///
/// SOCKS4 sends only the user name (as user-id); SOCKS5 uses both for
/// username/password authentication.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}
