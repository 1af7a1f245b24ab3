//! Transport layer
//!
//! The proxy client never touches sockets directly. It asks a
//! [`TransportFactory`] for a [`Transport`], opens it, and takes the resulting
//! byte stream. Provided backends:
//! - TCP (tokio), optionally wrapped in TLS
//! - in-memory duplex pipes (for tests and embedding)

mod memory;
mod tcp;

#[cfg(feature = "tls")]
pub mod tls;

pub use memory::{MemoryTransport, MemoryTransportFactory, TransportStats};
pub use tcp::{TcpTransport, TcpTransportFactory};

use crate::proxy::Address;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

/// Transport layer errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Transport already opened")]
    AlreadyOpen,

    #[error("Connection closed")]
    Closed,

    #[error("Timeout")]
    Timeout,
}

/// A duplex byte stream
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> AsyncStream for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// Type-erased duplex byte stream
pub type BoxedStream = Box<dyn AsyncStream>;

/// One connection to a remote endpoint
#[async_trait]
pub trait Transport: Send {
    /// Apply timeouts; must be called before `open`
    fn configure(&mut self, config: TransportConfig);

    /// Connect to the endpoint the transport was created for
    async fn open(&mut self) -> Result<(), TransportError>;

    /// Hand the connected stream to the caller (once)
    fn take_stream(&mut self) -> Option<BoxedStream>;

    /// Close the connection; closing twice is a no-op
    fn close(&mut self) -> Result<(), TransportError>;

    /// Check if open
    fn is_open(&self) -> bool;
}

/// Creates unopened transports
pub trait TransportFactory: Send + Sync {
    fn create(&self, address: &Address, use_tls: bool) -> Box<dyn Transport>;
}

/// Transport configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Connection timeout in seconds
    pub connect_timeout: u64,
    /// Read timeout in seconds
    pub read_timeout: u64,
    /// Write timeout in seconds
    pub write_timeout: u64,
    /// Disable Nagle's algorithm on TCP sockets
    pub nodelay: bool,
}

impl TransportConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout)
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: 30,
            read_timeout: 60,
            write_timeout: 60,
            nodelay: true,
        }
    }
}
