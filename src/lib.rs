//! # SOCKS Tunnel
//!
//! SOCKS proxy tunnelling for HTTP clients.
//!
//! ## Features
//!
//! - **SOCKS4, SOCKS4a and SOCKS5** CONNECT handshakes (RFC 1928/1929 auth)
//! - **TLS over the tunnel**, validated against the destination host
//! - **Tunnel reuse** through a concurrency-safe pool keyed by destination
//! - **Pluggable transports** (tokio TCP, in-memory pipes)
//! - **Cancellation and timeouts** at every network wait
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                   HTTP Adapter                       │
//! │   (proxy selection, ConnectionProvider, streams)     │
//! ├─────────────────────────────────────────────────────┤
//! │                  Connection Pool                     │
//! │     (one tunnel per destination + TLS, expiry)       │
//! ├─────────────────────────────────────────────────────┤
//! │                   Proxy Client                       │
//! │      (CONNECT state machine, TLS to destination)     │
//! ├─────────────────────────────────────────────────────┤
//! │                  Protocol Codec                      │
//! │             (SOCKS4/4a, SOCKS5 framing)              │
//! ├─────────────────────────────────────────────────────┤
//! │                  Transport Layer                     │
//! │               (TCP, TLS, in-memory)                  │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use socks_tunnel::provider::{
//!     ConnectionProvider, ProviderOptions, SocksConnectionProvider, StaticProxySelector,
//! };
//! use socks_tunnel::transport::{TcpTransportFactory, TransportConfig};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let selector = StaticProxySelector::from_url("socks5://127.0.0.1:1080")?;
//! let transports = TcpTransportFactory::new(TransportConfig::default());
//! let provider = SocksConnectionProvider::new(
//!     Arc::new(selector),
//!     Arc::new(transports),
//!     ProviderOptions::default(),
//! );
//!
//! let uri = "https://example.com/".parse()?;
//! if let Some(stream) = provider.connect(&uri, false, &CancellationToken::new()).await? {
//!     // write the request, read the response, then report it back
//! #   drop(stream);
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod pool;
pub mod protocol;
pub mod provider;
pub mod proxy;
pub mod transport;

pub use config::Config;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] protocol::ProtocolError),

    #[error("Transport error: {0}")]
    Transport(#[from] transport::TransportError),

    #[error("Proxy error: {0}")]
    Proxy(#[from] proxy::ProxyError),

    #[error("Configuration error: {0}")]
    Config(String),
}
