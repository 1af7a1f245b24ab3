//! TCP transport, optionally wrapped in TLS

use super::{BoxedStream, Transport, TransportConfig, TransportError, TransportFactory};
use crate::proxy::Address;
use async_trait::async_trait;
#[cfg(feature = "tls")]
use std::sync::Arc;
#[cfg(feature = "tls")]
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::trace;

/// TCP transport
pub struct TcpTransport {
    address: Address,
    use_tls: bool,
    ignore_certificate_errors: bool,
    config: TransportConfig,
    stream: Option<BoxedStream>,
    open: bool,
}

impl TcpTransport {
    /// Create a new TCP transport
    pub fn new(address: Address, config: TransportConfig) -> Self {
        Self {
            address,
            use_tls: false,
            ignore_certificate_errors: false,
            config,
            stream: None,
            open: false,
        }
    }

    /// Perform a TLS handshake with the endpoint after connecting
    pub fn with_tls(mut self, ignore_certificate_errors: bool) -> Self {
        self.use_tls = true;
        self.ignore_certificate_errors = ignore_certificate_errors;
        self
    }

    #[cfg(feature = "tls")]
    fn tls_handshake(
        &self,
        stream: TcpStream,
    ) -> impl std::future::Future<Output = Result<BoxedStream, TransportError>> + Send + 'static {
        let tls_config = super::tls::client_config(self.ignore_certificate_errors);
        let host = self.address.host().to_string();
        let limit = self.config.connect_timeout();
        async move { Self::wrap_tls(stream, host, limit, tls_config?).await }
    }

    #[cfg(not(feature = "tls"))]
    fn tls_handshake(
        &self,
        _stream: TcpStream,
    ) -> impl std::future::Future<Output = Result<BoxedStream, TransportError>> + Send + 'static {
        std::future::ready(Err(TransportError::Tls("TLS support not compiled in".to_string())))
    }

    /// Takes owned values so the `open` future borrows nothing across the handshake
    #[cfg(feature = "tls")]
    async fn wrap_tls(
        stream: TcpStream,
        host: String,
        limit: Duration,
        tls_config: Arc<rustls::ClientConfig>,
    ) -> Result<BoxedStream, TransportError> {
        let tls_stream = tokio::time::timeout(limit, super::tls::connect(stream, &host, tls_config))
            .await
            .map_err(|_| TransportError::Timeout)??;
        Ok(Box::new(tls_stream))
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn configure(&mut self, config: TransportConfig) {
        self.config = config;
    }

    async fn open(&mut self) -> Result<(), TransportError> {
        if self.open {
            return Err(TransportError::AlreadyOpen);
        }

        let target = (self.address.host().to_string(), self.address.port());
        let stream = tokio::time::timeout(self.config.connect_timeout(), TcpStream::connect(target))
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(|e| TransportError::ConnectionFailed(format!("{}: {}", self.address, e)))?;

        // Configure TCP options
        if self.config.nodelay {
            stream.set_nodelay(true).ok();
        }
        trace!(address = %self.address, tls = self.use_tls, "TCP connected");

        let stream: BoxedStream = if self.use_tls {
            self.tls_handshake(stream).await?
        } else {
            Box::new(stream)
        };

        self.stream = Some(stream);
        self.open = true;
        Ok(())
    }

    fn take_stream(&mut self) -> Option<BoxedStream> {
        self.stream.take()
    }

    fn close(&mut self) -> Result<(), TransportError> {
        if self.open {
            // Dropping the socket closes it
            self.stream = None;
            self.open = false;
            trace!(address = %self.address, "TCP closed");
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

/// Creates [`TcpTransport`]s
#[derive(Debug, Clone, Default)]
pub struct TcpTransportFactory {
    config: TransportConfig,
    ignore_certificate_errors: bool,
}

impl TcpTransportFactory {
    pub fn new(config: TransportConfig) -> Self {
        Self {
            config,
            ignore_certificate_errors: false,
        }
    }

    /// Accept any certificate on transports created with TLS
    pub fn ignore_certificate_errors(mut self, ignore: bool) -> Self {
        self.ignore_certificate_errors = ignore;
        self
    }
}

impl TransportFactory for TcpTransportFactory {
    fn create(&self, address: &Address, use_tls: bool) -> Box<dyn Transport> {
        let transport = TcpTransport::new(address.clone(), self.config.clone());
        if use_tls {
            Box::new(transport.with_tls(self.ignore_certificate_errors))
        } else {
            Box::new(transport)
        }
    }
}
