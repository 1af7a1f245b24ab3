//! Proxy client: one CONNECT handshake over one transport
//!
//! ```text
//! Idle -> Connecting -> Handshaking -> Ready -> [TlsNegotiating] -> Open
//!   any state -> Faulted (on error)      Ready/Open/Handshaking -> Closed
//! ```
//!
//! Every suspension point (transport open, request write, reply read, TLS
//! handshake) is bounded by the configured timeout and abandoned as soon as the
//! caller's cancellation token fires. Any failure closes whatever was opened
//! and leaves the client `Faulted`.

use super::{Address, Credentials, ProxyError, Rejection};
use crate::protocol::{socks5, Dialect, Request, Response, TargetHost};
use crate::transport::{BoxedStream, Transport, TransportConfig, TransportError, TransportFactory};
use std::future::Future;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use uuid::Uuid;

/// Client state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Not connected yet
    Idle,
    /// Opening the transport to the proxy
    Connecting,
    /// CONNECT sent, awaiting reply
    Handshaking,
    /// Tunnel established, raw stream available
    Ready,
    /// TLS handshake with the destination in progress
    TlsNegotiating,
    /// Tunnel (and TLS, if requested) ready for traffic
    Open,
    /// Closed by the caller
    Closed,
    /// Failed; transport released
    Faulted,
}

/// Everything needed to reach `destination` through `proxy`
#[derive(Debug, Clone)]
pub struct ProxyClientOptions {
    pub proxy: Address,
    pub destination: Address,
    pub dialect: Dialect,
    pub credentials: Option<Credentials>,
    /// Layer TLS to the destination over the tunnel
    pub use_tls: bool,
    /// Accept any destination certificate (see `transport::tls`)
    pub ignore_certificate_errors: bool,
    /// Resolve hostnames locally when the dialect cannot carry them (SOCKS4)
    pub resolve_host: bool,
    pub transport: TransportConfig,
}

impl ProxyClientOptions {
    pub fn new(proxy: Address, destination: Address, dialect: Dialect) -> Self {
        Self {
            proxy,
            destination,
            dialect,
            credentials: None,
            use_tls: false,
            ignore_certificate_errors: false,
            resolve_host: false,
            transport: TransportConfig::default(),
        }
    }
}

/// A SOCKS tunnel to one destination
pub struct ProxyClient {
    options: ProxyClientOptions,
    transports: Arc<dyn TransportFactory>,
    transport: Option<Box<dyn Transport>>,
    stream: Option<BoxedStream>,
    state: ClientState,
}

impl ProxyClient {
    pub fn new(options: ProxyClientOptions, transports: Arc<dyn TransportFactory>) -> Self {
        Self {
            options,
            transports,
            transport: None,
            stream: None,
            state: ClientState::Idle,
        }
    }

    /// Get current state
    pub fn state(&self) -> ClientState {
        self.state
    }

    /// Check if the tunnel is usable
    pub fn is_open(&self) -> bool {
        matches!(self.state, ClientState::Ready | ClientState::Open)
    }

    /// Idle or open; false once closed, faulted or left mid-handshake
    pub fn is_usable(&self) -> bool {
        matches!(
            self.state,
            ClientState::Idle | ClientState::Ready | ClientState::Open
        )
    }

    pub fn destination(&self) -> &Address {
        &self.options.destination
    }

    pub fn proxy(&self) -> &Address {
        &self.options.proxy
    }

    pub fn options(&self) -> &ProxyClientOptions {
        &self.options
    }

    /// Connect to the proxy, issue CONNECT and, if requested, negotiate TLS
    ///
    /// Dropping the returned future before it completes leaves the client
    /// `Faulted` with its transport released.
    pub async fn open(&mut self, cancel: &CancellationToken) -> Result<(), ProxyError> {
        if self.state != ClientState::Idle {
            return Err(ProxyError::InvalidState {
                operation: "open",
                state: self.state,
            });
        }

        let mut attempt = OpenAttempt {
            client: self,
            finished: false,
        };
        let result = attempt.client.run_open(cancel).await;
        attempt.finished = true;
        result
    }

    async fn run_open(&mut self, cancel: &CancellationToken) -> Result<(), ProxyError> {
        let mut transport = self.transports.create(&self.options.proxy, false);
        transport.configure(self.options.transport.clone());

        self.state = ClientState::Connecting;
        debug!(
            proxy = %self.options.proxy,
            destination = %self.options.destination,
            dialect = %self.options.dialect,
            "Connecting to SOCKS proxy"
        );

        let connect_timeout = self.options.transport.connect_timeout();
        let opened = guard(cancel, connect_timeout, async {
            transport.open().await.map_err(ProxyError::from)
        })
        .await;
        if let Err(e) = opened {
            // Never opened, nothing to close
            warn!(proxy = %self.options.proxy, error = %e, "Proxy connection failed");
            self.state = ClientState::Faulted;
            return Err(e);
        }
        self.transport = Some(transport);

        match self.establish(cancel).await {
            Ok(stream) => {
                self.stream = Some(stream);
                self.state = ClientState::Open;
                debug!(destination = %self.options.destination, "Tunnel open");
                Ok(())
            }
            Err(e) => {
                warn!(
                    destination = %self.options.destination,
                    state = ?self.state,
                    error = %e,
                    "Tunnel setup failed"
                );
                self.fault();
                Err(e)
            }
        }
    }

    /// Get the active stream (TLS if negotiated)
    pub fn stream(&mut self) -> Result<&mut BoxedStream, ProxyError> {
        match self.state {
            ClientState::Ready | ClientState::Open => {
                self.stream.as_mut().ok_or(ProxyError::InvalidState {
                    operation: "get stream",
                    state: self.state,
                })
            }
            state => Err(ProxyError::InvalidState {
                operation: "get stream",
                state,
            }),
        }
    }

    /// Close the stream, then the transport
    ///
    /// A no-op once closed or faulted; an error before `open`.
    pub fn close(&mut self) -> Result<(), ProxyError> {
        match self.state {
            ClientState::Idle => Err(ProxyError::InvalidState {
                operation: "close",
                state: self.state,
            }),
            ClientState::Closed | ClientState::Faulted => Ok(()),
            _ => {
                self.stream = None;
                let result = match self.transport.take() {
                    Some(mut transport) => transport.close(),
                    None => Ok(()),
                };
                self.state = ClientState::Closed;
                trace!(destination = %self.options.destination, "Tunnel closed");
                result.map_err(ProxyError::from)
            }
        }
    }

    /// Handshake and optional TLS; returns the stream to expose
    async fn establish(&mut self, cancel: &CancellationToken) -> Result<BoxedStream, ProxyError> {
        let mut stream = self
            .transport
            .as_mut()
            .and_then(|t| t.take_stream())
            .ok_or(ProxyError::Transport(TransportError::Closed))?;

        self.state = ClientState::Handshaking;
        let options = &self.options;
        let host = target_host(options, cancel).await?;
        let user_id = options.credentials.as_ref().map(|c| c.username.as_str());
        let request = Request::connect(options.dialect, host, options.destination.port(), user_id);

        // Fails before anything is written if the destination cannot be framed
        let wire = request.encode()?;
        let correlation_id = request.correlation_id();

        if options.dialect == Dialect::Socks5 {
            authenticate(options, &mut stream, correlation_id, cancel).await?;
        }

        trace!(%correlation_id, bytes = wire.len(), "Sending CONNECT");
        write(options, &mut stream, &wire, cancel).await?;

        let response = guard(cancel, options.transport.read_timeout(), async {
            Response::read_from(options.dialect, &mut stream)
                .await
                .map_err(ProxyError::from)
        })
        .await?;

        if !response.is_granted() {
            let rejection = match response {
                Response::Socks4(resp) => Rejection::Socks4(resp.status),
                Response::Socks5(reply) => Rejection::Socks5(reply.code),
            };
            debug!(%correlation_id, %rejection, "CONNECT rejected");
            return Err(ProxyError::ConnectRejected(rejection));
        }
        trace!(%correlation_id, "CONNECT granted");

        self.state = ClientState::Ready;

        if self.options.use_tls {
            self.state = ClientState::TlsNegotiating;
            stream = negotiate_tls(&self.options, stream, cancel).await?;
        }

        Ok(stream)
    }

    /// Drop the stream, close the transport once, mark faulted
    fn fault(&mut self) {
        self.stream = None;
        if let Some(mut transport) = self.transport.take() {
            if let Err(e) = transport.close() {
                warn!(error = %e, "Failed to close transport");
            }
        }
        self.state = ClientState::Faulted;
    }
}

/// Faults the client if `open` is dropped before it finishes
struct OpenAttempt<'a> {
    client: &'a mut ProxyClient,
    finished: bool,
}

impl Drop for OpenAttempt<'_> {
    fn drop(&mut self) {
        if !self.finished {
            debug!(
                destination = %self.client.options.destination,
                state = ?self.client.state,
                "Tunnel setup abandoned"
            );
            self.client.fault();
        }
    }
}

impl Drop for ProxyClient {
    fn drop(&mut self) {
        if self.transport.is_some() {
            let _ = self.close();
        }
    }
}

/// Run `fut` bounded by `limit`, abandoning it if `cancel` fires
async fn guard<T, F>(cancel: &CancellationToken, limit: Duration, fut: F) -> Result<T, ProxyError>
where
    F: Future<Output = Result<T, ProxyError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ProxyError::Cancelled),
        res = tokio::time::timeout(limit, fut) => match res {
            Ok(inner) => inner,
            Err(_) => Err(ProxyError::Timeout),
        },
    }
}

/// SOCKS5 method negotiation and RFC 1929 authentication
async fn authenticate(
    options: &ProxyClientOptions,
    stream: &mut BoxedStream,
    correlation_id: Uuid,
    cancel: &CancellationToken,
) -> Result<(), ProxyError> {
    let credentials = options.credentials.as_ref();
    let auth = credentials
        .map(|c| socks5::auth_request(&c.username, &c.password))
        .transpose()?;

    write(options, stream, &socks5::greeting(credentials.is_some()), cancel).await?;
    let method = guard(cancel, options.transport.read_timeout(), async {
        socks5::read_method_selection(stream, credentials.is_some())
            .await
            .map_err(ProxyError::from)
    })
    .await?;
    trace!(%correlation_id, ?method, "SOCKS5 method selected");

    if let (socks5::AuthMethod::UsernamePassword, Some(auth)) = (method, auth) {
        write(options, stream, &auth, cancel).await?;
        guard(cancel, options.transport.read_timeout(), async {
            socks5::read_auth_reply(stream).await.map_err(ProxyError::from)
        })
        .await?;
    }
    Ok(())
}

async fn write(
    options: &ProxyClientOptions,
    stream: &mut BoxedStream,
    bytes: &[u8],
    cancel: &CancellationToken,
) -> Result<(), ProxyError> {
    guard(cancel, options.transport.write_timeout(), async {
        stream.write_all(bytes).await.map_err(TransportError::from)?;
        stream.flush().await.map_err(TransportError::from)?;
        Ok(())
    })
    .await
}

/// Destination as it goes on the wire, resolving locally for SOCKS4 if allowed
async fn target_host(
    options: &ProxyClientOptions,
    cancel: &CancellationToken,
) -> Result<TargetHost, ProxyError> {
    let host = TargetHost::parse(options.destination.host());
    let name = match &host {
        TargetHost::Domain(name) if !options.dialect.resolves_remotely() && options.resolve_host => {
            name.clone()
        }
        _ => return Ok(host),
    };

    let port = options.destination.port();
    let addrs = guard(cancel, options.transport.connect_timeout(), async {
        tokio::net::lookup_host((name.as_str(), port))
            .await
            .map(|addrs| addrs.collect::<Vec<_>>())
            .map_err(|e| ProxyError::InvalidAddress(format!("cannot resolve {}: {}", name, e)))
    })
    .await?;

    let resolved = addrs
        .iter()
        .find_map(|addr| match addr.ip() {
            IpAddr::V4(ip) => Some(ip),
            IpAddr::V6(_) => None,
        })
        .ok_or_else(|| ProxyError::InvalidAddress(format!("{} has no IPv4 address", name)))?;
    trace!(host = %name, %resolved, "Resolved destination locally");
    Ok(TargetHost::Ipv4(resolved))
}

#[cfg(feature = "tls")]
async fn negotiate_tls(
    options: &ProxyClientOptions,
    stream: BoxedStream,
    cancel: &CancellationToken,
) -> Result<BoxedStream, ProxyError> {
    use crate::transport::tls;

    let config = tls::client_config(options.ignore_certificate_errors)?;
    let server_name = options.destination.host();
    let tls_stream = guard(cancel, options.transport.read_timeout(), async {
        tls::connect(stream, server_name, config)
            .await
            .map_err(ProxyError::from)
    })
    .await?;
    trace!(server_name, "TLS established over tunnel");
    Ok(Box::new(tls_stream))
}

#[cfg(not(feature = "tls"))]
async fn negotiate_tls(
    _options: &ProxyClientOptions,
    _stream: BoxedStream,
    _cancel: &CancellationToken,
) -> Result<BoxedStream, ProxyError> {
    Err(ProxyError::Tls("TLS support not compiled in".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::socks4::{ConnectResponse, ConnectStatus};
    use crate::protocol::ProtocolError;
    use crate::transport::MemoryTransportFactory;
    use tokio::io::{AsyncReadExt, DuplexStream};

    const GRANTED: [u8; 8] = [0x00, 0x5A, 0, 0, 0, 0, 0, 0];

    fn options(destination: &str, dialect: Dialect) -> ProxyClientOptions {
        ProxyClientOptions::new(
            "proxy.local:1080".parse().unwrap(),
            destination.parse().unwrap(),
            dialect,
        )
    }

    /// Read a SOCKS4 request (user-id terminated) and answer with `reply`
    async fn serve_socks4(mut peer: DuplexStream, reply: [u8; 8]) -> (Vec<u8>, DuplexStream) {
        let mut request = vec![0u8; 8];
        peer.read_exact(&mut request).await.unwrap();
        loop {
            let byte = peer.read_u8().await.unwrap();
            request.push(byte);
            if byte == 0 {
                break;
            }
        }
        peer.write_all(&reply).await.unwrap();
        (request, peer)
    }

    #[tokio::test]
    async fn test_granted_exposes_transport_stream() {
        let factory = Arc::new(MemoryTransportFactory::new());
        let peer = factory.peer();
        let server = tokio::spawn(serve_socks4(peer, GRANTED));

        let mut client = ProxyClient::new(options("10.1.2.3:80", Dialect::Socks4), factory.clone());
        client.open(&CancellationToken::new()).await.unwrap();
        assert_eq!(client.state(), ClientState::Open);

        let (request, mut peer) = server.await.unwrap();
        assert_eq!(&request[..], &[0x04, 0x01, 0x00, 0x50, 10, 1, 2, 3, 0x00]);

        // Bytes pass through untouched in both directions
        let stream = client.stream().unwrap();
        stream.write_all(b"GET / HTTP/1.1\r\n").await.unwrap();
        let mut buf = [0u8; 16];
        peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"GET / HTTP/1.1\r\n");

        peer.write_all(b"pong").await.unwrap();
        let mut buf = [0u8; 4];
        client.stream().unwrap().read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");
    }

    #[tokio::test]
    async fn test_rejected_closes_transport_once() {
        let factory = Arc::new(MemoryTransportFactory::new());
        let peer = factory.peer();
        let reply = ConnectResponse::new(ConnectStatus::RejectedOrFailed).encode();
        let server = tokio::spawn(serve_socks4(peer, reply));

        let mut client = ProxyClient::new(options("10.1.2.3:80", Dialect::Socks4), factory.clone());
        let err = client.open(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(
            err,
            ProxyError::ConnectRejected(Rejection::Socks4(ConnectStatus::RejectedOrFailed))
        ));
        assert_eq!(client.state(), ClientState::Faulted);
        assert_eq!(factory.stats().closed(), 1);

        // Closing a faulted client does not touch the transport again
        client.close().unwrap();
        drop(client);
        assert_eq!(factory.stats().closed(), 1);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_close_twice_closes_once() {
        let factory = Arc::new(MemoryTransportFactory::new());
        let peer = factory.peer();
        let server = tokio::spawn(serve_socks4(peer, GRANTED));

        let mut client = ProxyClient::new(options("10.1.2.3:80", Dialect::Socks4), factory.clone());
        client.open(&CancellationToken::new()).await.unwrap();
        server.await.unwrap();

        client.close().unwrap();
        client.close().unwrap();
        assert_eq!(client.state(), ClientState::Closed);
        drop(client);
        assert_eq!(factory.stats().closed(), 1);
    }

    #[tokio::test]
    async fn test_invalid_state_transitions() {
        let factory = Arc::new(MemoryTransportFactory::new());
        let mut client = ProxyClient::new(options("10.1.2.3:80", Dialect::Socks4), factory.clone());

        assert!(matches!(
            client.close(),
            Err(ProxyError::InvalidState { operation: "close", state: ClientState::Idle })
        ));
        assert!(matches!(
            client.stream(),
            Err(ProxyError::InvalidState { state: ClientState::Idle, .. })
        ));

        let peer = factory.peer();
        let server = tokio::spawn(serve_socks4(peer, GRANTED));
        client.open(&CancellationToken::new()).await.unwrap();
        server.await.unwrap();

        assert!(matches!(
            client.open(&CancellationToken::new()).await,
            Err(ProxyError::InvalidState { operation: "open", state: ClientState::Open })
        ));
    }

    #[tokio::test]
    async fn test_transport_failure_does_not_close() {
        let factory = Arc::new(MemoryTransportFactory::new());
        let mut client = ProxyClient::new(options("10.1.2.3:80", Dialect::Socks4), factory.clone());

        let err = client.open(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, ProxyError::Transport(TransportError::ConnectionFailed(_))));
        assert_eq!(client.state(), ClientState::Faulted);
        assert_eq!(factory.stats().closed(), 0);
    }

    #[tokio::test]
    async fn test_unresolvable_destination_fails_before_writing() {
        let factory = Arc::new(MemoryTransportFactory::new());
        let mut peer = factory.peer();

        let mut client = ProxyClient::new(options("example.com:80", Dialect::Socks4), factory.clone());
        let err = client.open(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(
            err,
            ProxyError::Protocol(ProtocolError::UnsupportedAddress { .. })
        ));
        assert_eq!(factory.stats().closed(), 1);

        // Nothing reached the proxy
        let mut rest = Vec::new();
        peer.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn test_socks4a_sends_hostname() {
        let factory = Arc::new(MemoryTransportFactory::new());
        let mut peer = factory.peer();
        let server = tokio::spawn(async move {
            let mut request = vec![0u8; 8 + 1 + 12];
            peer.read_exact(&mut request).await.unwrap();
            peer.write_all(&GRANTED).await.unwrap();
            (request, peer)
        });

        let opts = options("example.com:443", Dialect::Socks4a);
        let mut client = ProxyClient::new(opts, factory.clone());
        client.open(&CancellationToken::new()).await.unwrap();

        let (request, _peer) = server.await.unwrap();
        assert_eq!(&request[..8], &[0x04, 0x01, 0x01, 0xBB, 0, 0, 0, 1]);
        assert_eq!(&request[9..], b"example.com\0");
    }

    #[tokio::test]
    async fn test_truncated_reply_is_framing_error() {
        let factory = Arc::new(MemoryTransportFactory::new());
        let mut peer = factory.peer();
        tokio::spawn(async move {
            let mut request = [0u8; 9];
            peer.read_exact(&mut request).await.unwrap();
            peer.write_all(&[0x00, 0x5A, 0x00]).await.unwrap();
            // Dropping the peer ends the stream
        });

        let mut client = ProxyClient::new(options("10.1.2.3:80", Dialect::Socks4), factory.clone());
        let err = client.open(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(
            err,
            ProxyError::Protocol(ProtocolError::Truncated { expected: 8, actual: 3 })
        ));
        assert_eq!(factory.stats().closed(), 1);
    }

    #[tokio::test]
    async fn test_cancel_during_handshake() {
        let factory = Arc::new(MemoryTransportFactory::new());
        let _peer = factory.peer();
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let mut client = ProxyClient::new(options("10.1.2.3:80", Dialect::Socks4), factory.clone());
        let err = client.open(&cancel).await.unwrap_err();
        assert!(matches!(err, ProxyError::Cancelled));
        assert_eq!(client.state(), ClientState::Faulted);
        assert_eq!(factory.stats().closed(), 1);
    }

    #[tokio::test]
    async fn test_dropped_open_faults_and_releases_transport() {
        let factory = Arc::new(MemoryTransportFactory::new());
        let mut peer = factory.peer();

        let mut client = ProxyClient::new(options("10.1.2.3:80", Dialect::Socks4), factory.clone());
        let abandoned =
            tokio::time::timeout(Duration::from_millis(50), client.open(&CancellationToken::new())).await;
        assert!(abandoned.is_err());

        assert_eq!(client.state(), ClientState::Faulted);
        assert!(!client.is_usable());
        assert!(client.stream().is_err());
        assert_eq!(factory.stats().closed(), 1);

        // The proxy side sees the request, then end of stream
        let mut received = Vec::new();
        peer.read_to_end(&mut received).await.unwrap();
        assert_eq!(received.len(), 9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_timeout() {
        let factory = Arc::new(MemoryTransportFactory::new());
        let _peer = factory.peer();

        let mut opts = options("10.1.2.3:80", Dialect::Socks4);
        opts.transport.read_timeout = 5;
        let mut client = ProxyClient::new(opts, factory.clone());

        let err = client.open(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, ProxyError::Timeout));
        assert_eq!(client.state(), ClientState::Faulted);
        assert_eq!(factory.stats().closed(), 1);
    }

    #[tokio::test]
    async fn test_tls_failure_faults_and_closes() {
        let factory = Arc::new(MemoryTransportFactory::new());
        let mut peer = factory.peer();
        tokio::spawn(async move {
            let mut request = [0u8; 9];
            peer.read_exact(&mut request).await.unwrap();
            peer.write_all(&GRANTED).await.unwrap();
            // Not a TLS server
            let mut hello = [0u8; 5];
            peer.read_exact(&mut hello).await.ok();
            peer.write_all(b"HTTP/1.1 400 Bad Request\r\n\r\n").await.ok();
        });

        let mut opts = options("10.1.2.3:443", Dialect::Socks4);
        opts.use_tls = true;
        let mut client = ProxyClient::new(opts, factory.clone());

        let err = client.open(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, ProxyError::Tls(_)));
        assert_eq!(client.state(), ClientState::Faulted);
        assert_eq!(factory.stats().closed(), 1);
    }

    #[tokio::test]
    async fn test_socks5_with_credentials() {
        let factory = Arc::new(MemoryTransportFactory::new());
        let mut peer = factory.peer();
        let server = tokio::spawn(async move {
            let mut greeting = [0u8; 4];
            peer.read_exact(&mut greeting).await.unwrap();
            assert_eq!(greeting, [0x05, 0x02, 0x00, 0x02]);
            peer.write_all(&[0x05, 0x02]).await.unwrap();

            let mut auth = [0u8; 1 + 1 + 5 + 1 + 6];
            peer.read_exact(&mut auth).await.unwrap();
            assert_eq!(&auth[2..7], b"alice");
            assert_eq!(&auth[8..], b"secret");
            peer.write_all(&[0x01, 0x00]).await.unwrap();

            let mut connect = [0u8; 4 + 1 + 11 + 2];
            peer.read_exact(&mut connect).await.unwrap();
            assert_eq!(&connect[..5], &[0x05, 0x01, 0x00, 0x03, 11]);
            assert_eq!(&connect[5..16], b"example.com");
            peer.write_all(&[0x05, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
                .await
                .unwrap();
            peer
        });

        let mut opts = options("example.com:80", Dialect::Socks5);
        opts.credentials = Some(Credentials::new("alice", "secret"));
        let mut client = ProxyClient::new(opts, factory.clone());
        client.open(&CancellationToken::new()).await.unwrap();
        assert!(client.is_open());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_socks5_rejection() {
        let factory = Arc::new(MemoryTransportFactory::new());
        let mut peer = factory.peer();
        tokio::spawn(async move {
            let mut greeting = [0u8; 3];
            peer.read_exact(&mut greeting).await.unwrap();
            peer.write_all(&[0x05, 0x00]).await.unwrap();
            let mut connect = [0u8; 10];
            peer.read_exact(&mut connect).await.unwrap();
            peer.write_all(&[0x05, 0x05, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
                .await
                .unwrap();
            peer
        });

        let mut client = ProxyClient::new(options("10.1.2.3:80", Dialect::Socks5), factory.clone());
        let err = client.open(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(
            err,
            ProxyError::ConnectRejected(Rejection::Socks5(socks5::ReplyCode::ConnectionRefused))
        ));
        assert_eq!(factory.stats().closed(), 1);
    }
}
