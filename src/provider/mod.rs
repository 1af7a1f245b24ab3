//! HTTP integration
//!
//! An HTTP client asks a [`ConnectionProvider`] for a connection per request.
//! [`SocksConnectionProvider`] answers with a [`ProxiedStream`] taken from its
//! own [`ConnectionPool`], or `None` when the selector says the request goes
//! direct. After reading the response head the client reports it back through
//! [`ConnectionProvider::on_response`] so the pool knows whether the tunnel
//! can be reused.
//!
//! ```text
//! request ──► select proxy ──► pool.get_or_create / pool.create
//!                                   │
//!                          lock entry, open if Idle
//!                                   │
//!                              ProxiedStream ──► response ──► on_response
//! ```

mod selector;
mod stream;

pub use selector::{ProxyEndpoint, ProxySelector, StaticProxySelector, DEFAULT_SOCKS_PORT};
pub use stream::ProxiedStream;

use crate::pool::{
    ConnectionFactory, ConnectionPool, NeverExpire, PoolKey, PooledConnection, ResponseInfo,
    ValidityPolicy,
};
use crate::proxy::{ClientState, ProxyClient, ProxyClientOptions, ProxyError};
use crate::transport::{TransportConfig, TransportError, TransportFactory};
use async_trait::async_trait;
use http::Uri;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Supplies connections for HTTP requests
#[async_trait]
pub trait ConnectionProvider: Send + Sync {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send;

    /// Connection for `uri`, or `None` to use the default (direct) path
    ///
    /// `force_recreate` discards any pooled tunnel for the destination first.
    async fn connect(
        &self,
        uri: &Uri,
        force_recreate: bool,
        cancel: &CancellationToken,
    ) -> Result<Option<Self::Stream>, ProxyError>;

    /// Record the response received over `stream`
    fn on_response(&self, stream: &Self::Stream, response: &ResponseInfo);
}

/// Settings applied to every tunnel a provider opens
#[derive(Debug, Clone)]
pub struct ProviderOptions {
    pub transport: TransportConfig,
    pub ignore_certificate_errors: bool,
    /// Resolve destination names locally for SOCKS4
    pub resolve_host: bool,
    pub policy: Arc<dyn ValidityPolicy>,
}

impl Default for ProviderOptions {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            ignore_certificate_errors: false,
            resolve_host: false,
            policy: Arc::new(NeverExpire),
        }
    }
}

/// Builds unopened clients for pool slots from the selected proxy
pub struct ProxyClientFactory {
    selector: Arc<dyn ProxySelector>,
    transports: Arc<dyn TransportFactory>,
    options: ProviderOptions,
}

impl ProxyClientFactory {
    pub fn new(
        selector: Arc<dyn ProxySelector>,
        transports: Arc<dyn TransportFactory>,
        options: ProviderOptions,
    ) -> Self {
        Self {
            selector,
            transports,
            options,
        }
    }
}

impl ConnectionFactory for ProxyClientFactory {
    fn create(&self, key: &PoolKey) -> Result<ProxyClient, ProxyError> {
        let uri = key.destination.to_uri()?;
        let endpoint = self
            .selector
            .select(&uri)
            .ok_or_else(|| ProxyError::NoProxy(key.destination.to_string()))?;

        let mut options = ProxyClientOptions::new(endpoint.address, key.destination.clone(), endpoint.dialect);
        options.credentials = endpoint.credentials;
        options.use_tls = key.use_ssl;
        options.ignore_certificate_errors = self.options.ignore_certificate_errors;
        options.resolve_host = self.options.resolve_host;
        options.transport = self.options.transport.clone();
        Ok(ProxyClient::new(options, self.transports.clone()))
    }
}

/// Connection provider backed by SOCKS tunnels
///
/// Owns one pool; share the provider (not the pool) between requests of the
/// same HTTP client.
pub struct SocksConnectionProvider {
    selector: Arc<dyn ProxySelector>,
    pool: ConnectionPool,
}

impl SocksConnectionProvider {
    pub fn new(
        selector: Arc<dyn ProxySelector>,
        transports: Arc<dyn TransportFactory>,
        options: ProviderOptions,
    ) -> Self {
        let policy = options.policy.clone();
        let factory = ProxyClientFactory::new(selector.clone(), transports, options);
        Self {
            selector,
            pool: ConnectionPool::new(Arc::new(factory), policy),
        }
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// Lock `entry` and open its tunnel if nobody has yet
    ///
    /// `Ok(None)` means the entry went stale while waiting; it has been
    /// discarded.
    async fn checkout(
        &self,
        entry: Arc<PooledConnection>,
        cancel: &CancellationToken,
    ) -> Result<Option<ProxiedStream>, ProxyError> {
        let mut client = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ProxyError::Cancelled),
            client = entry.acquire() => client,
        };

        if entry.is_disposed() || entry.is_broken() || !client.is_usable() {
            trace!(key = %entry.key(), "Pooled connection went stale");
            entry.release(client);
            self.pool.discard(&entry);
            return Ok(None);
        }

        if client.state() == ClientState::Idle {
            if let Err(e) = client.open(cancel).await {
                warn!(key = %entry.key(), error = %e, "Failed to open tunnel");
                entry.mark_broken();
                entry.release(client);
                self.pool.discard(&entry);
                return Err(e);
            }
        }

        Ok(Some(ProxiedStream::new(entry, client)))
    }
}

#[async_trait]
impl ConnectionProvider for SocksConnectionProvider {
    type Stream = ProxiedStream;

    async fn connect(
        &self,
        uri: &Uri,
        force_recreate: bool,
        cancel: &CancellationToken,
    ) -> Result<Option<ProxiedStream>, ProxyError> {
        if self.selector.select(uri).is_none() {
            trace!(%uri, "No proxy for request");
            return Ok(None);
        }

        let key = PoolKey::from_uri(uri)?;
        let entry = if force_recreate {
            self.pool.create(&key, Instant::now())?
        } else {
            self.pool.get_or_create(&key, Instant::now())?
        };

        if let Some(stream) = self.checkout(entry, cancel).await? {
            return Ok(Some(stream));
        }

        // The stale entry is gone from the pool; one more attempt
        debug!(%key, "Retrying with a fresh connection");
        let entry = self.pool.get_or_create(&key, Instant::now())?;
        match self.checkout(entry, cancel).await? {
            Some(stream) => Ok(Some(stream)),
            None => Err(ProxyError::Transport(TransportError::Closed)),
        }
    }

    fn on_response(&self, stream: &ProxiedStream, response: &ResponseInfo) {
        stream.entry().update(response, Instant::now());
    }
}
