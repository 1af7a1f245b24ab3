//! Byte stream over a pooled tunnel

use crate::pool::{PoolKey, PooledConnection};
use crate::proxy::ProxyClient;
use crate::transport::BoxedStream;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::OwnedMutexGuard;

/// Exclusive use of a pooled tunnel for one request/response cycle
///
/// Holds the entry's lock until dropped; dropping hands the tunnel back to
/// the pool (or closes it if the pool disposed the entry meanwhile).
pub struct ProxiedStream {
    entry: Arc<PooledConnection>,
    client: Option<OwnedMutexGuard<ProxyClient>>,
}

impl ProxiedStream {
    pub(crate) fn new(entry: Arc<PooledConnection>, client: OwnedMutexGuard<ProxyClient>) -> Self {
        Self {
            entry,
            client: Some(client),
        }
    }

    /// Pool entry backing this stream
    pub fn entry(&self) -> &Arc<PooledConnection> {
        &self.entry
    }

    pub fn key(&self) -> &PoolKey {
        self.entry.key()
    }

    fn io(&mut self) -> io::Result<&mut BoxedStream> {
        let client = self
            .client
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "tunnel released"))?;
        client
            .stream()
            .map_err(|e| io::Error::new(io::ErrorKind::NotConnected, e))
    }
}

impl AsyncRead for ProxiedStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut().io() {
            Ok(stream) => Pin::new(stream).poll_read(cx, buf),
            Err(e) => Poll::Ready(Err(e)),
        }
    }
}

impl AsyncWrite for ProxiedStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut().io() {
            Ok(stream) => Pin::new(stream).poll_write(cx, buf),
            Err(e) => Poll::Ready(Err(e)),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut().io() {
            Ok(stream) => Pin::new(stream).poll_flush(cx),
            Err(e) => Poll::Ready(Err(e)),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut().io() {
            Ok(stream) => Pin::new(stream).poll_shutdown(cx),
            Err(e) => Poll::Ready(Err(e)),
        }
    }
}

impl Drop for ProxiedStream {
    fn drop(&mut self) {
        if let Some(client) = self.client.take() {
            self.entry.release(client);
        }
    }
}

impl std::fmt::Debug for ProxiedStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxiedStream")
            .field("key", self.key())
            .field("released", &self.client.is_none())
            .finish()
    }
}
