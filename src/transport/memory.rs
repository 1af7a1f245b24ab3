//! In-memory transport backed by `tokio::io::duplex`
//!
//! Each call to [`MemoryTransportFactory::peer`] queues one pipe; the next
//! transport the factory creates is connected to it and the caller keeps the
//! other end to play the remote side. Opening a transport with no queued peer
//! fails like a refused connection.

use super::{BoxedStream, Transport, TransportConfig, TransportError, TransportFactory};
use crate::proxy::Address;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::DuplexStream;

/// Default pipe capacity
const PIPE_CAPACITY: usize = 64 * 1024;

/// Counters shared by a factory and every transport it created
#[derive(Debug, Default)]
pub struct TransportStats {
    created: AtomicUsize,
    opened: AtomicUsize,
    closed: AtomicUsize,
}

impl TransportStats {
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Transport connected to a queued in-memory pipe
pub struct MemoryTransport {
    address: Address,
    pipe: Option<DuplexStream>,
    stats: Arc<TransportStats>,
    open: bool,
}

#[async_trait]
impl Transport for MemoryTransport {
    fn configure(&mut self, _config: TransportConfig) {}

    async fn open(&mut self) -> Result<(), TransportError> {
        if self.open {
            return Err(TransportError::AlreadyOpen);
        }
        if self.pipe.is_none() {
            return Err(TransportError::ConnectionFailed(format!(
                "{}: connection refused",
                self.address
            )));
        }
        self.open = true;
        self.stats.opened.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn take_stream(&mut self) -> Option<BoxedStream> {
        if !self.open {
            return None;
        }
        self.pipe.take().map(|pipe| Box::new(pipe) as BoxedStream)
    }

    fn close(&mut self) -> Result<(), TransportError> {
        if self.open {
            self.open = false;
            self.pipe = None;
            self.stats.closed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

/// Factory handing out [`MemoryTransport`]s in FIFO order of queued peers
#[derive(Debug, Default)]
pub struct MemoryTransportFactory {
    pending: Mutex<VecDeque<DuplexStream>>,
    stats: Arc<TransportStats>,
}

impl MemoryTransportFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a pipe for the next transport and return its remote end
    pub fn peer(&self) -> DuplexStream {
        let (local, remote) = tokio::io::duplex(PIPE_CAPACITY);
        self.pending.lock().push_back(local);
        remote
    }

    pub fn stats(&self) -> Arc<TransportStats> {
        self.stats.clone()
    }
}

impl TransportFactory for MemoryTransportFactory {
    fn create(&self, address: &Address, _use_tls: bool) -> Box<dyn Transport> {
        self.stats.created.fetch_add(1, Ordering::SeqCst);
        Box::new(MemoryTransport {
            address: address.clone(),
            pipe: self.pending.lock().pop_front(),
            stats: self.stats.clone(),
            open: false,
        })
    }
}
