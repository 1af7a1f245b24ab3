//! Connection pool
//!
//! Keeps one proxied tunnel per (destination, TLS) pair so consecutive HTTP
//! requests to the same endpoint reuse an established SOCKS session.
//!
//! All map operations (lookup, validity check, eviction, disposal, insertion)
//! run inside one short critical section. Entries are built without I/O; the
//! handshake happens later, outside the pool lock, under the entry's own async
//! lock. Concurrent callers for the same key therefore always share one entry
//! and wait on each other there, never on the pool.

mod entry;
mod policy;

pub use entry::{PooledConnection, ResponseInfo};
pub use policy::{ExpiryPolicy, NeverExpire, ValidityPolicy};

use crate::proxy::{Address, ProxyClient, ProxyError, Scheme};
use http::Uri;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Builds the (unopened) client for a pool slot
pub trait ConnectionFactory: Send + Sync {
    fn create(&self, key: &PoolKey) -> Result<ProxyClient, ProxyError>;
}

/// Pool slot identity
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PoolKey {
    pub destination: Address,
    pub use_ssl: bool,
}

impl PoolKey {
    pub fn new(destination: Address, use_ssl: bool) -> Self {
        Self {
            destination,
            use_ssl,
        }
    }

    /// Key for a request URI; `https` selects TLS
    pub fn from_uri(uri: &Uri) -> Result<Self, ProxyError> {
        let destination = Address::from_uri(uri)?;
        let use_ssl = destination.scheme() == Scheme::Ssl;
        Ok(Self::new(destination, use_ssl))
    }
}

impl fmt::Display for PoolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = if self.use_ssl { "tls" } else { "tcp" };
        write!(f, "{}/{}", self.destination, scheme)
    }
}

/// Pool of proxied tunnels
pub struct ConnectionPool {
    factory: Arc<dyn ConnectionFactory>,
    policy: Arc<dyn ValidityPolicy>,
    connections: Mutex<HashMap<PoolKey, Arc<PooledConnection>>>,
}

impl ConnectionPool {
    pub fn new(factory: Arc<dyn ConnectionFactory>, policy: Arc<dyn ValidityPolicy>) -> Self {
        Self {
            factory,
            policy,
            connections: Mutex::new(HashMap::new()),
        }
    }

    /// Return the valid entry for `key`, replacing a stale one
    pub fn get_or_create(&self, key: &PoolKey, now: Instant) -> Result<Arc<PooledConnection>, ProxyError> {
        let mut connections = self.connections.lock();

        if let Some(entry) = connections.get(key) {
            if entry.is_valid(now, self.policy.as_ref()) {
                debug!(%key, requests = entry.requests(), "Reusing pooled connection");
                return Ok(entry.clone());
            }
            if let Some(stale) = connections.remove(key) {
                debug!(%key, broken = stale.is_broken(), "Evicting stale connection");
                stale.dispose();
            }
        }

        let entry = self.build(key, now)?;
        connections.insert(key.clone(), entry.clone());
        Ok(entry)
    }

    /// Always build a new entry, disposing any existing one
    pub fn create(&self, key: &PoolKey, now: Instant) -> Result<Arc<PooledConnection>, ProxyError> {
        let mut connections = self.connections.lock();

        if let Some(old) = connections.remove(key) {
            debug!(%key, "Replacing pooled connection");
            old.dispose();
        }

        let entry = self.build(key, now)?;
        connections.insert(key.clone(), entry.clone());
        Ok(entry)
    }

    /// Remove and dispose `entry` if it is still the one mapped for its key
    pub fn discard(&self, entry: &Arc<PooledConnection>) {
        let mut connections = self.connections.lock();

        let current = connections
            .get(entry.key())
            .is_some_and(|mapped| Arc::ptr_eq(mapped, entry));
        if current {
            connections.remove(entry.key());
            debug!(key = %entry.key(), "Discarded pooled connection");
        }
        entry.dispose();
    }

    /// Remove and dispose the entry for `key`
    pub fn remove(&self, key: &PoolKey) -> bool {
        let mut connections = self.connections.lock();
        match connections.remove(key) {
            Some(entry) => {
                entry.dispose();
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.connections.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.lock().is_empty()
    }

    /// Dispose every entry
    pub fn clear(&self) {
        let mut connections = self.connections.lock();
        if !connections.is_empty() {
            debug!(count = connections.len(), "Clearing connection pool");
        }
        for (_, entry) in connections.drain() {
            entry.dispose();
        }
    }

    fn build(&self, key: &PoolKey, now: Instant) -> Result<Arc<PooledConnection>, ProxyError> {
        let client = self.factory.create(key)?;
        debug!(%key, proxy = %client.proxy(), "Created pooled connection");
        Ok(Arc::new(PooledConnection::new(key.clone(), client, now)))
    }
}

impl Drop for ConnectionPool {
    fn drop(&mut self) {
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Dialect;
    use crate::proxy::{ClientState, ProxyClientOptions};
    use crate::transport::MemoryTransportFactory;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio_util::sync::CancellationToken;

    struct CountingFactory {
        transports: Arc<MemoryTransportFactory>,
        created: AtomicUsize,
    }

    impl CountingFactory {
        fn new() -> Self {
            Self {
                transports: Arc::new(MemoryTransportFactory::new()),
                created: AtomicUsize::new(0),
            }
        }

        fn created(&self) -> usize {
            self.created.load(Ordering::SeqCst)
        }

        /// Queue a SOCKS4 server that grants one CONNECT
        fn grant_next(&self) {
            let mut peer = self.transports.peer();
            tokio::spawn(async move {
                let mut request = [0u8; 9];
                if peer.read_exact(&mut request).await.is_ok() {
                    peer.write_all(&[0x00, 0x5A, 0, 0, 0, 0, 0, 0]).await.ok();
                }
                // Hold the pipe open until the client goes away
                let mut rest = Vec::new();
                peer.read_to_end(&mut rest).await.ok();
            });
        }
    }

    impl ConnectionFactory for CountingFactory {
        fn create(&self, key: &PoolKey) -> Result<ProxyClient, ProxyError> {
            self.created.fetch_add(1, Ordering::SeqCst);
            let options = ProxyClientOptions::new(
                "proxy.local:1080".parse()?,
                key.destination.clone(),
                Dialect::Socks4,
            );
            Ok(ProxyClient::new(options, self.transports.clone()))
        }
    }

    struct FailingFactory;

    impl ConnectionFactory for FailingFactory {
        fn create(&self, key: &PoolKey) -> Result<ProxyClient, ProxyError> {
            Err(ProxyError::NoProxy(key.to_string()))
        }
    }

    fn key(addr: &str) -> PoolKey {
        PoolKey::new(addr.parse().unwrap(), false)
    }

    fn pool(factory: &Arc<CountingFactory>, policy: impl ValidityPolicy + 'static) -> ConnectionPool {
        ConnectionPool::new(factory.clone(), Arc::new(policy))
    }

    async fn open(factory: &CountingFactory, entry: &PooledConnection) {
        factory.grant_next();
        let mut client = entry.acquire().await;
        client.open(&CancellationToken::new()).await.unwrap();
        entry.release(client);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_get_or_create_shares_one_entry() {
        let factory = Arc::new(CountingFactory::new());
        let pool = Arc::new(pool(&factory, NeverExpire));
        let key = key("10.1.2.3:80");
        let now = Instant::now();

        let handles: Vec<_> = (0..32)
            .map(|_| {
                let pool = pool.clone();
                let key = key.clone();
                tokio::spawn(async move { pool.get_or_create(&key, now).unwrap() })
            })
            .collect();

        let mut entries = Vec::new();
        for handle in handles {
            entries.push(handle.await.unwrap());
        }

        assert_eq!(factory.created(), 1);
        assert_eq!(pool.len(), 1);
        assert!(entries.iter().all(|e| Arc::ptr_eq(e, &entries[0])));
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let factory = Arc::new(CountingFactory::new());
        let pool = pool(&factory, NeverExpire);
        let now = Instant::now();

        let plain = PoolKey::new("example.com:443".parse().unwrap(), false);
        let tls = PoolKey::new("example.com:443".parse().unwrap(), true);
        let a = pool.get_or_create(&plain, now).unwrap();
        let b = pool.get_or_create(&tls, now).unwrap();

        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(pool.len(), 2);
    }

    #[tokio::test]
    async fn test_create_disposes_previous() {
        let factory = Arc::new(CountingFactory::new());
        let pool = pool(&factory, NeverExpire);
        let key = key("10.1.2.3:80");
        let now = Instant::now();

        let old = pool.get_or_create(&key, now).unwrap();
        open(&factory, &old).await;
        assert_eq!(old.acquire().await.state(), ClientState::Open);

        let new = pool.create(&key, now).unwrap();
        assert!(!Arc::ptr_eq(&old, &new));
        assert!(old.is_disposed());
        assert_eq!(old.acquire().await.state(), ClientState::Closed);
        assert_eq!(factory.transports.stats().closed(), 1);

        assert!(Arc::ptr_eq(&pool.get_or_create(&key, now).unwrap(), &new));
        assert_eq!(factory.created(), 2);
    }

    #[tokio::test]
    async fn test_dispose_in_use_closes_on_release() {
        let factory = Arc::new(CountingFactory::new());
        let pool = pool(&factory, NeverExpire);
        let key = key("10.1.2.3:80");
        let now = Instant::now();

        let entry = pool.get_or_create(&key, now).unwrap();
        open(&factory, &entry).await;

        let guard = entry.acquire().await;
        pool.create(&key, now).unwrap();
        assert!(entry.is_disposed());
        assert_eq!(guard.state(), ClientState::Open);
        assert_eq!(factory.transports.stats().closed(), 0);

        entry.release(guard);
        assert_eq!(entry.acquire().await.state(), ClientState::Closed);
        assert_eq!(factory.transports.stats().closed(), 1);
    }

    #[tokio::test]
    async fn test_broken_entry_replaced() {
        let factory = Arc::new(CountingFactory::new());
        let pool = pool(&factory, NeverExpire);
        let key = key("10.1.2.3:80");
        let now = Instant::now();

        let first = pool.get_or_create(&key, now).unwrap();
        first.update(&ResponseInfo::new(200, true), now);
        assert!(Arc::ptr_eq(&pool.get_or_create(&key, now).unwrap(), &first));
        assert_eq!(first.requests(), 1);

        first.update(&ResponseInfo::new(200, false), now);
        let second = pool.get_or_create(&key, now).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(first.is_disposed());
        assert_eq!(factory.created(), 2);
    }

    #[tokio::test]
    async fn test_faulted_entry_replaced() {
        let factory = Arc::new(CountingFactory::new());
        let pool = pool(&factory, NeverExpire);
        let key = key("10.1.2.3:80");
        let now = Instant::now();

        let first = pool.get_or_create(&key, now).unwrap();
        {
            // No peer queued: the proxy refuses
            let mut client = first.acquire().await;
            assert!(client.open(&CancellationToken::new()).await.is_err());
            first.release(client);
        }

        let second = pool.get_or_create(&key, now).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_expiry_policy() {
        let factory = Arc::new(CountingFactory::new());
        let policy = ExpiryPolicy::new(Some(Duration::from_secs(60)), Some(Duration::from_secs(5)));
        let pool = pool(&factory, policy);
        let key = key("10.1.2.3:80");
        let start = Instant::now();

        let first = pool.get_or_create(&key, start).unwrap();
        first.update(&ResponseInfo::new(200, true), start + Duration::from_secs(3));

        // Idle for 4s
        let same = pool.get_or_create(&key, start + Duration::from_secs(7)).unwrap();
        assert!(Arc::ptr_eq(&first, &same));

        // Idle for 6s
        let second = pool.get_or_create(&key, start + Duration::from_secs(9)).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));

        // Older than the max lifetime despite recent use
        let created = start + Duration::from_secs(9);
        second.update(&ResponseInfo::new(200, true), created + Duration::from_secs(59));
        let third = pool
            .get_or_create(&key, created + Duration::from_secs(61))
            .unwrap();
        assert!(!Arc::ptr_eq(&second, &third));
        assert_eq!(factory.created(), 3);
    }

    #[tokio::test]
    async fn test_discard_only_current_entry() {
        let factory = Arc::new(CountingFactory::new());
        let pool = pool(&factory, NeverExpire);
        let key = key("10.1.2.3:80");
        let now = Instant::now();

        let old = pool.get_or_create(&key, now).unwrap();
        let new = pool.create(&key, now).unwrap();

        pool.discard(&old);
        assert_eq!(pool.len(), 1);
        assert!(Arc::ptr_eq(&pool.get_or_create(&key, now).unwrap(), &new));

        pool.discard(&new);
        assert!(pool.is_empty());
        assert!(new.is_disposed());
    }

    #[tokio::test]
    async fn test_clear_and_drop_dispose_entries() {
        let factory = Arc::new(CountingFactory::new());
        let pool = pool(&factory, NeverExpire);
        let now = Instant::now();

        let a = pool.get_or_create(&key("10.1.2.3:80"), now).unwrap();
        open(&factory, &a).await;
        pool.clear();
        assert!(pool.is_empty());
        assert!(a.is_disposed());
        assert_eq!(factory.transports.stats().closed(), 1);

        let b = pool.get_or_create(&key("10.1.2.4:80"), now).unwrap();
        assert!(pool.remove(&key("10.1.2.4:80")));
        assert!(!pool.remove(&key("10.1.2.4:80")));
        assert!(b.is_disposed());

        let c = pool.get_or_create(&key("10.1.2.5:80"), now).unwrap();
        drop(pool);
        assert!(c.is_disposed());
    }

    #[tokio::test]
    async fn test_factory_error_leaves_pool_unchanged() {
        let pool = ConnectionPool::new(Arc::new(FailingFactory), Arc::new(NeverExpire));
        let err = pool.get_or_create(&key("10.1.2.3:80"), Instant::now()).unwrap_err();
        assert!(matches!(err, ProxyError::NoProxy(_)));
        assert!(pool.is_empty());
    }

    #[test]
    fn test_key_from_uri() {
        let key = PoolKey::from_uri(&"https://example.com/a".parse().unwrap()).unwrap();
        assert!(key.use_ssl);
        assert_eq!(key.destination.port(), 443);
        assert_eq!(key.to_string(), "example.com:443/tls");
    }
}
