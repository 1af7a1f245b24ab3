//! Pool entry wrapping one proxy client

use super::{PoolKey, ValidityPolicy};
use crate::proxy::{ClientState, ProxyClient};
use http::header::CONNECTION;
use http::Version;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{trace, warn};

/// What the pool needs to know about a response that used a tunnel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseInfo {
    pub status: u16,
    /// Whether the server will keep the connection open
    pub keep_alive: bool,
}

impl ResponseInfo {
    pub fn new(status: u16, keep_alive: bool) -> Self {
        Self { status, keep_alive }
    }

    /// Summarize response head
    ///
    /// HTTP/1.0 keeps the connection only with `Connection: keep-alive`; later
    /// versions keep it unless `Connection: close` is present.
    pub fn from_parts(parts: &http::response::Parts) -> Self {
        let mut close = false;
        let mut keep_alive = false;
        let tokens = parts
            .headers
            .get_all(CONNECTION)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(','))
            .map(str::trim);
        for token in tokens {
            if token.eq_ignore_ascii_case("close") {
                close = true;
            } else if token.eq_ignore_ascii_case("keep-alive") {
                keep_alive = true;
            }
        }

        let legacy = parts.version == Version::HTTP_10 || parts.version == Version::HTTP_09;
        let keep_alive = !close && (keep_alive || !legacy);
        Self::new(parts.status.as_u16(), keep_alive)
    }
}

/// One pooled tunnel
///
/// The client sits behind an async lock held for a whole request/response
/// cycle. Bookkeeping lives in atomics so validity checks never wait on it.
pub struct PooledConnection {
    key: PoolKey,
    client: Arc<AsyncMutex<ProxyClient>>,
    created_at: Instant,
    last_used: Mutex<Instant>,
    requests: AtomicU64,
    broken: AtomicBool,
    disposed: AtomicBool,
}

impl PooledConnection {
    pub fn new(key: PoolKey, client: ProxyClient, now: Instant) -> Self {
        Self {
            key,
            client: Arc::new(AsyncMutex::new(client)),
            created_at: now,
            last_used: Mutex::new(now),
            requests: AtomicU64::new(0),
            broken: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
        }
    }

    pub fn key(&self) -> &PoolKey {
        &self.key
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn last_used(&self) -> Instant {
        *self.last_used.lock()
    }

    /// Responses recorded through [`update`](Self::update)
    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    pub fn is_broken(&self) -> bool {
        self.broken.load(Ordering::SeqCst)
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Never hand this entry out again
    pub fn mark_broken(&self) {
        self.broken.store(true, Ordering::SeqCst);
    }

    /// Wait for exclusive use of the client
    pub async fn acquire(&self) -> OwnedMutexGuard<ProxyClient> {
        self.client.clone().lock_owned().await
    }

    /// Give the client back; closes it if the entry was disposed meanwhile
    pub fn release(&self, guard: OwnedMutexGuard<ProxyClient>) {
        drop(guard);
        if self.is_disposed() {
            self.close_if_idle();
        }
    }

    /// Record a response that went over this tunnel
    pub fn update(&self, response: &ResponseInfo, now: Instant) {
        *self.last_used.lock() = now;
        self.requests.fetch_add(1, Ordering::Relaxed);
        if !response.keep_alive {
            trace!(key = %self.key, status = response.status, "Server closes connection");
            self.mark_broken();
        }
    }

    /// Whether the pool may hand this entry out at `now`
    pub fn is_valid(&self, now: Instant, policy: &dyn ValidityPolicy) -> bool {
        if self.is_disposed() || self.is_broken() {
            return false;
        }
        // A locked client is in use and therefore still considered healthy
        if let Ok(client) = self.client.try_lock() {
            if !client.is_usable() {
                return false;
            }
        }
        policy.is_valid(self, now)
    }

    /// Close the client and mark the entry dead; idempotent
    ///
    /// When the client is in use the holder closes it on release.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        trace!(key = %self.key, "Disposing pooled connection");
        self.close_if_idle();
    }

    fn close_if_idle(&self) {
        let Ok(mut client) = self.client.try_lock() else {
            return;
        };
        if client.state() == ClientState::Idle {
            return;
        }
        if let Err(e) = client.close() {
            warn!(key = %self.key, error = %e, "Failed to close pooled connection");
        }
    }
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("key", &self.key)
            .field("requests", &self.requests())
            .field("broken", &self.is_broken())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
