//! When a healthy pooled tunnel may still be reused

use super::PooledConnection;
use std::fmt;
use std::time::{Duration, Instant};

/// Decides whether a healthy entry may be reused at `now`
///
/// Only consulted for entries that are neither disposed, broken, nor holding a
/// closed or faulted client; those are always replaced.
pub trait ValidityPolicy: Send + Sync + fmt::Debug {
    fn is_valid(&self, entry: &PooledConnection, now: Instant) -> bool;
}

/// Entries live until forced recreation or failure
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverExpire;

impl ValidityPolicy for NeverExpire {
    fn is_valid(&self, _entry: &PooledConnection, _now: Instant) -> bool {
        true
    }
}

/// Bounds entry age and time since last use
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExpiryPolicy {
    /// Replace entries older than this
    pub max_lifetime: Option<Duration>,
    /// Replace entries unused for longer than this
    pub idle_timeout: Option<Duration>,
}

impl ExpiryPolicy {
    pub fn new(max_lifetime: Option<Duration>, idle_timeout: Option<Duration>) -> Self {
        Self {
            max_lifetime,
            idle_timeout,
        }
    }
}

impl ValidityPolicy for ExpiryPolicy {
    fn is_valid(&self, entry: &PooledConnection, now: Instant) -> bool {
        if let Some(max) = self.max_lifetime {
            if now.saturating_duration_since(entry.created_at()) > max {
                return false;
            }
        }
        if let Some(idle) = self.idle_timeout {
            if now.saturating_duration_since(entry.last_used()) > idle {
                return false;
            }
        }
        true
    }
}
