//! Shared health flag written by the status watcher.

use std::sync::RwLock;
use std::time::Instant;

#[derive(Debug, Default)]
struct Inner {
    healthy: bool,
    last_refresh: Option<Instant>,
}

/// Process-wide health flag. Written by the status watcher, read by
/// every other watcher and the readiness probe to gate work each tick.
#[derive(Debug, Default)]
pub struct HealthStore {
    inner: RwLock<Inner>,
}

impl HealthStore {
    /// Create a store that starts out unhealthy.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the flag and stamp the refresh time.
    pub fn set_healthy(&self, healthy: bool) {
        let mut inner = self.inner.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        inner.healthy = healthy;
        inner.last_refresh = Some(Instant::now());
    }

    /// Current value of the flag.
    pub fn is_healthy(&self) -> bool {
        self.inner.read().unwrap_or_else(std::sync::PoisonError::into_inner).healthy
    }

    /// When the flag was last written, or `None` if it never was.
    pub fn last_refresh(&self) -> Option<Instant> {
        self.inner.read().unwrap_or_else(std::sync::PoisonError::into_inner).last_refresh
    }
}
