//! Service catalog dedup cache
//!
//! Remembers which (service, operation) pairs the backend has confirmed so
//! the catalog index is not rewritten on every batch. A miss only costs one
//! redundant, idempotent catalog write.

use std::fmt;
use std::time::Duration;

use moka::sync::Cache;

/// Default upper bound on remembered pairs
pub const DEFAULT_MAX_ENTRIES: u64 = 100_000;
/// Default time a confirmed pair is trusted
pub const DEFAULT_TTL: Duration = Duration::from_secs(12 * 60 * 60);

/// Stable hash of a (service, operation) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceKey(u64);

impl ServiceKey {
    pub fn new(service: &str, operation: &str) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(service.as_bytes());
        // separator keeps ("ab", "c") and ("a", "bc") apart
        hasher.update(&[0]);
        hasher.update(operation.as_bytes());
        let hash = hasher.finalize();

        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&hash.as_bytes()[..8]);
        Self(u64::from_be_bytes(prefix))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Presence cache consulted before queuing a catalog write
pub trait ServiceCache: Send + Sync {
    fn contains(&self, key: &ServiceKey) -> bool;

    /// Only called once the backend has confirmed the catalog write
    fn record(&self, key: ServiceKey);
}

/// Size- and TTL-bounded cache backed by moka
pub struct MokaServiceCache {
    inner: Cache<ServiceKey, ()>,
}

impl MokaServiceCache {
    pub fn new(max_entries: u64, ttl: Duration) -> Self {
        let inner = Cache::builder()
            .max_capacity(max_entries)
            .time_to_live(ttl)
            .build();
        Self { inner }
    }
}

impl Default for MokaServiceCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES, DEFAULT_TTL)
    }
}

impl ServiceCache for MokaServiceCache {
    fn contains(&self, key: &ServiceKey) -> bool {
        self.inner.contains_key(key)
    }

    fn record(&self, key: ServiceKey) {
        self.inner.insert(key, ());
    }
}

impl fmt::Debug for MokaServiceCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MokaServiceCache")
            .field("entries", &self.inner.entry_count())
            .finish()
    }
}
