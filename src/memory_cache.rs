use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::cache::CredentialCache;
use crate::error::{Error, Result};
use crate::identity::AuthContext;

/// In-memory credential cache with LRU eviction and a fixed TTL.
///
/// Clones share the same underlying storage.
#[derive(Debug, Clone)]
pub struct MemoryCache {
    inner: Arc<Mutex<CacheState>>,
    capacity: usize,
    ttl: Duration,
}

/// Recency is a monotonically increasing tick; `order` maps ticks back to keys
/// so the least recently used entry is the first one.
#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    order: BTreeMap<u64, String>,
    tick: u64,
}

impl CacheState {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: AuthContext,
    expires_at: Instant,
    used: u64,
}

impl MemoryCache {
    /// Creates a cache holding at most `capacity` identities for `ttl` each.
    ///
    /// A capacity of zero disables caching. A zero `ttl` is rejected.
    pub fn new(capacity: usize, ttl: Duration) -> Result<Self> {
        if ttl.is_zero() {
            return Err(Error::configuration("cache ttl must be greater than zero"));
        }
        Ok(Self {
            inner: Arc::new(Mutex::new(CacheState::default())),
            capacity,
            ttl,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Number of stored entries, including ones that expired but were not yet evicted.
    pub fn len(&self) -> usize {
        self.inner.lock().expect("poisoned lock").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn remove_key(state: &mut CacheState, key: &str) {
        if let Some(entry) = state.entries.remove(key) {
            state.order.remove(&entry.used);
        }
    }

    fn evict_lru(state: &mut CacheState) {
        if let Some((_, key)) = state.order.pop_first() {
            state.entries.remove(&key);
        }
    }
}

#[async_trait]
impl CredentialCache for MemoryCache {
    async fn get(&self, credential: &str) -> Option<AuthContext> {
        if self.capacity == 0 {
            return None;
        }

        let now = Instant::now();
        let mut guard = self.inner.lock().expect("poisoned lock");
        let state = &mut *guard;

        let entry = state.entries.get(credential)?;
        if now >= entry.expires_at {
            Self::remove_key(state, credential);
            return None;
        }
        let previous = entry.used;
        let used = state.next_tick();
        state.order.remove(&previous);
        state.order.insert(used, credential.to_string());
        let entry = state.entries.get_mut(credential)?;
        entry.used = used;
        Some(entry.value.clone())
    }

    async fn set(&self, credential: &str, identity: AuthContext) {
        if self.capacity == 0 {
            return;
        }

        let now = Instant::now();
        let mut guard = self.inner.lock().expect("poisoned lock");

        Self::remove_key(&mut guard, credential);
        while guard.entries.len() >= self.capacity && !guard.order.is_empty() {
            Self::evict_lru(&mut guard);
        }
        let used = guard.next_tick();
        guard.entries.insert(
            credential.to_string(),
            CacheEntry {
                value: identity,
                expires_at: now + self.ttl,
                used,
            },
        );
        guard.order.insert(used, credential.to_string());
    }

    async fn invalidate(&self, credential: &str) {
        let mut guard = self.inner.lock().expect("poisoned lock");
        Self::remove_key(&mut guard, credential);
    }

    async fn clear(&self) {
        let mut guard = self.inner.lock().expect("poisoned lock");
        guard.entries.clear();
        guard.order.clear();
    }
}
