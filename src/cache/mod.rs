//! TTL caches over archive bodies, central indices and HEAD metadata,
//! plus the ETag map the invalidator works against.
//!
//! The backend is a byte-oriented provider; layers add a key namespace, a
//! default TTL and single-flight fills so that N concurrent misses for the
//! same archive cost one store round-trip.

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use lru::LruCache;
use std::collections::HashMap;
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::debug;

use crate::error::Result;

/// Default TTL for raw archive bodies.
pub const ARCHIVE_TTL: Duration = Duration::from_secs(30 * 60);
/// Upper bound for per-request archive TTL overrides.
pub const ARCHIVE_TTL_MAX: Duration = Duration::from_secs(2 * 24 * 60 * 60);
/// TTL for cached central-index bytes.
pub const INDEX_TTL: Duration = Duration::from_secs(60);
/// TTL for resolved HEAD responses.
pub const HEAD_TTL: Duration = Duration::from_secs(10);

/// Entry bound for the bundled in-memory provider.
pub const MEMORY_CAPACITY: usize = 5_000;

/// Byte-oriented cache backend. The bundled provider is in-memory; remote
/// providers are interchangeable as long as they honor these four
/// operations.
#[async_trait]
pub trait CacheProvider: Send + Sync + 'static {
    async fn get(&self, key: &str) -> Option<Bytes>;
    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>);
    async fn purge(&self, key: &str);
    /// Reset the remaining TTL of an existing entry.
    async fn set_ttl(&self, key: &str, ttl: Duration);

    /// Keys currently live under `prefix`. Backends that cannot enumerate
    /// may return nothing; only the invalidator's reseed pass degrades.
    async fn keys(&self, _prefix: &str) -> Vec<String> {
        Vec::new()
    }
}

struct MemoryEntry {
    value: Bytes,
    expires_at: Option<Instant>,
}

impl MemoryEntry {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// Bounded LRU provider with per-entry expiry checked on read.
pub struct MemoryProvider {
    entries: Mutex<LruCache<String, MemoryEntry>>,
}

impl MemoryProvider {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity)
            .unwrap_or_else(|| NonZeroUsize::new(MEMORY_CAPACITY).unwrap());
        MemoryProvider {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }
}

impl Default for MemoryProvider {
    fn default() -> Self {
        Self::new(MEMORY_CAPACITY)
    }
}

#[async_trait]
impl CacheProvider for MemoryProvider {
    async fn get(&self, key: &str) -> Option<Bytes> {
        let mut entries = self.entries.lock().unwrap();
        match entries.get(key) {
            Some(entry) if entry.is_expired() => {
                entries.pop(key);
                None
            }
            Some(entry) => Some(entry.value.clone()),
            None => None,
        }
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) {
        let entry = MemoryEntry {
            value,
            expires_at: ttl.map(|d| Instant::now() + d),
        };
        self.entries.lock().unwrap().put(key.to_string(), entry);
    }

    async fn purge(&self, key: &str) {
        self.entries.lock().unwrap().pop(key);
    }

    async fn set_ttl(&self, key: &str, ttl: Duration) {
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.get_mut(key) {
            entry.expires_at = Some(Instant::now() + ttl);
        }
    }

    async fn keys(&self, prefix: &str) -> Vec<String> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, e)| k.starts_with(prefix) && !e.is_expired())
            .map(|(k, _)| k.clone())
            .collect()
    }
}

/// A namespaced TTL view of a provider with single-flight fills.
pub struct CacheLayer {
    provider: Arc<dyn CacheProvider>,
    namespace: &'static str,
    default_ttl: Duration,
    flights: tokio::sync::Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl CacheLayer {
    pub fn new(provider: Arc<dyn CacheProvider>, namespace: &'static str, ttl: Duration) -> Self {
        CacheLayer {
            provider,
            namespace,
            default_ttl: ttl,
            flights: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    fn key(&self, name: &str) -> String {
        format!("{}/{}", self.namespace, name)
    }

    pub async fn get(&self, name: &str) -> Option<Bytes> {
        self.provider.get(&self.key(name)).await
    }

    pub async fn set(&self, name: &str, value: Bytes, ttl: Option<Duration>) {
        let ttl = ttl.unwrap_or(self.default_ttl);
        self.provider.set(&self.key(name), value, Some(ttl)).await;
    }

    pub async fn purge(&self, name: &str) {
        self.provider.purge(&self.key(name)).await;
    }

    /// Names (without the namespace prefix) currently cached.
    pub async fn names(&self) -> Vec<String> {
        let prefix = format!("{}/", self.namespace);
        self.provider
            .keys(&prefix)
            .await
            .into_iter()
            .filter_map(|k| k.strip_prefix(&prefix).map(String::from))
            .collect()
    }

    /// Read-through with single-flight: concurrent misses for one key
    /// share a fill, a cancelled leader promotes the next waiter, and a
    /// purge mid-flight makes the next arrival start a fresh fill.
    pub async fn fetch<F, Fut>(&self, name: &str, ttl: Option<Duration>, fill: F) -> Result<Bytes>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Bytes>>,
    {
        if let Some(hit) = self.get(name).await {
            return Ok(hit);
        }

        let flight = {
            let mut flights = self.flights.lock().await;
            Arc::clone(
                flights
                    .entry(name.to_string())
                    .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
            )
        };
        let _guard = flight.lock().await;

        // The previous leader may have filled the key while we waited.
        if let Some(hit) = self.get(name).await {
            return Ok(hit);
        }

        debug!(namespace = self.namespace, name, "cache fill");
        let outcome = fill().await;

        if let Ok(value) = &outcome {
            self.set(name, value.clone(), ttl).await;
        }
        self.flights.lock().await.remove(name);
        outcome
    }
}

/// The TTL-less ETag map, written by the invalidator and by every full
/// archive fetch.
#[derive(Default)]
pub struct EtagMap {
    entries: DashMap<String, String>,
}

impl EtagMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<String> {
        self.entries.get(name).map(|v| v.value().clone())
    }

    pub fn set(&self, name: impl Into<String>, etag: impl Into<String>) {
        self.entries.insert(name.into(), etag.into());
    }

    pub fn remove(&self, name: &str) {
        self.entries.remove(name);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn snapshot(&self) -> Vec<(String, String)> {
        self.entries
            .iter()
            .map(|kv| (kv.key().clone(), kv.value().clone()))
            .collect()
    }
}

/// The cache hierarchy the planner and invalidator share.
pub struct MegCaches {
    pub archives: CacheLayer,
    pub indexes: CacheLayer,
    pub heads: CacheLayer,
    pub etags: EtagMap,
}

impl MegCaches {
    pub fn with_provider(provider: Arc<dyn CacheProvider>) -> Self {
        MegCaches {
            archives: CacheLayer::new(Arc::clone(&provider), "archives", ARCHIVE_TTL),
            indexes: CacheLayer::new(Arc::clone(&provider), "indexes", INDEX_TTL),
            heads: CacheLayer::new(provider, "heads", HEAD_TTL),
            etags: EtagMap::new(),
        }
    }

    pub fn in_memory() -> Self {
        Self::with_provider(Arc::new(MemoryProvider::default()))
    }

    /// Drop everything derived from an archive object. Idempotent, and
    /// safe against concurrent planner reads: in-flight fills re-observe
    /// the miss and fetch fresh bytes.
    pub async fn purge_archive(&self, name: &str) {
        self.archives.purge(name).await;
        self.indexes.purge(name).await;
        self.heads.purge(name).await;
    }
}
