use crate::clock::SharedClock;
use crate::core::CacheKey;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Type-erased value held by the memory cache
pub type CachedValue = Arc<dyn Any + Send + Sync>;

/// Memory cache entry
#[derive(Clone)]
pub struct MemoryEntry {
    value: CachedValue,
    /// Hard expiry in epoch millis
    expiry: u64,
}

impl MemoryEntry {
    pub fn new<T: Any + Send + Sync>(value: T, expiry: u64) -> Self {
        Self {
            value: Arc::new(value),
            expiry,
        }
    }

    pub fn expiry(&self) -> u64 {
        self.expiry
    }

    /// An entry is unusable from its expiry instant onwards
    pub fn is_expired_at(&self, now: u64) -> bool {
        now >= self.expiry
    }

    /// Typed view of the value, `None` if it holds another type
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.value.clone().downcast::<T>().ok()
    }
}

impl std::fmt::Debug for MemoryEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryEntry")
            .field("expiry", &self.expiry)
            .finish_non_exhaustive()
    }
}

/// Memory cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Maximum number of resident entries before LRU eviction
    pub max_entries: usize,
    /// Interval of the background expiry sweep
    pub ttl_cleanup_interval_ms: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            ttl_cleanup_interval_ms: 1_000,
        }
    }
}

/// Memory cache statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct MemoryCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub expirations: u64,
    pub evictions: u64,
    pub entries: usize,
}

impl MemoryCacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct LruMap {
    data: HashMap<CacheKey, MemoryEntry>,
    /// Most recent at back
    lru_order: VecDeque<CacheKey>,
    max_entries: usize,
}

impl LruMap {
    fn detach(&mut self, key: &CacheKey) -> Option<MemoryEntry> {
        let removed = self.data.remove(key);
        if removed.is_some() {
            self.lru_order.retain(|k| k != key);
        }
        removed
    }

    fn touch(&mut self, key: &CacheKey) {
        self.lru_order.retain(|k| k != key);
        self.lru_order.push_back(key.clone());
    }
}

/// Process-local key to value store with per-entry expiry
///
/// Cloning yields another handle to the same storage.
#[derive(Clone)]
pub struct MemoryCache {
    inner: Arc<RwLock<LruMap>>,
    stats: Arc<RwLock<MemoryCacheStats>>,
    clock: SharedClock,
    config: MemoryConfig,
}

impl MemoryCache {
    pub fn new(config: MemoryConfig, clock: SharedClock) -> Self {
        Self {
            inner: Arc::new(RwLock::new(LruMap {
                data: HashMap::new(),
                lru_order: VecDeque::new(),
                max_entries: config.max_entries.max(1),
            })),
            stats: Arc::new(RwLock::new(MemoryCacheStats::default())),
            clock,
            config,
        }
    }

    /// Look up a live entry
    ///
    /// With `evict_expired` an expired entry is removed before reporting
    /// absence and a hit refreshes LRU recency. Without it the lookup is a
    /// pure read: expired entries are reported absent but left in place.
    pub fn get(&self, key: &CacheKey, evict_expired: bool) -> Option<MemoryEntry> {
        let now = self.clock.now_millis();

        if !evict_expired {
            let found = self
                .inner
                .read()
                .data
                .get(key)
                .filter(|entry| !entry.is_expired_at(now))
                .cloned();
            self.record_lookup(found.is_some());
            return found;
        }

        let mut l1 = self.inner.write();
        let expired = match l1.data.get(key).map(|entry| entry.is_expired_at(now)) {
            Some(expired) => expired,
            None => {
                drop(l1);
                self.record_lookup(false);
                debug!("Memory cache MISS for key: {}", key);
                return None;
            }
        };

        if expired {
            l1.detach(key);
            let entries = l1.data.len();
            drop(l1);

            let mut stats = self.stats.write();
            stats.misses += 1;
            stats.expirations += 1;
            stats.entries = entries;
            debug!("Memory cache EXPIRED key: {}", key);
            return None;
        }

        l1.touch(key);
        let found = l1.data.get(key).cloned();
        drop(l1);

        self.record_lookup(true);
        debug!("Memory cache HIT for key: {}", key);
        found
    }

    /// Insert or overwrite an entry
    pub fn put(&self, key: CacheKey, entry: MemoryEntry) {
        let mut l1 = self.inner.write();
        let mut stats = self.stats.write();

        l1.detach(&key);

        while l1.data.len() >= l1.max_entries {
            let Some(evict_key) = l1.lru_order.pop_front() else {
                break;
            };
            if l1.data.remove(&evict_key).is_some() {
                stats.evictions += 1;
                debug!("Memory cache EVICT (capacity): {}", evict_key);
            }
        }

        debug!("Memory cache PUT: {} (expiry={})", key, entry.expiry);
        l1.data.insert(key.clone(), entry);
        l1.lru_order.push_back(key);
        stats.entries = l1.data.len();
    }

    /// Remove one entry, returning whether it was present
    pub fn remove(&self, key: &CacheKey) -> bool {
        let mut l1 = self.inner.write();
        let removed = l1.detach(key).is_some();
        if removed {
            self.stats.write().entries = l1.data.len();
            debug!("Memory cache DELETE: {}", key);
        }
        removed
    }

    /// Drop every entry, returning how many were resident
    pub fn evict_all(&self) -> usize {
        let mut l1 = self.inner.write();
        let count = l1.data.len();
        l1.data.clear();
        l1.lru_order.clear();
        self.stats.write().entries = 0;

        debug!("Memory cache EVICT ALL ({} entries)", count);
        count
    }

    /// Remove every expired entry
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_millis();
        let mut l1 = self.inner.write();

        let expired: Vec<CacheKey> = l1
            .data
            .iter()
            .filter(|(_, entry)| entry.is_expired_at(now))
            .map(|(key, _)| key.clone())
            .collect();

        let count = expired.len();
        if count > 0 {
            for key in &expired {
                l1.detach(key);
            }
            let mut stats = self.stats.write();
            stats.expirations += count as u64;
            stats.entries = l1.data.len();
            debug!("Purged {} expired memory entries", count);
        }
        count
    }

    /// Start background expiry sweep
    pub fn start_ttl_cleanup(&self) -> tokio::task::JoinHandle<()> {
        let interval_ms = self.config.ttl_cleanup_interval_ms.max(1);
        info!("Starting memory TTL cleanup task (interval={}ms)", interval_ms);

        let cache = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(interval_ms));

            loop {
                interval.tick().await;
                cache.purge_expired();
            }
        })
    }

    /// Whether a slot is occupied, expired or not
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.inner.read().data.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.inner.read().data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> MemoryCacheStats {
        self.stats.read().clone()
    }

    fn record_lookup(&self, hit: bool) {
        let mut stats = self.stats.write();
        if hit {
            stats.hits += 1;
        } else {
            stats.misses += 1;
        }
    }
}
