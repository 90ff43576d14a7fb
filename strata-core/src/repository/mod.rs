//! Repository Core
//!
//! Coordinates the three tiers behind a single read path:
//! - memory: resident values with a hard expiry
//! - disk: durable bytes with hard and soft TTLs
//! - network: the resource's own remote call
//!
//! Reads fall back strictly downward (memory, then disk, then network) and
//! the first `Success` short-circuits. Successful fetches are written back
//! up into disk and memory with fresh TTLs; failures and stale or irrelevant
//! data evict.

pub mod resource;

pub use resource::{DEFAULT_TTL, Resource};

use crate::cache::{DiskCache, DiskEntry, DiskStore, MemoryCache, MemoryEntry};
use crate::clock::{SharedClock, system_clock};
use crate::codec::Codec;
use crate::config::StrataConfig;
use crate::core::{CacheKey, Envelope, FetchError, Result, Source, StrataError};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Which tiers an operation writes to, and evicts from on failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Persist {
    pub disk: bool,
    pub memory: bool,
}

impl Persist {
    pub const ALL: Persist = Persist {
        disk: true,
        memory: true,
    };
    pub const MEMORY_ONLY: Persist = Persist {
        disk: false,
        memory: true,
    };
    pub const DISK_ONLY: Persist = Persist {
        disk: true,
        memory: false,
    };
    pub const NONE: Persist = Persist {
        disk: false,
        memory: false,
    };
}

impl Default for Persist {
    fn default() -> Self {
        Self::ALL
    }
}

/// Soft-TTL state of a disk entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Nothing stored for the key
    Missing,
    /// Before the soft TTL
    Fresh,
    /// Past the soft TTL but before the hard TTL: usable, due for refresh
    Stale,
    /// Past the hard TTL
    Expired,
}

/// Caches and clock shared by every repository of a process
///
/// Cloning shares the underlying storage, so an access failure seen by one
/// repository clears entries written by all of them.
#[derive(Clone)]
pub struct CacheContext {
    memory: MemoryCache,
    disk: Arc<dyn DiskStore>,
    clock: SharedClock,
}

impl CacheContext {
    pub fn new(memory: MemoryCache, disk: Arc<dyn DiskStore>, clock: SharedClock) -> Self {
        Self {
            memory,
            disk,
            clock,
        }
    }

    /// Build the default tiers from configuration, on the system clock
    pub async fn open(config: &StrataConfig) -> Result<Self> {
        config.validate()?;
        let clock = system_clock();
        let memory = MemoryCache::new(config.to_memory_config(), clock.clone());
        let disk = DiskCache::open(config.to_disk_config(), clock.clone()).await?;
        Ok(Self::new(memory, Arc::new(disk), clock))
    }

    pub fn memory(&self) -> &MemoryCache {
        &self.memory
    }

    pub fn disk(&self) -> &Arc<dyn DiskStore> {
        &self.disk
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }
}

/// Three-tier repository for one resource type
pub struct Repository<R: Resource, C> {
    resource: R,
    codec: C,
    ctx: CacheContext,
}

impl<R, C> Repository<R, C>
where
    R: Resource,
    C: Codec<R::Value>,
{
    pub fn new(resource: R, codec: C, ctx: CacheContext) -> Self {
        Self {
            resource,
            codec,
            ctx,
        }
    }

    pub fn resource(&self) -> &R {
        &self.resource
    }

    pub fn context(&self) -> &CacheContext {
        &self.ctx
    }

    /// Cache slot used for `query`
    pub fn key(&self, query: &R::Query) -> CacheKey {
        self.resource.key(query)
    }

    /// Primary read path: memory, then disk, then a single network attempt
    ///
    /// `Err` is reserved for storage faults; misses, stale data and network
    /// errors all come back as a [`Source`].
    pub async fn get(&self, query: &R::Query) -> Result<Source<R::Value>> {
        let key = self.key(query);

        let cached = self.stream_key(&key, true);
        if cached.is_success() {
            debug!("get {}: served from memory", key);
            return Ok(cached);
        }

        let loaded = self.load_key(&key).await?;
        if loaded.is_success() {
            debug!("get {}: served from disk", key);
            return Ok(loaded);
        }

        debug!("get {}: fetching from network", key);
        self.fetch_key(query, &key, Persist::ALL).await
    }

    /// Force a network round-trip, persisting into the tiers selected by `persist`
    pub async fn fetch(&self, query: &R::Query, persist: Persist) -> Result<Source<R::Value>> {
        let key = self.key(query);
        self.fetch_key(query, &key, persist).await
    }

    /// Disk-only lookup; a usable entry is promoted into memory
    ///
    /// Hard-expired, undecodable and irrelevant entries are evicted from
    /// both tiers and reported as `Irrelevant`.
    pub async fn load(&self, query: &R::Query) -> Result<Source<R::Value>> {
        let key = self.key(query);
        self.load_key(&key).await
    }

    /// Memory-only lookup; never touches disk
    pub fn stream(&self, query: &R::Query, evict_expired: bool) -> Source<R::Value> {
        let key = self.key(query);
        self.stream_key(&key, evict_expired)
    }

    /// Resident value or [`StrataError::MissingEntry`]
    pub fn memory(&self, query: &R::Query, evict_expired: bool) -> Result<R::Value> {
        let key = self.key(query);
        self.stream_key(&key, evict_expired)
            .into_value()
            .ok_or_else(|| StrataError::MissingEntry(key.to_string()))
    }

    /// Apply a network result as if it had just been fetched
    ///
    /// A successful envelope goes through the persist policy, a failed one
    /// through the error policy.
    pub async fn persist(
        &self,
        query: &R::Query,
        envelope: Envelope<R::Value>,
        persist: Persist,
    ) -> Result<Source<R::Value>> {
        let key = self.key(query);
        self.apply_envelope(&key, envelope, persist).await
    }

    pub fn evict_memory_cache(&self, query: &R::Query) {
        let key = self.key(query);
        self.ctx.memory.remove(&key);
    }

    /// Remove the disk entry; a storage failure is logged, not returned
    pub async fn evict_disk_cache(&self, query: &R::Query) {
        let key = self.key(query);
        self.evict_disk_key(&key).await;
    }

    /// Soft-TTL state of the disk entry for `query`
    pub async fn freshness(&self, query: &R::Query) -> Result<Freshness> {
        let key = self.key(query);
        let now = self.ctx.clock.now_millis();
        Ok(match self.read_disk(&key).await? {
            None => Freshness::Missing,
            Some(entry) if entry.is_expired_at(now) => Freshness::Expired,
            Some(entry) if entry.is_stale_at(now) => Freshness::Stale,
            Some(_) => Freshness::Fresh,
        })
    }

    /// Serve the disk entry while it is before its soft TTL, otherwise refetch
    pub async fn revalidate(&self, query: &R::Query) -> Result<Source<R::Value>> {
        let key = self.key(query);
        let now = self.ctx.clock.now_millis();

        if let Some(entry) = self.read_disk(&key).await? {
            if !entry.is_stale_at(now) {
                let loaded = self.promote(&key, entry).await;
                if loaded.is_success() {
                    return Ok(loaded);
                }
            } else {
                debug!("revalidate {}: past soft ttl, refreshing", key);
            }
        }

        self.fetch_key(query, &key, Persist::ALL).await
    }

    fn stream_key(&self, key: &CacheKey, evict_expired: bool) -> Source<R::Value> {
        let Some(entry) = self.ctx.memory.get(key, evict_expired) else {
            return Source::Irrelevant;
        };
        match entry.downcast::<R::Value>() {
            Some(value) if self.resource.is_irrelevant(&value) => Source::Irrelevant,
            Some(value) => Source::Success(value.as_ref().clone()),
            None => {
                warn!("Memory entry {} holds a different payload type", key);
                Source::Irrelevant
            }
        }
    }

    /// Disk lookup where a corrupt record counts as a miss and is evicted
    ///
    /// Failures of the medium itself still propagate.
    async fn read_disk(&self, key: &CacheKey) -> Result<Option<DiskEntry>> {
        match self.ctx.disk.get(key).await {
            Ok(entry) => Ok(entry),
            Err(e) if e.is_corrupt_data() => {
                warn!("Disk entry {} is corrupt, evicting: {}", key, e);
                self.evict_both(key).await;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn load_key(&self, key: &CacheKey) -> Result<Source<R::Value>> {
        match self.read_disk(key).await? {
            Some(entry) => Ok(self.promote(key, entry).await),
            None => Ok(Source::Irrelevant),
        }
    }

    async fn promote(&self, key: &CacheKey, entry: DiskEntry) -> Source<R::Value> {
        if entry.is_expired_at(self.ctx.clock.now_millis()) {
            debug!("Disk entry {} expired, evicting", key);
            self.evict_both(key).await;
            return Source::Irrelevant;
        }

        let value = match self.codec.decode(entry.data()) {
            Ok(value) => value,
            Err(e) => {
                warn!("Disk entry {} is undecodable, evicting: {}", key, e);
                self.evict_both(key).await;
                return Source::Irrelevant;
            }
        };

        if self.resource.is_irrelevant(&value) {
            debug!("Disk entry {} is irrelevant, evicting", key);
            self.evict_both(key).await;
            return Source::Irrelevant;
        }

        self.ctx
            .memory
            .put(key.clone(), MemoryEntry::new(value.clone(), entry.ttl()));
        Source::Success(value)
    }

    async fn fetch_key(
        &self,
        query: &R::Query,
        key: &CacheKey,
        persist: Persist,
    ) -> Result<Source<R::Value>> {
        let envelope = self.resource.dispatch(query).await;
        self.apply_envelope(key, envelope, persist).await
    }

    async fn apply_envelope(
        &self,
        key: &CacheKey,
        envelope: Envelope<R::Value>,
        persist: Persist,
    ) -> Result<Source<R::Value>> {
        match envelope.into_result() {
            Ok(value) => self.persist_value(key, value, persist).await,
            Err(error) => Ok(self.handle_error(key, error, persist).await),
        }
    }

    async fn persist_value(
        &self,
        key: &CacheKey,
        value: R::Value,
        persist: Persist,
    ) -> Result<Source<R::Value>> {
        if self.resource.is_irrelevant(&value) {
            debug!("Fetched payload for {} is irrelevant, evicting", key);
            if persist.disk {
                self.evict_disk_key(key).await;
            }
            if persist.memory {
                self.ctx.memory.remove(key);
            }
            return Ok(Source::Irrelevant);
        }

        let now = self.ctx.clock.now_millis();
        let unit = self.resource.time_unit();
        let ttl = now.saturating_add(unit.to_millis(self.resource.ttl()));
        let soft_ttl = now.saturating_add(unit.to_millis(self.resource.soft_ttl()));
        assert!(ttl > now, "ttl must lie in the future (ttl={ttl}, now={now})");
        assert!(soft_ttl > now, "soft ttl must lie in the future (soft_ttl={soft_ttl}, now={now})");
        assert!(ttl >= soft_ttl, "soft ttl {soft_ttl} must not exceed ttl {ttl}");

        if persist.disk {
            let bytes = self.codec.encode(&value)?;
            self.ctx
                .disk
                .put(key, DiskEntry::new(bytes, ttl, soft_ttl)?)
                .await?;
        } else {
            self.evict_disk_key(key).await;
        }

        if persist.memory {
            self.ctx
                .memory
                .put(key.clone(), MemoryEntry::new(value.clone(), ttl));
        } else {
            self.ctx.memory.remove(key);
        }

        debug!("Persisted {} (ttl={}, soft_ttl={}, {:?})", key, ttl, soft_ttl, persist);
        Ok(Source::Success(value))
    }

    async fn handle_error(
        &self,
        key: &CacheKey,
        error: FetchError,
        persist: Persist,
    ) -> Source<R::Value> {
        if self.resource.is_access_failure(&error) {
            info!("Access failure for {} ({}), evicting all cached entries", key, error);
            self.ctx.memory.evict_all();
            if let Err(e) = self.ctx.disk.evict_all().await {
                warn!("Failed to clear disk cache after access failure: {}", e);
            }
        } else {
            debug!("Fetch failed for {} ({}), evicting key", key, error);
            if persist.disk {
                self.evict_disk_key(key).await;
            }
            if persist.memory {
                self.ctx.memory.remove(key);
            }
        }
        Source::Failure(error)
    }

    async fn evict_both(&self, key: &CacheKey) {
        self.ctx.memory.remove(key);
        self.evict_disk_key(key).await;
    }

    async fn evict_disk_key(&self, key: &CacheKey) {
        if let Err(e) = self.ctx.disk.remove(key).await {
            warn!("Failed to evict disk entry {}: {}", key, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryConfig;
    use crate::clock::ManualClock;
    use crate::codec::BincodeCodec;
    use crate::core::TimeUnit;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::{HashMap, VecDeque};

    /// In-memory disk store that can be told to fail
    #[derive(Default)]
    struct FlakyStore {
        entries: Mutex<HashMap<CacheKey, DiskEntry>>,
        fail_reads: bool,
        fail_removes: bool,
    }

    #[async_trait]
    impl DiskStore for FlakyStore {
        async fn get(&self, key: &CacheKey) -> Result<Option<DiskEntry>> {
            if self.fail_reads {
                return Err(std::io::Error::other("read failed").into());
            }
            Ok(self.entries.lock().get(key).cloned())
        }

        async fn put(&self, key: &CacheKey, entry: DiskEntry) -> Result<()> {
            self.entries.lock().insert(key.clone(), entry);
            Ok(())
        }

        async fn remove(&self, key: &CacheKey) -> Result<bool> {
            if self.fail_removes {
                return Err(std::io::Error::other("remove failed").into());
            }
            Ok(self.entries.lock().remove(key).is_some())
        }

        async fn evict_all(&self) -> Result<usize> {
            let mut entries = self.entries.lock();
            let count = entries.len();
            entries.clear();
            Ok(count)
        }
    }

    struct Scripted {
        responses: Mutex<VecDeque<Envelope<Vec<String>>>>,
        ttl: u64,
        soft_ttl: u64,
    }

    impl Scripted {
        fn new(responses: Vec<Envelope<Vec<String>>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                ttl: DEFAULT_TTL,
                soft_ttl: DEFAULT_TTL,
            }
        }
    }

    #[async_trait]
    impl Resource for Scripted {
        type Query = ();
        type Value = Vec<String>;

        fn ttl(&self) -> u64 {
            self.ttl
        }

        fn soft_ttl(&self) -> u64 {
            self.soft_ttl
        }

        fn time_unit(&self) -> TimeUnit {
            TimeUnit::Minutes
        }

        fn is_irrelevant(&self, value: &Vec<String>) -> bool {
            value.is_empty()
        }

        async fn dispatch(&self, _query: &()) -> Envelope<Vec<String>> {
            self.responses
                .lock()
                .pop_front()
                .unwrap_or_else(|| Envelope::failed(500, "no scripted response"))
        }
    }

    fn context(store: FlakyStore) -> (CacheContext, Arc<FlakyStore>) {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let store = Arc::new(store);
        let memory = MemoryCache::new(MemoryConfig::default(), clock.clone());
        (CacheContext::new(memory, store.clone(), clock), store)
    }

    fn repo(
        resource: Scripted,
        ctx: CacheContext,
    ) -> Repository<Scripted, BincodeCodec<Vec<String>>> {
        Repository::new(resource, BincodeCodec::new(), ctx)
    }

    #[tokio::test]
    async fn test_disk_read_failure_propagates() {
        let (ctx, _) = context(FlakyStore {
            fail_reads: true,
            ..Default::default()
        });
        let repo = repo(Scripted::new(vec![Envelope::ok(vec!["a".into()])]), ctx);

        let err = repo.get(&()).await.unwrap_err();
        assert!(err.is_storage());
    }

    #[tokio::test]
    async fn test_remove_failure_is_swallowed() {
        let (ctx, _) = context(FlakyStore {
            fail_removes: true,
            ..Default::default()
        });
        let repo = repo(Scripted::new(vec![Envelope::failed(503, "unavailable")]), ctx);

        let result = repo.fetch(&(), Persist::ALL).await.unwrap();
        assert_eq!(result.error().map(|e| e.code()), Some(503));

        repo.evict_disk_cache(&()).await;
    }

    #[tokio::test]
    async fn test_memory_accessor_fails_when_absent() {
        let (ctx, _) = context(FlakyStore::default());
        let repo = repo(Scripted::new(vec![Envelope::ok(vec!["v".into()])]), ctx);

        assert!(matches!(
            repo.memory(&(), false),
            Err(StrataError::MissingEntry(_))
        ));

        repo.fetch(&(), Persist::MEMORY_ONLY).await.unwrap();
        assert_eq!(repo.memory(&(), false).unwrap(), vec!["v".to_string()]);
    }

    #[tokio::test]
    async fn test_persist_without_disk_evicts_disk_slot() {
        let (ctx, store) = context(FlakyStore::default());
        let repo = repo(
            Scripted::new(vec![
                Envelope::ok(vec!["first".into()]),
                Envelope::ok(vec!["second".into()]),
            ]),
            ctx,
        );

        repo.fetch(&(), Persist::ALL).await.unwrap();
        assert_eq!(store.entries.lock().len(), 1);

        repo.fetch(&(), Persist::MEMORY_ONLY).await.unwrap();
        assert!(store.entries.lock().is_empty());
        assert_eq!(repo.memory(&(), false).unwrap(), vec!["second".to_string()]);
    }

    #[tokio::test]
    async fn test_successful_envelope_without_payload_is_failure() {
        let (ctx, _) = context(FlakyStore::default());
        let repo = repo(Scripted::new(vec![]), ctx);

        let envelope: Envelope<Vec<String>> =
            serde_json::from_str(r#"{"success":true,"payload":null,"code":0,"message":null}"#)
                .unwrap();
        let result = repo.persist(&(), envelope, Persist::ALL).await.unwrap();
        assert!(result.is_failure());
    }

    #[tokio::test]
    #[should_panic(expected = "must not exceed ttl")]
    async fn test_soft_ttl_after_ttl_panics() {
        let (ctx, _) = context(FlakyStore::default());
        let mut resource = Scripted::new(vec![Envelope::ok(vec!["v".into()])]);
        resource.ttl = 5;
        resource.soft_ttl = 6;
        let repo = repo(resource, ctx);

        let _ = repo.fetch(&(), Persist::ALL).await;
    }

    #[tokio::test]
    #[should_panic(expected = "ttl must lie in the future")]
    async fn test_zero_ttl_panics() {
        let (ctx, _) = context(FlakyStore::default());
        let mut resource = Scripted::new(vec![Envelope::ok(vec!["v".into()])]);
        resource.ttl = 0;
        resource.soft_ttl = 0;
        let repo = repo(resource, ctx);

        let _ = repo.fetch(&(), Persist::ALL).await;
    }
}
