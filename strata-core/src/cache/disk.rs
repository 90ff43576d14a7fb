//! Disk Cache
//!
//! Durable key to bytes store with hard and soft TTLs per entry.
//!
//! Entries live in a single append-only data file. Every mutation is a
//! framed record:
//! - size (u64, big endian)
//! - checksum (crc32 of the record bytes)
//! - record (bincode)
//!
//! Removals append tombstones, so the key index can be rebuilt by scanning
//! the file on open. Dead bytes are reclaimed by compaction, which rewrites
//! the live records to a fresh file and renames it into place.

use crate::clock::SharedClock;
use crate::compression::{CompressionAlgorithm, CompressionConfig, Compressor};
use crate::core::{CacheKey, Result, StrataError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const DATA_FILE: &str = "cache.dat";
const COMPACT_FILE: &str = "cache.dat.compact";
const HEADER_LEN: u64 = 12;
/// Files smaller than this are never compacted
const MIN_COMPACTION_BYTES: u64 = 64 * 1024;

/// Disk cache entry
///
/// `soft_ttl <= ttl` holds for every constructed entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskEntry {
    data: Vec<u8>,
    ttl: u64,
    soft_ttl: u64,
}

impl DiskEntry {
    pub fn new(data: Vec<u8>, ttl: u64, soft_ttl: u64) -> Result<Self> {
        if soft_ttl > ttl {
            return Err(StrataError::InvalidTtl(format!(
                "soft ttl {} is later than hard ttl {}",
                soft_ttl, ttl
            )));
        }
        Ok(Self {
            data,
            ttl,
            soft_ttl,
        })
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// Hard expiry in epoch millis
    pub fn ttl(&self) -> u64 {
        self.ttl
    }

    /// Soft expiry in epoch millis
    pub fn soft_ttl(&self) -> u64 {
        self.soft_ttl
    }

    pub fn is_expired_at(&self, now: u64) -> bool {
        now >= self.ttl
    }

    /// Past the soft TTL: still usable but due for a refresh
    pub fn is_stale_at(&self, now: u64) -> bool {
        now >= self.soft_ttl
    }
}

/// Durable storage behind the repository's second tier
#[async_trait]
pub trait DiskStore: Send + Sync {
    async fn get(&self, key: &CacheKey) -> Result<Option<DiskEntry>>;

    async fn put(&self, key: &CacheKey, entry: DiskEntry) -> Result<()>;

    /// Remove one entry, returning whether it was present
    async fn remove(&self, key: &CacheKey) -> Result<bool>;

    /// Remove every entry, returning how many were present
    async fn evict_all(&self) -> Result<usize>;
}

/// Disk cache configuration
#[derive(Debug, Clone)]
pub struct DiskCacheConfig {
    pub directory: PathBuf,
    pub max_size_mb: usize,
    pub max_entries: usize,
    /// Compact once dead bytes exceed this fraction of the data file
    pub compaction_ratio: f64,
    /// fsync after every write
    pub fsync: bool,
    pub compression: CompressionConfig,
}

impl Default for DiskCacheConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("./data/cache/disk"),
            max_size_mb: 1024, // 1GB default
            max_entries: 100_000,
            compaction_ratio: 0.5,
            fsync: false,
            compression: CompressionConfig::default(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
enum Record {
    Put {
        key: CacheKey,
        ttl: u64,
        soft_ttl: u64,
        compression: CompressionAlgorithm,
        data: Vec<u8>,
    },
    Remove {
        key: CacheKey,
    },
}

#[derive(Debug, Clone, Copy)]
struct IndexEntry {
    /// Start of the frame in the data file
    offset: u64,
    /// Frame length including header
    len: u64,
    ttl: u64,
    soft_ttl: u64,
}

struct LogState {
    file: File,
    index: HashMap<CacheKey, IndexEntry>,
    end_offset: u64,
    live_bytes: u64,
}

impl LogState {
    async fn append(&mut self, frame: &[u8], fsync: bool) -> Result<u64> {
        let offset = self.end_offset;
        self.file.seek(SeekFrom::Start(offset)).await?;
        self.file.write_all(frame).await?;
        self.file.flush().await?;
        if fsync {
            self.file.sync_data().await?;
        }
        self.end_offset += frame.len() as u64;
        Ok(offset)
    }

    async fn read_frame(&mut self, entry: &IndexEntry) -> Result<Vec<u8>> {
        self.file.seek(SeekFrom::Start(entry.offset)).await?;
        let mut frame = vec![0u8; entry.len as usize];
        self.file.read_exact(&mut frame).await?;
        Ok(frame)
    }

    fn dead_bytes(&self) -> u64 {
        self.end_offset.saturating_sub(self.live_bytes)
    }

    fn forget(&mut self, key: &CacheKey) -> Option<IndexEntry> {
        let removed = self.index.remove(key);
        if let Some(entry) = &removed {
            self.live_bytes = self.live_bytes.saturating_sub(entry.len);
        }
        removed
    }
}

/// Metadata of one stored entry
#[derive(Debug, Clone, Serialize)]
pub struct DiskEntryInfo {
    pub key: CacheKey,
    pub ttl: u64,
    pub soft_ttl: u64,
    pub size_bytes: u64,
}

/// Disk cache statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskCacheStats {
    pub entries: usize,
    pub expired_entries: usize,
    pub live_bytes: u64,
    pub file_bytes: u64,
    pub dead_bytes: u64,
    pub capacity_mb: usize,
    pub utilization: f64,
}

/// File-backed [`DiskStore`]
pub struct DiskCache {
    config: DiskCacheConfig,
    data_path: PathBuf,
    state: Mutex<LogState>,
    compressor: Compressor,
    clock: SharedClock,
}

impl DiskCache {
    /// Create or open a disk cache, rebuilding the index from the data file
    pub async fn open(config: DiskCacheConfig, clock: SharedClock) -> Result<Self> {
        tokio::fs::create_dir_all(&config.directory).await?;
        let data_path = config.directory.join(DATA_FILE);

        let (index, end_offset) = Self::scan(&data_path).await?;
        let file = open_data_file(&data_path).await?;
        if file.metadata().await?.len() > end_offset {
            warn!("Truncating torn tail of {:?} at offset {}", data_path, end_offset);
            file.set_len(end_offset).await?;
        }

        let live_bytes = index.values().map(|e| e.len).sum();
        info!(
            "Disk cache opened at {:?}: {} entries, {} bytes",
            data_path,
            index.len(),
            end_offset
        );

        Ok(Self {
            compressor: Compressor::new(config.compression.clone()),
            config,
            data_path,
            state: Mutex::new(LogState {
                file,
                index,
                end_offset,
                live_bytes,
            }),
            clock,
        })
    }

    /// Replay the data file, returning the index and the end of the last valid frame
    async fn scan(path: &Path) -> Result<(HashMap<CacheKey, IndexEntry>, u64)> {
        let mut index = HashMap::new();
        let file = match File::open(path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((index, 0)),
            Err(e) => return Err(e.into()),
        };
        let file_len = file.metadata().await?.len();
        let mut reader = BufReader::new(file);
        let mut offset = 0u64;

        loop {
            let size = match reader.read_u64().await {
                Ok(s) => s,
                Err(_) => break, // EOF
            };
            let checksum_expected = match reader.read_u32().await {
                Ok(c) => c,
                Err(_) => {
                    warn!("Incomplete disk cache record header at offset {}", offset);
                    break;
                }
            };
            // `size` is untrusted; compare without adding to it
            if size > file_len.saturating_sub(offset + HEADER_LEN) {
                warn!("Incomplete disk cache record at offset {}", offset);
                break;
            }

            let mut data = vec![0u8; size as usize];
            if reader.read_exact(&mut data).await.is_err() {
                warn!("Incomplete disk cache record data at offset {}", offset);
                break;
            }
            let frame_len = HEADER_LEN + size;

            let checksum_actual = crc32fast::hash(&data);
            if checksum_actual != checksum_expected {
                warn!(
                    "Skipping record at offset {}: checksum mismatch (expected {}, got {})",
                    offset, checksum_expected, checksum_actual
                );
                // An older Put for the same key must not come back in its place
                if let Ok(Record::Put { key, .. } | Record::Remove { key }) = decode_record(&data) {
                    if index.remove(&key).is_some() {
                        warn!("Dropping {} after its newest record failed the checksum", key);
                    }
                }
                offset += frame_len;
                continue;
            }

            match decode_record(&data) {
                Ok(Record::Put {
                    key, ttl, soft_ttl, ..
                }) => {
                    index.insert(
                        key,
                        IndexEntry {
                            offset,
                            len: frame_len,
                            ttl,
                            soft_ttl,
                        },
                    );
                }
                Ok(Record::Remove { key }) => {
                    index.remove(&key);
                }
                Err(e) => {
                    warn!("Skipping undecodable record at offset {}: {}", offset, e);
                }
            }
            offset += frame_len;
        }

        Ok((index, offset))
    }

    /// Remove every entry past its hard TTL
    pub async fn purge_expired(&self) -> Result<usize> {
        let now = self.clock.now_millis();
        let mut state = self.state.lock().await;

        let expired: Vec<CacheKey> = state
            .index
            .iter()
            .filter(|(_, e)| now >= e.ttl)
            .map(|(k, _)| k.clone())
            .collect();

        for key in &expired {
            self.remove_locked(&mut state, key).await?;
        }
        if !expired.is_empty() {
            info!("Purged {} expired disk entries", expired.len());
            self.maybe_compact(&mut state).await?;
        }
        Ok(expired.len())
    }

    /// Rewrite live records into a fresh data file
    pub async fn compact(&self) -> Result<u64> {
        let mut state = self.state.lock().await;
        self.compact_locked(&mut state).await
    }

    /// Metadata of every stored entry, ordered by key
    pub async fn entries(&self) -> Vec<DiskEntryInfo> {
        let state = self.state.lock().await;
        let mut entries: Vec<DiskEntryInfo> = state
            .index
            .iter()
            .map(|(key, e)| DiskEntryInfo {
                key: key.clone(),
                ttl: e.ttl,
                soft_ttl: e.soft_ttl,
                size_bytes: e.len,
            })
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        entries
    }

    pub async fn stats(&self) -> DiskCacheStats {
        let now = self.clock.now_millis();
        let state = self.state.lock().await;
        let capacity_bytes = self.max_bytes();

        DiskCacheStats {
            entries: state.index.len(),
            expired_entries: state.index.values().filter(|e| now >= e.ttl).count(),
            live_bytes: state.live_bytes,
            file_bytes: state.end_offset,
            dead_bytes: state.dead_bytes(),
            capacity_mb: self.config.max_size_mb,
            utilization: if capacity_bytes == 0 {
                0.0
            } else {
                (state.live_bytes as f64 / capacity_bytes as f64) * 100.0
            },
        }
    }

    pub fn directory(&self) -> &Path {
        &self.config.directory
    }

    fn max_bytes(&self) -> u64 {
        (self.config.max_size_mb as u64).saturating_mul(1024 * 1024)
    }

    async fn remove_locked(&self, state: &mut LogState, key: &CacheKey) -> Result<bool> {
        if !state.index.contains_key(key) {
            return Ok(false);
        }
        let frame = encode_frame(&Record::Remove { key: key.clone() })?;
        state.append(&frame, self.config.fsync).await?;
        state.forget(key);
        debug!("Disk cache DELETE: {}", key);
        Ok(true)
    }

    /// Evict the entries closest to hard expiry until `incoming` bytes fit
    async fn make_room(&self, state: &mut LogState, key: &CacheKey, incoming: u64) -> Result<()> {
        let max_bytes = self.max_bytes();
        let max_entries = self.config.max_entries.max(1);

        loop {
            let replaced = state.index.get(key).map(|e| e.len);
            let other_entries = state.index.len() - usize::from(replaced.is_some());
            let other_bytes = state.live_bytes - replaced.unwrap_or(0);
            if other_entries < max_entries && other_bytes + incoming <= max_bytes {
                return Ok(());
            }

            let victim = state
                .index
                .iter()
                .filter(|(k, _)| *k != key)
                .min_by_key(|(_, e)| e.ttl)
                .map(|(k, _)| k.clone());
            let Some(victim) = victim else {
                warn!("Disk cache entry {} exceeds capacity on its own", key);
                return Ok(());
            };
            debug!("Disk cache EVICT (capacity): {}", victim);
            self.remove_locked(state, &victim).await?;
        }
    }

    async fn maybe_compact(&self, state: &mut LogState) -> Result<()> {
        let dead = state.dead_bytes();
        if state.end_offset >= MIN_COMPACTION_BYTES
            && dead as f64 > state.end_offset as f64 * self.config.compaction_ratio
        {
            self.compact_locked(state).await?;
        }
        Ok(())
    }

    async fn compact_locked(&self, state: &mut LogState) -> Result<u64> {
        let before = state.end_offset;
        let compact_path = self.config.directory.join(COMPACT_FILE);
        let out = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&compact_path)
            .await?;
        let mut writer = BufWriter::new(out);

        let mut live: Vec<(CacheKey, IndexEntry)> = state
            .index
            .iter()
            .map(|(k, e)| (k.clone(), *e))
            .collect();
        live.sort_by_key(|(_, e)| e.offset);

        let mut index = HashMap::with_capacity(live.len());
        let mut offset = 0u64;
        for (key, entry) in live {
            let frame = state.read_frame(&entry).await?;
            writer.write_all(&frame).await?;
            index.insert(key, IndexEntry { offset, ..entry });
            offset += entry.len;
        }

        writer.flush().await?;
        writer.get_ref().sync_all().await?;
        drop(writer);

        // Atomic rename
        tokio::fs::rename(&compact_path, &self.data_path).await?;
        state.file = open_data_file(&self.data_path).await?;
        state.index = index;
        state.end_offset = offset;
        state.live_bytes = offset;

        let reclaimed = before.saturating_sub(offset);
        info!("Disk cache compacted: {} → {} bytes", before, offset);
        Ok(reclaimed)
    }
}

#[async_trait]
impl DiskStore for DiskCache {
    async fn get(&self, key: &CacheKey) -> Result<Option<DiskEntry>> {
        let mut state = self.state.lock().await;
        let Some(entry) = state.index.get(key).copied() else {
            debug!("Disk cache MISS for key: {}", key);
            return Ok(None);
        };

        let frame = state.read_frame(&entry).await?;
        drop(state);

        let body = &frame[HEADER_LEN as usize..];
        let checksum_expected = u32::from_be_bytes([frame[8], frame[9], frame[10], frame[11]]);
        let checksum_actual = crc32fast::hash(body);
        if checksum_actual != checksum_expected {
            return Err(StrataError::ChecksumMismatch {
                expected: checksum_expected,
                actual: checksum_actual,
            });
        }

        match decode_record(body) {
            Ok(Record::Put {
                key: stored_key,
                ttl,
                soft_ttl,
                compression,
                data,
            }) if &stored_key == key => {
                let data = self.compressor.decompress(&data, compression)?;
                debug!("Disk cache HIT for key: {}", key);
                Ok(Some(DiskEntry::new(data, ttl, soft_ttl)?))
            }
            Ok(_) => Err(StrataError::CorruptRecord {
                offset: entry.offset,
                reason: format!("index points at a foreign record for {}", key),
            }),
            Err(e) => Err(StrataError::CorruptRecord {
                offset: entry.offset,
                reason: e.to_string(),
            }),
        }
    }

    async fn put(&self, key: &CacheKey, entry: DiskEntry) -> Result<()> {
        let ttl = entry.ttl;
        let soft_ttl = entry.soft_ttl;
        let (data, compression) = self.compressor.compress(&entry.data)?;
        let frame = encode_frame(&Record::Put {
            key: key.clone(),
            ttl,
            soft_ttl,
            compression,
            data,
        })?;
        let len = frame.len() as u64;

        let mut state = self.state.lock().await;
        self.make_room(&mut state, key, len).await?;

        let offset = state.append(&frame, self.config.fsync).await?;
        state.forget(key);
        state.index.insert(
            key.clone(),
            IndexEntry {
                offset,
                len,
                ttl,
                soft_ttl,
            },
        );
        state.live_bytes += len;
        debug!("Disk cache PUT: {} ({} bytes, ttl={})", key, len, ttl);

        self.maybe_compact(&mut state).await
    }

    async fn remove(&self, key: &CacheKey) -> Result<bool> {
        let mut state = self.state.lock().await;
        let removed = self.remove_locked(&mut state, key).await?;
        if removed {
            self.maybe_compact(&mut state).await?;
        }
        Ok(removed)
    }

    async fn evict_all(&self) -> Result<usize> {
        let mut state = self.state.lock().await;
        let count = state.index.len();

        state.file.set_len(0).await?;
        state.file.sync_all().await?;
        state.index.clear();
        state.end_offset = 0;
        state.live_bytes = 0;

        info!("Disk cache EVICT ALL ({} entries)", count);
        Ok(count)
    }
}

async fn open_data_file(path: &Path) -> Result<File> {
    Ok(OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(path)
        .await?)
}

fn encode_frame(record: &Record) -> Result<Vec<u8>> {
    let data = bincode::serde::encode_to_vec(record, bincode::config::standard())?;
    let checksum = crc32fast::hash(&data);

    let mut frame = Vec::with_capacity(HEADER_LEN as usize + data.len());
    frame.extend_from_slice(&(data.len() as u64).to_be_bytes());
    frame.extend_from_slice(&checksum.to_be_bytes());
    frame.extend_from_slice(&data);
    Ok(frame)
}

fn decode_record(data: &[u8]) -> Result<Record> {
    let (record, _) = bincode::serde::decode_from_slice(data, bincode::config::standard())?;
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::Arc;
    use tempfile::tempdir;

    const MINUTE: u64 = 60_000;

    fn config(dir: &Path) -> DiskCacheConfig {
        DiskCacheConfig {
            directory: dir.to_path_buf(),
            max_size_mb: 10,
            max_entries: 1000,
            ..Default::default()
        }
    }

    fn entry(data: &[u8], ttl: u64) -> DiskEntry {
        DiskEntry::new(data.to_vec(), ttl, ttl).unwrap()
    }

    fn key(s: &str) -> CacheKey {
        CacheKey::from(s)
    }

    #[test]
    fn test_entry_rejects_soft_ttl_after_ttl() {
        assert!(DiskEntry::new(vec![], 10, 11).is_err());
        let e = DiskEntry::new(vec![], 10, 5).unwrap();
        assert!(e.is_stale_at(5));
        assert!(!e.is_expired_at(9));
        assert!(e.is_expired_at(10));
    }

    #[tokio::test]
    async fn test_disk_cache_basic() {
        let dir = tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(0));
        let cache = DiskCache::open(config(dir.path()), clock).await.unwrap();

        cache.put(&key("key1"), entry(b"value1", MINUTE)).await.unwrap();
        cache.put(&key("key2"), entry(b"value2", MINUTE)).await.unwrap();

        let val1 = cache.get(&key("key1")).await.unwrap().unwrap();
        assert_eq!(val1.data(), b"value1");
        assert_eq!(val1.ttl(), MINUTE);

        assert!(cache.get(&key("missing")).await.unwrap().is_none());
        assert_eq!(cache.stats().await.entries, 2);
    }

    #[tokio::test]
    async fn test_overwrite_and_remove() {
        let dir = tempdir().unwrap();
        let cache = DiskCache::open(config(dir.path()), Arc::new(ManualClock::new(0)))
            .await
            .unwrap();

        cache.put(&key("k"), entry(b"v1", MINUTE)).await.unwrap();
        cache.put(&key("k"), entry(b"v2", MINUTE)).await.unwrap();
        assert_eq!(cache.get(&key("k")).await.unwrap().unwrap().data(), b"v2");

        assert!(cache.remove(&key("k")).await.unwrap());
        assert!(!cache.remove(&key("k")).await.unwrap());
        assert!(cache.get(&key("k")).await.unwrap().is_none());

        let stats = cache.stats().await;
        assert_eq!(stats.entries, 0);
        assert!(stats.dead_bytes > 0);
    }

    #[tokio::test]
    async fn test_reopen_rebuilds_index() {
        let dir = tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(0));
        {
            let cache = DiskCache::open(config(dir.path()), clock.clone()).await.unwrap();
            cache.put(&key("kept"), entry(b"a", MINUTE)).await.unwrap();
            cache.put(&key("dropped"), entry(b"b", MINUTE)).await.unwrap();
            cache
                .put(&key("soft"), DiskEntry::new(b"c".to_vec(), 2 * MINUTE, MINUTE).unwrap())
                .await
                .unwrap();
            cache.remove(&key("dropped")).await.unwrap();
        }

        let cache = DiskCache::open(config(dir.path()), clock).await.unwrap();
        assert_eq!(cache.get(&key("kept")).await.unwrap().unwrap().data(), b"a");
        assert!(cache.get(&key("dropped")).await.unwrap().is_none());

        let soft = cache.get(&key("soft")).await.unwrap().unwrap();
        assert_eq!(soft.ttl(), 2 * MINUTE);
        assert_eq!(soft.soft_ttl(), MINUTE);
    }

    #[tokio::test]
    async fn test_torn_tail_is_truncated() {
        let dir = tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(0));
        {
            let cache = DiskCache::open(config(dir.path()), clock.clone()).await.unwrap();
            cache.put(&key("k"), entry(b"value", MINUTE)).await.unwrap();
        }

        // Simulate a crash mid-write: header promising more bytes than exist
        let path = dir.path().join(DATA_FILE);
        let mut bytes = std::fs::read(&path).unwrap();
        let good_len = bytes.len() as u64;
        bytes.extend_from_slice(&100u64.to_be_bytes());
        bytes.extend_from_slice(&[0, 0, 0, 0, 1, 2]);
        std::fs::write(&path, bytes).unwrap();

        let cache = DiskCache::open(config(dir.path()), clock).await.unwrap();
        assert_eq!(cache.get(&key("k")).await.unwrap().unwrap().data(), b"value");
        assert_eq!(std::fs::metadata(&path).unwrap().len(), good_len);

        cache.put(&key("after"), entry(b"x", MINUTE)).await.unwrap();
        assert_eq!(cache.get(&key("after")).await.unwrap().unwrap().data(), b"x");
    }

    #[tokio::test]
    async fn test_oversized_length_header_is_truncated() {
        let dir = tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(0));
        {
            let cache = DiskCache::open(config(dir.path()), clock.clone()).await.unwrap();
            cache.put(&key("k"), entry(b"value", MINUTE)).await.unwrap();
        }

        let path = dir.path().join(DATA_FILE);
        let mut bytes = std::fs::read(&path).unwrap();
        let good_len = bytes.len() as u64;
        bytes.extend_from_slice(&(u64::MAX - 4).to_be_bytes());
        bytes.extend_from_slice(&[0, 0, 0, 0, 9, 9, 9]);
        std::fs::write(&path, bytes).unwrap();

        let cache = DiskCache::open(config(dir.path()), clock).await.unwrap();
        assert_eq!(cache.get(&key("k")).await.unwrap().unwrap().data(), b"value");
        assert_eq!(std::fs::metadata(&path).unwrap().len(), good_len);
    }

    #[tokio::test]
    async fn test_oversized_first_header_opens_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(DATA_FILE);
        let mut bytes = (u64::MAX - 4).to_be_bytes().to_vec();
        bytes.extend_from_slice(&[0; 4]);
        std::fs::write(&path, bytes).unwrap();

        let cache = DiskCache::open(config(dir.path()), Arc::new(ManualClock::new(0)))
            .await
            .unwrap();
        assert_eq!(cache.stats().await.entries, 0);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_corrupt_overwrite_does_not_resurrect_older_value() {
        let dir = tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(0));
        {
            let cache = DiskCache::open(config(dir.path()), clock.clone()).await.unwrap();
            cache.put(&key("k"), entry(b"old", MINUTE)).await.unwrap();
            cache.put(&key("k"), entry(b"new", MINUTE)).await.unwrap();
            cache.put(&key("other"), entry(b"kept", MINUTE)).await.unwrap();
        }

        // The payload is the last field of a record, so its final byte can be
        // flipped without breaking decoding. Corrupt the second record.
        let path = dir.path().join(DATA_FILE);
        let mut bytes = std::fs::read(&path).unwrap();
        let first_len = u64::from_be_bytes(bytes[0..8].try_into().unwrap()) as usize;
        let second_start = HEADER_LEN as usize + first_len;
        let second_len =
            u64::from_be_bytes(bytes[second_start..second_start + 8].try_into().unwrap()) as usize;
        bytes[second_start + HEADER_LEN as usize + second_len - 1] ^= 0xFF;
        std::fs::write(&path, bytes).unwrap();

        let cache = DiskCache::open(config(dir.path()), clock).await.unwrap();
        assert!(cache.get(&key("k")).await.unwrap().is_none());
        assert_eq!(cache.get(&key("other")).await.unwrap().unwrap().data(), b"kept");
    }

    #[tokio::test]
    async fn test_corrupt_tombstone_does_not_resurrect_removed_value() {
        let dir = tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(0));
        {
            let cache = DiskCache::open(config(dir.path()), clock.clone()).await.unwrap();
            cache.put(&key("k"), entry(b"gone", MINUTE)).await.unwrap();
            cache.remove(&key("k")).await.unwrap();
        }

        // Flip one checksum bit of the tombstone; its body still decodes
        let path = dir.path().join(DATA_FILE);
        let mut bytes = std::fs::read(&path).unwrap();
        let first_len = u64::from_be_bytes(bytes[0..8].try_into().unwrap()) as usize;
        let tombstone_crc = HEADER_LEN as usize + first_len + 8;
        bytes[tombstone_crc] ^= 0x01;
        std::fs::write(&path, bytes).unwrap();

        let cache = DiskCache::open(config(dir.path()), clock).await.unwrap();
        assert!(cache.get(&key("k")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_checksum_mismatch_skips_record_on_open() {
        let dir = tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(0));
        {
            let cache = DiskCache::open(config(dir.path()), clock.clone()).await.unwrap();
            cache.put(&key("first"), entry(b"aaaa", MINUTE)).await.unwrap();
            cache.put(&key("second"), entry(b"bbbb", MINUTE)).await.unwrap();
        }

        // Flip the last byte of the first record's payload
        let path = dir.path().join(DATA_FILE);
        let mut bytes = std::fs::read(&path).unwrap();
        let first_len = u64::from_be_bytes(bytes[0..8].try_into().unwrap()) as usize;
        bytes[HEADER_LEN as usize + first_len - 1] ^= 0xFF;
        std::fs::write(&path, bytes).unwrap();

        let cache = DiskCache::open(config(dir.path()), clock).await.unwrap();
        assert!(cache.get(&key("first")).await.unwrap().is_none());
        assert_eq!(cache.get(&key("second")).await.unwrap().unwrap().data(), b"bbbb");
    }

    #[tokio::test]
    async fn test_capacity_evicts_closest_to_expiry() {
        let dir = tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.max_entries = 3;
        let cache = DiskCache::open(cfg, Arc::new(ManualClock::new(0))).await.unwrap();

        cache.put(&key("a"), entry(b"1", 3 * MINUTE)).await.unwrap();
        cache.put(&key("b"), entry(b"2", MINUTE)).await.unwrap();
        cache.put(&key("c"), entry(b"3", 2 * MINUTE)).await.unwrap();

        // Overwriting an existing key does not evict
        cache.put(&key("a"), entry(b"1b", 3 * MINUTE)).await.unwrap();
        assert_eq!(cache.stats().await.entries, 3);

        cache.put(&key("d"), entry(b"4", 4 * MINUTE)).await.unwrap();
        assert!(cache.get(&key("b")).await.unwrap().is_none());
        assert!(cache.get(&key("a")).await.unwrap().is_some());
        assert_eq!(cache.stats().await.entries, 3);
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let dir = tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(0));
        let cache = DiskCache::open(config(dir.path()), clock.clone()).await.unwrap();

        cache.put(&key("short"), entry(b"1", MINUTE)).await.unwrap();
        cache.put(&key("long"), entry(b"2", 10 * MINUTE)).await.unwrap();

        clock.set(MINUTE);
        assert_eq!(cache.stats().await.expired_entries, 1);
        assert_eq!(cache.purge_expired().await.unwrap(), 1);
        assert!(cache.get(&key("short")).await.unwrap().is_none());
        assert!(cache.get(&key("long")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_compaction_reclaims_dead_bytes() {
        let dir = tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(0));
        let cache = DiskCache::open(config(dir.path()), clock.clone()).await.unwrap();

        let payload = vec![7u8; 4096];
        for _ in 0..8 {
            cache.put(&key("hot"), entry(&payload, MINUTE)).await.unwrap();
        }
        cache.put(&key("cold"), entry(b"cold", MINUTE)).await.unwrap();

        cache.compact().await.unwrap();
        let stats = cache.stats().await;
        assert_eq!(stats.dead_bytes, 0);
        assert_eq!(stats.file_bytes, stats.live_bytes);

        assert_eq!(cache.get(&key("hot")).await.unwrap().unwrap().data(), &payload[..]);
        drop(cache);

        let reopened = DiskCache::open(config(dir.path()), clock).await.unwrap();
        assert_eq!(reopened.get(&key("cold")).await.unwrap().unwrap().data(), b"cold");
        assert_eq!(reopened.stats().await.entries, 2);
    }

    #[tokio::test]
    async fn test_compressed_entries_round_trip_after_setting_change() {
        let dir = tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(0));
        let payload = b"compressible payload ".repeat(200);
        {
            let mut cfg = config(dir.path());
            cfg.compression = CompressionConfig {
                algorithm: CompressionAlgorithm::Zstd,
                min_payload_size: 16,
                zstd_level: 3,
            };
            let cache = DiskCache::open(cfg, clock.clone()).await.unwrap();
            cache.put(&key("z"), entry(&payload, MINUTE)).await.unwrap();
            assert!(cache.stats().await.live_bytes < payload.len() as u64);
        }

        let cache = DiskCache::open(config(dir.path()), clock).await.unwrap();
        assert_eq!(cache.get(&key("z")).await.unwrap().unwrap().data(), &payload[..]);
    }

    #[tokio::test]
    async fn test_evict_all() {
        let dir = tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(0));
        let cache = DiskCache::open(config(dir.path()), clock.clone()).await.unwrap();

        cache.put(&key("a"), entry(b"1", MINUTE)).await.unwrap();
        cache.put(&key("b"), entry(b"2", MINUTE)).await.unwrap();
        assert_eq!(cache.evict_all().await.unwrap(), 2);
        assert!(cache.get(&key("a")).await.unwrap().is_none());
        drop(cache);

        let reopened = DiskCache::open(config(dir.path()), clock).await.unwrap();
        assert_eq!(reopened.stats().await.entries, 0);
    }
}
