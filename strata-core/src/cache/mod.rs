//! Cache tiers
//!
//! - Memory: process-local values with per-entry expiry and LRU capacity
//! - Disk: durable bytes with hard and soft TTLs

pub mod disk;
pub mod memory;

pub use disk::{DiskCache, DiskCacheConfig, DiskCacheStats, DiskEntry, DiskEntryInfo, DiskStore};
pub use memory::{CachedValue, MemoryCache, MemoryCacheStats, MemoryConfig, MemoryEntry};
