pub mod cache;
pub mod clock;
pub mod codec;
pub mod compression;
pub mod config;
pub mod core;
pub mod logging;
pub mod repository;

// Re-export commonly used types
pub use cache::{
    DiskCache, DiskCacheConfig, DiskCacheStats, DiskEntry, DiskStore, MemoryCache,
    MemoryCacheStats, MemoryConfig, MemoryEntry,
};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use codec::{BincodeCodec, Codec, JsonCodec};
pub use compression::{CompressionAlgorithm, CompressionConfig};
pub use config::StrataConfig;
pub use core::{CacheKey, Envelope, FetchError, Result, Source, StrataError, TimeUnit};
pub use repository::{CacheContext, Freshness, Persist, Repository, Resource};
