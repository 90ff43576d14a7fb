pub mod error;
pub mod types;

pub use error::{Result, StrataError};
pub use types::{CacheKey, Envelope, FetchError, Source, TimeUnit};
