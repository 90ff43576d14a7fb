use crate::core::{CacheKey, Envelope, FetchError, TimeUnit};
use async_trait::async_trait;

/// Hard TTL applied when a resource does not override [`Resource::ttl`]
pub const DEFAULT_TTL: u64 = 10;

/// Type-specific behaviour plugged into a [`Repository`](super::Repository)
///
/// Only [`is_irrelevant`](Resource::is_irrelevant) and
/// [`dispatch`](Resource::dispatch) are mandatory. TTLs default to ten
/// minutes with the soft TTL equal to the hard one.
///
/// The default [`key`](Resource::key) depends on the payload type only, so
/// every query of the resource shares one cache slot. Resources that serve
/// several distinct queries must override it, usually with
/// [`CacheKey::scoped`].
#[async_trait]
pub trait Resource: Send + Sync + 'static {
    type Query: Send + Sync;
    type Value: Clone + Send + Sync + 'static;

    /// Hard TTL, in [`time_unit`](Resource::time_unit)s
    fn ttl(&self) -> u64 {
        DEFAULT_TTL
    }

    /// Soft TTL, in [`time_unit`](Resource::time_unit)s; must not exceed the hard TTL
    fn soft_ttl(&self) -> u64 {
        self.ttl()
    }

    fn time_unit(&self) -> TimeUnit {
        TimeUnit::Minutes
    }

    fn key(&self, _query: &Self::Query) -> CacheKey {
        CacheKey::for_type::<Self::Value>()
    }

    /// Whether a retrieved payload is empty or otherwise unusable
    fn is_irrelevant(&self, value: &Self::Value) -> bool;

    /// Perform the remote call. Exactly one attempt; timeouts are the
    /// implementation's concern.
    async fn dispatch(&self, query: &Self::Query) -> Envelope<Self::Value>;

    /// Errors that invalidate trust in every cached entry, not just one key
    fn is_access_failure(&self, _error: &FetchError) -> bool {
        false
    }
}
