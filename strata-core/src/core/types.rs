use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Outcome of a lookup or fetch
///
/// Exactly one variant is produced per operation. `Irrelevant` covers both
/// absence and data that was retrieved but is unusable.
#[derive(Debug, Clone, PartialEq)]
pub enum Source<R> {
    /// Usable data
    Success(R),
    /// No usable data
    Irrelevant,
    /// The network source reported an error
    Failure(FetchError),
}

impl<R> Source<R> {
    pub fn is_success(&self) -> bool {
        matches!(self, Source::Success(_))
    }

    pub fn is_irrelevant(&self) -> bool {
        matches!(self, Source::Irrelevant)
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Source::Failure(_))
    }

    /// Borrow the value of a `Success`
    pub fn value(&self) -> Option<&R> {
        match self {
            Source::Success(value) => Some(value),
            _ => None,
        }
    }

    /// Take the value of a `Success`
    pub fn into_value(self) -> Option<R> {
        match self {
            Source::Success(value) => Some(value),
            _ => None,
        }
    }

    /// Borrow the error of a `Failure`
    pub fn error(&self) -> Option<&FetchError> {
        match self {
            Source::Failure(error) => Some(error),
            _ => None,
        }
    }

    pub fn map<U, F: FnOnce(R) -> U>(self, f: F) -> Source<U> {
        match self {
            Source::Success(value) => Source::Success(f(value)),
            Source::Irrelevant => Source::Irrelevant,
            Source::Failure(error) => Source::Failure(error),
        }
    }
}

/// Error reported by the network source
///
/// Only ever built from a failed [`Envelope`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchError {
    message: String,
    code: i32,
}

impl FetchError {
    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn code(&self) -> i32 {
        self.code
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}

impl std::error::Error for FetchError {}

/// Result of a single network call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<R> {
    /// Whether the call succeeded
    success: bool,
    /// Response payload (if successful)
    payload: Option<R>,
    /// Error code (if failed)
    code: i32,
    /// Error message (if failed)
    message: Option<String>,
}

impl<R> Envelope<R> {
    /// Create a successful envelope
    pub fn ok(payload: R) -> Self {
        Self {
            success: true,
            payload: Some(payload),
            code: 0,
            message: None,
        }
    }

    /// Create a failed envelope
    pub fn failed(code: i32, message: impl Into<String>) -> Self {
        Self {
            success: false,
            payload: None,
            code,
            message: Some(message.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn payload(&self) -> Option<&R> {
        self.payload.as_ref()
    }

    pub fn code(&self) -> i32 {
        self.code
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Split into the payload or the error it carries
    pub fn into_result(self) -> std::result::Result<R, FetchError> {
        match (self.success, self.payload) {
            (true, Some(payload)) => Ok(payload),
            (true, None) => Err(FetchError {
                message: "successful response without payload".to_string(),
                code: self.code,
            }),
            (false, _) => Err(FetchError {
                message: self.message.unwrap_or_else(|| "Unknown error".to_string()),
                code: self.code,
            }),
        }
    }
}

/// Unit in which a resource expresses its TTLs
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    Milliseconds,
    Seconds,
    #[default]
    Minutes,
    Hours,
    Days,
}

impl TimeUnit {
    /// Convert `amount` of this unit to milliseconds, saturating on overflow
    pub fn to_millis(self, amount: u64) -> u64 {
        let factor: u64 = match self {
            TimeUnit::Milliseconds => 1,
            TimeUnit::Seconds => 1_000,
            TimeUnit::Minutes => 60_000,
            TimeUnit::Hours => 3_600_000,
            TimeUnit::Days => 86_400_000,
        };
        amount.saturating_mul(factor)
    }
}

/// Identifies one slot in both the memory and the disk cache
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Key derived from the payload type alone
    ///
    /// Every query of a resource keyed this way shares one slot.
    pub fn for_type<V: ?Sized>() -> Self {
        Self(digest(std::any::type_name::<V>().as_bytes(), None))
    }

    /// Key derived from the payload type plus a query discriminator
    pub fn scoped<V: ?Sized>(discriminator: &str) -> Self {
        Self(digest(
            std::any::type_name::<V>().as_bytes(),
            Some(discriminator.as_bytes()),
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn digest(descriptor: &[u8], discriminator: Option<&[u8]>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(descriptor);
    if let Some(discriminator) = discriminator {
        hasher.update([0u8]);
        hasher.update(discriminator);
    }
    hex::encode(hasher.finalize())
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CacheKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

impl From<String> for CacheKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_into_result() {
        let ok: Envelope<u32> = Envelope::ok(7);
        assert!(ok.is_success());
        assert_eq!(ok.into_result(), Ok(7));

        let failed: Envelope<u32> = Envelope::failed(401, "unauthorized");
        assert!(!failed.is_success());
        let error = failed.into_result().unwrap_err();
        assert_eq!(error.code(), 401);
        assert_eq!(error.message(), "unauthorized");
    }

    #[test]
    fn test_time_unit_conversion() {
        assert_eq!(TimeUnit::Minutes.to_millis(10), 600_000);
        assert_eq!(TimeUnit::Seconds.to_millis(3), 3_000);
        assert_eq!(TimeUnit::Days.to_millis(1), 86_400_000);
        assert_eq!(TimeUnit::Hours.to_millis(u64::MAX), u64::MAX);
        assert_eq!(TimeUnit::default(), TimeUnit::Minutes);
    }

    #[test]
    fn test_type_key_is_stable() {
        assert_eq!(CacheKey::for_type::<Vec<String>>(), CacheKey::for_type::<Vec<String>>());
        assert_ne!(CacheKey::for_type::<Vec<String>>(), CacheKey::for_type::<Vec<u8>>());
        assert_eq!(CacheKey::for_type::<u8>().as_str().len(), 64);
    }

    #[test]
    fn test_scoped_key_differs_per_discriminator() {
        let a = CacheKey::scoped::<String>("user:1");
        let b = CacheKey::scoped::<String>("user:2");
        assert_ne!(a, b);
        assert_ne!(a, CacheKey::for_type::<String>());
        assert_eq!(a, CacheKey::scoped::<String>("user:1"));
    }

    #[test]
    fn test_source_accessors() {
        let hit: Source<u8> = Source::Success(3);
        assert!(hit.is_success());
        assert_eq!(hit.value(), Some(&3));
        assert_eq!(hit.map(|v| v * 2), Source::Success(6));

        let miss: Source<u8> = Source::Irrelevant;
        assert!(miss.is_irrelevant());
        assert_eq!(miss.into_value(), None);
    }
}
