use thiserror::Error;

/// Main error type for strata operations
///
/// Network failures are not represented here: they travel as
/// [`Source::Failure`](crate::core::Source::Failure) values so that a read
/// always completes with a result.
#[derive(Debug, Error)]
pub enum StrataError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Compression error: {0}")]
    Compression(String),

    #[error("Corrupted record at offset {offset}: {reason}")]
    CorruptRecord { offset: u64, reason: String },

    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    #[error("No usable memory entry for key: {0}")]
    MissingEntry(String),

    #[error("Invalid TTL: {0}")]
    InvalidTtl(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl StrataError {
    /// True when the payload could not be encoded or decoded.
    ///
    /// Cached bytes that fail to decode are unusable, so the repository
    /// treats this class as a miss and evicts the slot.
    pub fn is_serialization(&self) -> bool {
        matches!(self, Self::Serialization(_))
    }

    /// True when stored bytes were read back but cannot be trusted
    pub fn is_corrupt_data(&self) -> bool {
        matches!(
            self,
            Self::CorruptRecord { .. } | Self::ChecksumMismatch { .. } | Self::Compression(_)
        )
    }

    /// True for failures of the storage medium itself
    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::CorruptRecord { .. } | Self::ChecksumMismatch { .. }
        )
    }
}

impl From<bincode::error::EncodeError> for StrataError {
    fn from(e: bincode::error::EncodeError) -> Self {
        StrataError::Serialization(e.to_string())
    }
}

impl From<bincode::error::DecodeError> for StrataError {
    fn from(e: bincode::error::DecodeError) -> Self {
        StrataError::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for StrataError {
    fn from(e: serde_json::Error) -> Self {
        StrataError::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for StrataError {
    fn from(e: serde_yaml::Error) -> Self {
        StrataError::InvalidConfig(e.to_string())
    }
}

/// Result type alias for strata operations
pub type Result<T> = std::result::Result<T, StrataError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialization_classification() {
        let err = StrataError::Serialization("unexpected end".to_string());
        assert!(err.is_serialization());
        assert!(!err.is_storage());
    }

    #[test]
    fn test_storage_classification() {
        let err = StrataError::from(std::io::Error::other("disk gone"));
        assert!(err.is_storage());
        assert!(!err.is_serialization());

        let err = StrataError::ChecksumMismatch {
            expected: 1,
            actual: 2,
        };
        assert!(err.is_storage());
        assert_eq!(err.to_string(), "Checksum mismatch: expected 1, got 2");
    }

    #[test]
    fn test_corrupt_data_classification() {
        assert!(StrataError::ChecksumMismatch { expected: 1, actual: 2 }.is_corrupt_data());
        assert!(StrataError::Compression("bad frame".to_string()).is_corrupt_data());
        assert!(
            StrataError::CorruptRecord {
                offset: 0,
                reason: "truncated".to_string()
            }
            .is_corrupt_data()
        );
        assert!(!StrataError::from(std::io::Error::other("disk gone")).is_corrupt_data());
    }

    #[test]
    fn test_missing_entry_message() {
        let err = StrataError::MissingEntry("abc".to_string());
        assert_eq!(err.to_string(), "No usable memory entry for key: abc");
    }
}
