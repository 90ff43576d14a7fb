use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::cache::{DiskCacheConfig, MemoryConfig};
use crate::compression::CompressionConfig;
use crate::core::{Result, StrataError};

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StrataConfig {
    pub memory: MemoryConfig,
    pub disk: DiskConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiskConfig {
    pub directory: PathBuf,
    pub max_size_mb: usize,
    pub max_entries: usize,
    pub compaction_ratio: f64,
    pub fsync: bool,
    pub compression: CompressionConfig,
}

impl Default for DiskConfig {
    fn default() -> Self {
        let defaults = DiskCacheConfig::default();
        Self {
            directory: defaults.directory,
            max_size_mb: defaults.max_size_mb,
            max_entries: defaults.max_entries,
            compaction_ratio: defaults.compaction_ratio,
            fsync: defaults.fsync,
            compression: defaults.compression,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// `json` or `pretty`
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl StrataConfig {
    /// Load configuration from YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: StrataConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.memory.max_entries == 0 {
            return Err(StrataError::InvalidConfig(
                "memory.max_entries must be positive".to_string(),
            ));
        }
        if self.disk.max_entries == 0 || self.disk.max_size_mb == 0 {
            return Err(StrataError::InvalidConfig(
                "disk.max_entries and disk.max_size_mb must be positive".to_string(),
            ));
        }
        if !(self.disk.compaction_ratio > 0.0 && self.disk.compaction_ratio <= 1.0) {
            return Err(StrataError::InvalidConfig(format!(
                "disk.compaction_ratio must be in (0, 1], got {}",
                self.disk.compaction_ratio
            )));
        }
        if !matches!(self.logging.format.as_str(), "json" | "pretty") {
            return Err(StrataError::InvalidConfig(format!(
                "logging.format must be json or pretty, got {}",
                self.logging.format
            )));
        }
        Ok(())
    }

    pub fn to_memory_config(&self) -> MemoryConfig {
        self.memory.clone()
    }

    pub fn to_disk_config(&self) -> DiskCacheConfig {
        DiskCacheConfig {
            directory: self.disk.directory.clone(),
            max_size_mb: self.disk.max_size_mb,
            max_entries: self.disk.max_entries,
            compaction_ratio: self.disk.compaction_ratio,
            fsync: self.disk.fsync,
            compression: self.disk.compression.clone(),
        }
    }
}
