//! Payload compression for disk records
//!
//! The algorithm actually applied is stored with each record, so a cache
//! written with one setting stays readable after the setting changes.

use crate::core::{Result, StrataError};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use tracing::debug;

/// Compression algorithm selection
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CompressionAlgorithm {
    /// No compression
    #[default]
    None,
    /// LZ4 - fast compression/decompression
    Lz4,
    /// Zstandard - better compression ratio
    Zstd,
}

/// Compression configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    pub algorithm: CompressionAlgorithm,
    /// Payloads smaller than this are stored as-is
    pub min_payload_size: usize,
    /// Zstd compression level (1-22)
    pub zstd_level: i32,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            algorithm: CompressionAlgorithm::None,
            min_payload_size: 1024,
            zstd_level: 3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Compressor {
    config: CompressionConfig,
}

impl Compressor {
    pub fn new(config: CompressionConfig) -> Self {
        Self { config }
    }

    /// Compress with the configured algorithm, reporting which one was used
    pub fn compress(&self, data: &[u8]) -> Result<(Vec<u8>, CompressionAlgorithm)> {
        if !self.should_compress(data) {
            return Ok((data.to_vec(), CompressionAlgorithm::None));
        }

        let compressed = match self.config.algorithm {
            CompressionAlgorithm::None => return Ok((data.to_vec(), CompressionAlgorithm::None)),
            CompressionAlgorithm::Lz4 => compress_lz4(data),
            CompressionAlgorithm::Zstd => zstd::encode_all(data, self.config.zstd_level),
        }
        .map_err(|e| StrataError::Compression(e.to_string()))?;

        // Incompressible payloads are kept raw
        if compressed.len() >= data.len() {
            return Ok((data.to_vec(), CompressionAlgorithm::None));
        }

        debug!(
            "{:?} compressed: {} → {} bytes",
            self.config.algorithm,
            data.len(),
            compressed.len()
        );
        Ok((compressed, self.config.algorithm))
    }

    /// Decompress data produced with `algorithm`
    pub fn decompress(&self, data: &[u8], algorithm: CompressionAlgorithm) -> Result<Vec<u8>> {
        match algorithm {
            CompressionAlgorithm::None => Ok(data.to_vec()),
            CompressionAlgorithm::Lz4 => decompress_lz4(data),
            CompressionAlgorithm::Zstd => zstd::decode_all(data),
        }
        .map_err(|e| StrataError::Compression(e.to_string()))
    }

    pub fn should_compress(&self, data: &[u8]) -> bool {
        self.config.algorithm != CompressionAlgorithm::None
            && data.len() >= self.config.min_payload_size
    }
}

fn compress_lz4(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = lz4::EncoderBuilder::new().level(4).build(Vec::new())?;
    encoder.write_all(data)?;
    let (compressed, result) = encoder.finish();
    result?;
    Ok(compressed)
}

fn decompress_lz4(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut decoder = lz4::Decoder::new(data)?;
    let mut decompressed = Vec::new();
    decoder.read_to_end(&mut decompressed)?;
    Ok(decompressed)
}
