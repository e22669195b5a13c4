//! Compression support for patch transmission
//!
//! Provides both Zstd and LZ4 compression algorithms

use crate::StateError;
use std::io::{Read, Write};

/// Default upper bound on decompressed output
pub const MAX_DECOMPRESSED_LEN: usize = 256 * 1024 * 1024;

/// Compression algorithm selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum CompressionAlgorithm {
    /// Zstandard compression (better ratio, slightly slower)
    #[default]
    #[cfg_attr(feature = "clap", value(name = "zstd"))]
    Zstd,
    /// LZ4 compression (faster, lower ratio)
    #[cfg_attr(feature = "clap", value(name = "lz4"))]
    Lz4,
}

/// Direction of a compression request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionOp {
    Compress,
    Decompress,
}

/// Compressor wrapper supporting multiple algorithms
#[derive(Debug, Clone)]
pub struct Compressor {
    algorithm: CompressionAlgorithm,
    compression_level: i32,
    max_output: usize,
}

impl Default for Compressor {
    fn default() -> Self {
        Self::new(CompressionAlgorithm::default())
    }
}

impl Compressor {
    /// Create a new compressor with specified algorithm
    pub fn new(algorithm: CompressionAlgorithm) -> Self {
        Self {
            algorithm,
            compression_level: match algorithm {
                CompressionAlgorithm::Zstd => 3, // Default zstd level
                CompressionAlgorithm::Lz4 => 0,  // LZ4 doesn't use levels in same way
            },
            max_output: MAX_DECOMPRESSED_LEN,
        }
    }

    /// Set compression level (algorithm-specific)
    pub fn with_level(mut self, level: i32) -> Self {
        self.compression_level = level;
        self
    }

    /// Cap on the size of decompressed output
    pub fn with_max_output(mut self, limit: usize) -> Self {
        self.max_output = limit;
        self
    }

    pub fn algorithm(&self) -> CompressionAlgorithm {
        self.algorithm
    }

    /// Run one request in the given direction
    pub fn transform(&self, op: CompressionOp, data: &[u8]) -> Result<Vec<u8>, StateError> {
        match op {
            CompressionOp::Compress => self.compress(data),
            CompressionOp::Decompress => self.decompress(data),
        }
    }

    /// Compress data
    pub fn compress(&self, data: &[u8]) -> Result<Vec<u8>, StateError> {
        match self.algorithm {
            CompressionAlgorithm::Zstd => self.compress_zstd(data),
            CompressionAlgorithm::Lz4 => Ok(lz4_flex::compress_prepend_size(data)),
        }
    }

    /// Decompress data
    pub fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, StateError> {
        match self.algorithm {
            CompressionAlgorithm::Zstd => self.decompress_zstd(data),
            CompressionAlgorithm::Lz4 => self.decompress_lz4(data),
        }
    }

    /// Decompress LZ4 with a size prefix, refusing absurd declared sizes
    fn decompress_lz4(&self, data: &[u8]) -> Result<Vec<u8>, StateError> {
        if let Some(prefix) = data.get(..4) {
            let declared = u32::from_le_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;
            if declared > self.max_output {
                return Err(StateError::CompressionError(format!(
                    "LZ4 frame declares {declared} bytes, limit is {}",
                    self.max_output
                )));
            }
        }

        lz4_flex::decompress_size_prepended(data)
            .map_err(|e| StateError::CompressionError(format!("LZ4 decompression failed: {e}")))
    }

    /// Compress using Zstandard
    fn compress_zstd(&self, data: &[u8]) -> Result<Vec<u8>, StateError> {
        let mut encoder = zstd::Encoder::new(Vec::new(), self.compression_level).map_err(|e| {
            StateError::CompressionError(format!("Failed to create zstd encoder: {e}"))
        })?;

        encoder.write_all(data).map_err(|e| {
            StateError::CompressionError(format!("Failed to write to zstd encoder: {e}"))
        })?;

        encoder.finish().map_err(|e| {
            StateError::CompressionError(format!("Failed to finish zstd encoding: {e}"))
        })
    }

    /// Decompress using Zstandard, stopping one byte past the output cap
    fn decompress_zstd(&self, data: &[u8]) -> Result<Vec<u8>, StateError> {
        let decoder = zstd::Decoder::new(data).map_err(|e| {
            StateError::CompressionError(format!("Failed to create zstd decoder: {e}"))
        })?;

        let mut decompressed = Vec::new();
        decoder
            .take(self.max_output as u64 + 1)
            .read_to_end(&mut decompressed)
            .map_err(|e| {
                StateError::CompressionError(format!("Failed to decompress zstd data: {e}"))
            })?;

        if decompressed.len() > self.max_output {
            return Err(StateError::CompressionError(format!(
                "zstd output exceeds {} bytes",
                self.max_output
            )));
        }

        Ok(decompressed)
    }
}
