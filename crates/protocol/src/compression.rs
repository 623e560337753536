//! Payload compression for the lanlink stream protocol
//!
//! Compression is a connection-wide policy, not a per-message flag:
//! both ends of a stream must agree on it out of band (see
//! [`crate::config::NetConfig::compression`]). When enabled, the writer
//! compresses the encoded envelope before computing the 4-byte length
//! prefix, so the prefix always describes the bytes actually on the
//! wire.

use bytes::Bytes;
use thiserror::Error;

/// Compression errors
#[derive(Debug, Error)]
pub enum CompressionError {
    /// Zstd compression failed
    #[error("zstd compression failed: {0}")]
    ZstdFailed(#[from] std::io::Error),

    /// Decompression failed
    #[error("decompression failed: {0}")]
    DecompressionFailed(String),
}

pub type CompressionResult<T> = Result<T, CompressionError>;

/// Trait for compression/decompression operations
pub trait Compressor: Send + Sync + Clone {
    /// Compresses the input data
    fn compress(&self, data: &[u8]) -> CompressionResult<Bytes>;

    /// Decompresses the input data
    fn decompress(&self, data: &[u8]) -> CompressionResult<Bytes>;
}

/// No-op compressor that passes data through unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCompressor;

impl Compressor for NoCompressor {
    fn compress(&self, data: &[u8]) -> CompressionResult<Bytes> {
        Ok(Bytes::copy_from_slice(data))
    }

    fn decompress(&self, data: &[u8]) -> CompressionResult<Bytes> {
        Ok(Bytes::copy_from_slice(data))
    }
}

/// Zstd compressor with default compression level (3).
#[derive(Debug, Clone)]
pub struct ZstdCompressor {
    level: i32,
}

impl ZstdCompressor {
    pub fn new() -> Self {
        Self { level: 3 }
    }

    /// Custom compression level (1 = fastest, 22 = highest ratio).
    pub fn with_level(level: i32) -> Self {
        Self { level }
    }
}

impl Default for ZstdCompressor {
    fn default() -> Self {
        Self::new()
    }
}

impl Compressor for ZstdCompressor {
    fn compress(&self, data: &[u8]) -> CompressionResult<Bytes> {
        let compressed = zstd::encode_all(data, self.level)?;
        Ok(Bytes::from(compressed))
    }

    fn decompress(&self, data: &[u8]) -> CompressionResult<Bytes> {
        let decompressed = zstd::decode_all(data)
            .map_err(|e| CompressionError::DecompressionFailed(e.to_string()))?;
        Ok(Bytes::from(decompressed))
    }
}

/// The connection-wide compression policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    #[default]
    None,
    Zstd,
}

impl Compression {
    pub fn compress(&self, data: &[u8]) -> CompressionResult<Bytes> {
        match self {
            Compression::None => NoCompressor.compress(data),
            Compression::Zstd => ZstdCompressor::new().compress(data),
        }
    }

    pub fn decompress(&self, data: &[u8]) -> CompressionResult<Bytes> {
        match self {
            Compression::None => NoCompressor.decompress(data),
            Compression::Zstd => ZstdCompressor::new().decompress(data),
        }
    }
}
