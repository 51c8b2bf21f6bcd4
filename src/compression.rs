//! LZ4 framing for stored blobs
//!
//! Every blob on disk starts with a 4-byte header:
//! - `LZ4R` followed by size-prepended LZ4 data
//! - `\0\0\0\0` followed by the raw bytes
//!
//! The header lets the store read blobs written under any strategy, so the
//! strategy can change between runs without rewriting existing objects.

use crate::error::{Result, RewindError};
use lz4_flex::{compress_prepend_size, decompress_size_prepended};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::trace;

const LZ4_MAGIC: &[u8; 4] = b"LZ4R";
const RAW_MAGIC: &[u8; 4] = &[0, 0, 0, 0];

/// Blobs smaller than this never benefit from LZ4
const MIN_COMPRESSIBLE: usize = 64;

/// Sample size used by the adaptive strategy to probe compressibility
const PROBE_SIZE: usize = 4096;

/// When blobs get compressed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CompressionStrategy {
    /// Store everything raw
    None,
    /// Compress every blob of at least 1KB
    #[default]
    Fast,
    /// Compress blobs of at least `min_size` whose leading bytes compress well
    Adaptive {
        /// Skip compression below this size
        min_size: usize,
    },
}

/// Counters for compression activity
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct CompressionStats {
    /// Blobs written compressed
    pub blobs_compressed: u64,
    /// Blobs written raw
    pub blobs_stored_raw: u64,
    /// Bytes saved by compression
    pub bytes_saved: u64,
}

impl CompressionStats {
    /// Fraction of blobs that were compressed
    pub fn compression_ratio(&self) -> f64 {
        let total = self.blobs_compressed + self.blobs_stored_raw;
        if total == 0 {
            return 0.0;
        }
        self.blobs_compressed as f64 / total as f64
    }
}

/// Applies a [`CompressionStrategy`] to blob bytes
///
/// Counters are atomic so one engine can be shared by parallel writers.
#[derive(Debug, Default)]
pub struct CompressionEngine {
    strategy: CompressionStrategy,
    compressed: AtomicU64,
    raw: AtomicU64,
    saved: AtomicU64,
}

impl CompressionEngine {
    /// Create an engine for the given strategy
    pub fn new(strategy: CompressionStrategy) -> Self {
        Self {
            strategy,
            ..Default::default()
        }
    }

    /// Strategy in use
    pub fn strategy(&self) -> &CompressionStrategy {
        &self.strategy
    }

    /// Snapshot of the counters
    pub fn stats(&self) -> CompressionStats {
        CompressionStats {
            blobs_compressed: self.compressed.load(Ordering::Relaxed),
            blobs_stored_raw: self.raw.load(Ordering::Relaxed),
            bytes_saved: self.saved.load(Ordering::Relaxed),
        }
    }

    /// Frame `content` for storage, compressing it when worthwhile
    pub fn compress(&self, content: &[u8]) -> Vec<u8> {
        if self.should_compress(content) {
            let compressed = compress_prepend_size(content);
            if compressed.len() < content.len() {
                let saved = (content.len() - compressed.len()) as u64;
                self.compressed.fetch_add(1, Ordering::Relaxed);
                self.saved.fetch_add(saved, Ordering::Relaxed);
                trace!("Compressed {} -> {} bytes", content.len(), compressed.len());
                return frame(LZ4_MAGIC, &compressed);
            }
        }
        self.raw.fetch_add(1, Ordering::Relaxed);
        frame(RAW_MAGIC, content)
    }

    /// Undo [`compress`](Self::compress)
    pub fn decompress(&self, content: &[u8]) -> Result<Vec<u8>> {
        if content.len() < 4 {
            return Err(RewindError::decompression("Content too short"));
        }
        let (magic, body) = content.split_at(4);
        if magic == LZ4_MAGIC {
            decompress_size_prepended(body)
                .map_err(|e| RewindError::decompression(format!("LZ4 decompression failed: {}", e)))
        } else if magic == RAW_MAGIC {
            Ok(body.to_vec())
        } else {
            Err(RewindError::decompression("Unknown blob header"))
        }
    }

    fn should_compress(&self, content: &[u8]) -> bool {
        if content.len() < MIN_COMPRESSIBLE {
            return false;
        }
        match &self.strategy {
            CompressionStrategy::None => false,
            CompressionStrategy::Fast => content.len() >= 1024,
            CompressionStrategy::Adaptive { min_size } => {
                if content.len() < *min_size {
                    return false;
                }
                // Already-compressed formats barely shrink; probe a prefix first.
                let probe = &content[..content.len().min(PROBE_SIZE)];
                let probed = compress_prepend_size(probe);
                (probed.len() as f64) < probe.len() as f64 * 0.9
            }
        }
    }
}

fn frame(magic: &[u8; 4], body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + body.len());
    out.extend_from_slice(magic);
    out.extend_from_slice(body);
    out
}
