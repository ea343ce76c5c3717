//! Pipeline configuration.

use serde::{Deserialize, Serialize};

use crate::compression::CompressionAlgorithm;
use crate::digest::HashAlgorithm;
use crate::error::{IngestError, IngestResult};

/// Content-defined chunking policy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ChunkingPolicy {
    /// Whether files may be split into chunks at all.
    pub enabled: bool,
    /// Minimum chunk size in bytes; no boundary is declared before it.
    pub min_size: u64,
    /// Target mean chunk size in bytes.
    pub avg_size: u64,
    /// Maximum chunk size in bytes; chunks are force-closed here.
    pub max_size: u64,
}

impl Default for ChunkingPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            min_size: 4 * 1024 * 1024,
            avg_size: 8 * 1024 * 1024,
            max_size: 16 * 1024 * 1024,
        }
    }
}

/// Worker threads per pipeline stage.
///
/// The CPU-bound stages (compress, hash) default wider than the I/O-bound
/// ones; register stays single so result bookkeeping needs no extra
/// synchronization.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StageWorkers {
    /// File readers.
    pub read: usize,
    /// Chunk boundary detection workers.
    pub chunk: usize,
    /// Content hash workers.
    pub hash: usize,
    /// Compression workers.
    pub compress: usize,
    /// Upload session workers.
    pub write: usize,
    /// Registration workers.
    pub register: usize,
}

impl Default for StageWorkers {
    fn default() -> Self {
        Self {
            read: 8,
            chunk: 1,
            hash: 2,
            compress: 4,
            write: 1,
            register: 1,
        }
    }
}

/// Complete configuration surface of the ingestion pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Compression applied to each chunk's byte stream.
    pub compression: CompressionAlgorithm,
    /// Content hash over each chunk's uncompressed bytes.
    pub hash_algorithm: HashAlgorithm,
    /// Chunking policy.
    pub chunking: ChunkingPolicy,
    /// Also emit one whole-file bulk chunk alongside content-defined
    /// chunks, for whole-file addressing compatibility.
    pub legacy_bulk: bool,
    /// Fixed block size used by the read stage.
    pub read_block_size: usize,
    /// Worker threads per stage.
    pub workers: StageWorkers,
    /// Capacity of every inter-stage tube; bounds buffering and provides
    /// backpressure.
    pub tube_capacity: usize,
    /// Maximum number of files in flight; `process` blocks beyond it.
    pub max_files_in_flight: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            compression: CompressionAlgorithm::default(),
            hash_algorithm: HashAlgorithm::default(),
            chunking: ChunkingPolicy::default(),
            legacy_bulk: false,
            read_block_size: 512 * 1024,
            workers: StageWorkers::default(),
            tube_capacity: 64,
            max_files_in_flight: 4096,
        }
    }
}

impl IngestConfig {
    /// Reject configurations the pipeline cannot run with.
    pub fn validate(&self) -> IngestResult<()> {
        if self.read_block_size == 0 {
            return Err(IngestError::InvalidConfig("read_block_size is zero".into()));
        }
        let c = &self.chunking;
        if c.min_size == 0 {
            return Err(IngestError::InvalidConfig("min_size is zero".into()));
        }
        if !(c.min_size <= c.avg_size && c.avg_size <= c.max_size) {
            return Err(IngestError::InvalidConfig(format!(
                "chunk sizes must be ordered min <= avg <= max, got {}/{}/{}",
                c.min_size, c.avg_size, c.max_size
            )));
        }
        let w = &self.workers;
        if [w.read, w.chunk, w.hash, w.compress, w.write, w.register]
            .iter()
            .any(|&n| n == 0)
        {
            return Err(IngestError::InvalidConfig(
                "every stage needs at least one worker".into(),
            ));
        }
        if self.tube_capacity == 0 {
            return Err(IngestError::InvalidConfig("tube_capacity is zero".into()));
        }
        if self.max_files_in_flight == 0 {
            return Err(IngestError::InvalidConfig(
                "max_files_in_flight is zero".into(),
            ));
        }
        Ok(())
    }
}
