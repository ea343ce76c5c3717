#![warn(missing_docs)]

//! casfs ingestion subsystem: the write path of the content-addressed
//! filesystem.
//!
//! A submitted file flows through six staged thread pools connected by
//! bounded queues ("tubes"):
//!
//! Read (fixed blocks) → Chunk (content-defined boundaries) → Hash
//! (digest of uncompressed bytes) → Compress (per-chunk stream) → Write
//! (streamed upload) → Register (result reporting)
//!
//! Ordering within a chunk stream is guaranteed solely by tag routing
//! through [`tube::TubeGroup`]; backpressure comes solely from bounded
//! tube capacity. Files fail independently: an I/O, compression, or
//! upload error degrades one file to a Failed result and never stalls the
//! rest of the pipeline.

pub mod chunker;
pub mod compression;
pub mod config;
pub mod digest;
pub mod error;
pub mod item;
pub mod pipeline;
pub mod result;
pub mod task;
pub mod task_chunk;
pub mod task_compress;
pub mod task_hash;
pub mod task_read;
pub mod task_register;
pub mod task_write;
pub mod tube;

pub use chunker::ChunkDetector;
pub use compression::{decompress, CompressionAlgorithm, StreamCompressor};
pub use config::{ChunkingPolicy, IngestConfig, StageWorkers};
pub use digest::{hash_bytes, ChunkHasher, Digest, HashAlgorithm};
pub use error::{IngestError, IngestResult};
pub use item::{BlockItem, BlockPayload, ChunkItem, FileItem};
pub use pipeline::IngestionPipeline;
pub use result::{
    ChunkDescriptor, FileResult, IngestStats, IngestStatus, MemorySink, ResultSink,
};
pub use tube::{Tagged, Tube, TubeGroup};
