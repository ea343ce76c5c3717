//! Per-file results, the observer sink, and pipeline counters.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::digest::Digest;

/// Terminal state of one submitted file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IngestStatus {
    /// Every chunk was committed and the file is registered.
    Registered,
    /// The file failed; carries the first recorded error.
    Failed(String),
}

/// Descriptor of one committed chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkDescriptor {
    /// Byte offset within the file.
    pub offset: u64,
    /// Uncompressed chunk size.
    pub size: u64,
    /// Content digest over the uncompressed bytes.
    pub digest: Digest,
}

/// Final result record, delivered exactly once per submitted file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileResult {
    /// Original local path.
    pub path: PathBuf,
    /// Total file size in bytes.
    pub size: u64,
    /// Terminal status.
    pub status: IngestStatus,
    /// Digest of the whole-file bulk object, when one was produced.
    pub bulk_digest: Option<Digest>,
    /// Content-defined chunks in offset order; empty for bulk-only files.
    pub chunks: Vec<ChunkDescriptor>,
}

impl FileResult {
    /// True for a registered (fully committed) file.
    pub fn is_success(&self) -> bool {
        matches!(self.status, IngestStatus::Registered)
    }
}

/// Observer notified once per submitted file, in completion order.
pub trait ResultSink: Send + Sync {
    /// Deliver one file's terminal result.
    fn file_processed(&self, result: FileResult);
}

/// Sink that collects results in memory; handy in tests and dry runs.
#[derive(Default)]
pub struct MemorySink {
    results: Mutex<Vec<FileResult>>,
}

impl MemorySink {
    /// Empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything received so far.
    pub fn results(&self) -> Vec<FileResult> {
        self.results.lock().clone()
    }

    /// Number of results received.
    pub fn len(&self) -> usize {
        self.results.lock().len()
    }

    /// True if nothing was received yet.
    pub fn is_empty(&self) -> bool {
        self.results.lock().is_empty()
    }
}

impl ResultSink for MemorySink {
    fn file_processed(&self, result: FileResult) {
        self.results.lock().push(result);
    }
}

/// Live counters updated by the pipeline.
#[derive(Default)]
pub struct IngestCounters {
    pub(crate) files_submitted: AtomicU64,
    pub(crate) files_registered: AtomicU64,
    pub(crate) files_failed: AtomicU64,
    pub(crate) bytes_read: AtomicU64,
    pub(crate) chunks_created: AtomicU64,
    pub(crate) chunks_committed: AtomicU64,
}

impl IngestCounters {
    /// Point-in-time snapshot.
    pub fn snapshot(&self) -> IngestStats {
        IngestStats {
            files_submitted: self.files_submitted.load(Ordering::Relaxed),
            files_registered: self.files_registered.load(Ordering::Relaxed),
            files_failed: self.files_failed.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            chunks_created: self.chunks_created.load(Ordering::Relaxed),
            chunks_committed: self.chunks_committed.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of pipeline statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestStats {
    /// Files handed to `process`.
    pub files_submitted: u64,
    /// Files that reached the Registered terminal state.
    pub files_registered: u64,
    /// Files that reached the Failed terminal state.
    pub files_failed: u64,
    /// Total bytes read across all registered or failed files.
    pub bytes_read: u64,
    /// Chunks created (content-defined and bulk).
    pub chunks_created: u64,
    /// Chunks whose objects the uploader committed.
    pub chunks_committed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::{hash_bytes, HashAlgorithm};

    #[test]
    fn memory_sink_collects() {
        let sink = MemorySink::new();
        sink.file_processed(FileResult {
            path: "/a".into(),
            size: 3,
            status: IngestStatus::Registered,
            bulk_digest: Some(hash_bytes(HashAlgorithm::Sha1, b"abc")),
            chunks: vec![],
        });
        assert_eq!(sink.len(), 1);
        assert!(sink.results()[0].is_success());
    }

    #[test]
    fn counters_snapshot() {
        let counters = IngestCounters::default();
        counters.files_submitted.fetch_add(2, Ordering::Relaxed);
        counters.files_registered.fetch_add(1, Ordering::Relaxed);
        let stats = counters.snapshot();
        assert_eq!(stats.files_submitted, 2);
        assert_eq!(stats.files_registered, 1);
        assert_eq!(stats.files_failed, 0);
    }

    #[test]
    fn result_roundtrips_through_serde() {
        let result = FileResult {
            path: "/data/file.bin".into(),
            size: 10,
            status: IngestStatus::Failed("upload failed: boom".into()),
            bulk_digest: None,
            chunks: vec![ChunkDescriptor {
                offset: 0,
                size: 10,
                digest: hash_bytes(HashAlgorithm::Sha256, b"x"),
            }],
        };
        let json = serde_json::to_string(&result).unwrap();
        let back: FileResult = serde_json::from_str(&json).unwrap();
        assert!(!back.is_success());
        assert_eq!(back.chunks.len(), 1);
    }
}
