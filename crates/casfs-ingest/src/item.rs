//! The file / chunk / block data model flowing through the pipeline.
//!
//! Ownership rules: a `FileItem` is shared (`Arc`) by every block and chunk
//! derived from it and additionally carries an explicit chunk reference
//! count — one reference per created chunk plus one for "file still being
//! read". The thread that observes the count's zero transition (exactly
//! one) dispatches the file for registration. `ChunkItem` fields are only
//! ever mutated by the stage that currently owns the chunk's stream; tag
//! routing, not locking, enforces the single-writer rule.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::warn;

use casfs_upload::HashSuffix;

use crate::compression::CompressionAlgorithm;
use crate::config::{ChunkingPolicy, IngestConfig};
use crate::digest::{Digest, HashAlgorithm};
use crate::error::IngestError;
use crate::tube::Tagged;

static TAG_SOURCE: AtomicU64 = AtomicU64::new(0);

/// Process-wide unique routing tag.
pub fn next_tag() -> u64 {
    TAG_SOURCE.fetch_add(1, Ordering::Relaxed)
}

/// One submitted file and its ingestion bookkeeping.
pub struct FileItem {
    path: PathBuf,
    tag: u64,
    chunking: ChunkingPolicy,
    compression: CompressionAlgorithm,
    hash_algorithm: HashAlgorithm,
    hash_suffix: HashSuffix,
    legacy_bulk: bool,

    size: AtomicU64,
    may_have_chunks: AtomicBool,
    chunk_refs: AtomicU32,
    failed: AtomicBool,
    error: Mutex<Option<IngestError>>,
    chunks: Mutex<Vec<Arc<ChunkItem>>>,
    bulk_chunk: Mutex<Option<Arc<ChunkItem>>>,
}

impl FileItem {
    /// File with an explicit per-file policy.
    pub fn new(
        path: impl Into<PathBuf>,
        chunking: ChunkingPolicy,
        compression: CompressionAlgorithm,
        hash_algorithm: HashAlgorithm,
        hash_suffix: HashSuffix,
        legacy_bulk: bool,
    ) -> Self {
        Self {
            path: path.into(),
            tag: next_tag(),
            may_have_chunks: AtomicBool::new(chunking.enabled),
            chunking,
            compression,
            hash_algorithm,
            hash_suffix,
            legacy_bulk,
            size: AtomicU64::new(0),
            chunk_refs: AtomicU32::new(1),
            failed: AtomicBool::new(false),
            error: Mutex::new(None),
            chunks: Mutex::new(Vec::new()),
            bulk_chunk: Mutex::new(None),
        }
    }

    /// File under a pipeline configuration, with the caller's per-submission
    /// overrides applied.
    pub fn for_config(
        path: impl Into<PathBuf>,
        config: &IngestConfig,
        allow_chunking: bool,
        hash_suffix: HashSuffix,
    ) -> Self {
        let mut chunking = config.chunking;
        chunking.enabled = chunking.enabled && allow_chunking;
        Self::new(
            path,
            chunking,
            config.compression,
            config.hash_algorithm,
            hash_suffix,
            config.legacy_bulk,
        )
    }

    /// Path of the local file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Per-file routing tag.
    pub fn tag(&self) -> u64 {
        self.tag
    }

    /// Chunking policy (with the caller's override already folded in).
    pub fn chunking(&self) -> &ChunkingPolicy {
        &self.chunking
    }

    /// Compression algorithm for this file's chunks.
    pub fn compression(&self) -> CompressionAlgorithm {
        self.compression
    }

    /// Hash algorithm for this file's chunks.
    pub fn hash_algorithm(&self) -> HashAlgorithm {
        self.hash_algorithm
    }

    /// Namespace suffix for the file's whole-file (bulk) object.
    pub fn hash_suffix(&self) -> HashSuffix {
        self.hash_suffix
    }

    /// Whether a whole-file bulk chunk accompanies content-defined chunks.
    pub fn legacy_bulk(&self) -> bool {
        self.legacy_bulk
    }

    /// Observed size so far.
    pub fn size(&self) -> u64 {
        self.size.load(Ordering::Relaxed)
    }

    /// Account bytes delivered by the read stage.
    pub fn record_read(&self, len: u64) -> u64 {
        self.size.fetch_add(len, Ordering::Relaxed) + len
    }

    /// True while the file may still be split into multiple chunks.
    pub fn may_have_chunks(&self) -> bool {
        self.may_have_chunks.load(Ordering::Relaxed)
    }

    /// Cleared by the read stage once the file is known too small to split.
    pub fn set_may_have_chunks(&self, value: bool) {
        self.may_have_chunks.store(value, Ordering::Relaxed);
    }

    /// Add a reference for a newly created chunk.
    pub fn retain(&self) {
        self.chunk_refs.fetch_add(1, Ordering::AcqRel);
    }

    /// Drop one reference. Returns true exactly once, for the caller that
    /// observes the transition to zero and must dispatch registration.
    pub fn release(&self) -> bool {
        let previous = self.chunk_refs.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "file reference count underflow");
        previous == 1
    }

    /// Record a failure; the first error wins, later ones only log.
    pub fn fail(&self, error: IngestError) {
        self.failed.store(true, Ordering::Release);
        let mut slot = self.error.lock();
        if slot.is_none() {
            *slot = Some(error);
        } else {
            warn!(path = %self.path.display(), error = %error, "additional failure on file");
        }
    }

    /// True once any stage failed this file.
    pub fn is_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    /// Remove and return the recorded error (registration consumes it).
    pub fn take_error(&self) -> Option<IngestError> {
        self.error.lock().take()
    }

    /// Record a content-defined chunk; takes the chunk's file reference.
    pub fn register_chunk(&self, chunk: Arc<ChunkItem>) {
        self.retain();
        self.chunks.lock().push(chunk);
    }

    /// Record the whole-file bulk chunk; takes its file reference.
    pub fn register_bulk_chunk(&self, chunk: Arc<ChunkItem>) {
        self.retain();
        *self.bulk_chunk.lock() = Some(chunk);
    }

    /// Content-defined chunks in creation (= offset) order.
    pub fn chunks(&self) -> Vec<Arc<ChunkItem>> {
        self.chunks.lock().clone()
    }

    /// The whole-file bulk chunk, if one was produced.
    pub fn bulk_chunk(&self) -> Option<Arc<ChunkItem>> {
        self.bulk_chunk.lock().clone()
    }
}

impl Tagged for Arc<FileItem> {
    fn tag(&self) -> u64 {
        FileItem::tag(self)
    }
}

/// One chunk of a file moving toward the object store.
pub struct ChunkItem {
    file: Arc<FileItem>,
    offset: u64,
    tag: u64,
    is_bulk: bool,
    size: AtomicU64,
    compressed_size: AtomicU64,
    digest: OnceLock<Digest>,
    failed: AtomicBool,
    committed: AtomicBool,
}

impl ChunkItem {
    /// Chunk starting at `offset` within `file`.
    pub fn new(file: Arc<FileItem>, offset: u64, is_bulk: bool) -> Self {
        Self {
            file,
            offset,
            tag: next_tag(),
            is_bulk,
            size: AtomicU64::new(0),
            compressed_size: AtomicU64::new(0),
            digest: OnceLock::new(),
            failed: AtomicBool::new(false),
            committed: AtomicBool::new(false),
        }
    }

    /// The owning file.
    pub fn file(&self) -> &Arc<FileItem> {
        &self.file
    }

    /// Routing tag shared by every block of this chunk's stream.
    pub fn tag(&self) -> u64 {
        self.tag
    }

    /// Byte offset of the chunk within its file.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// True for the synthetic whole-file chunk.
    pub fn is_bulk(&self) -> bool {
        self.is_bulk
    }

    /// Uncompressed size accumulated so far.
    pub fn size(&self) -> u64 {
        self.size.load(Ordering::Relaxed)
    }

    /// Account uncompressed bytes (chunk stage only).
    pub fn add_size(&self, len: u64) {
        self.size.fetch_add(len, Ordering::Relaxed);
    }

    /// Compressed size accumulated so far.
    pub fn compressed_size(&self) -> u64 {
        self.compressed_size.load(Ordering::Relaxed)
    }

    /// Account compressed bytes (compress stage only).
    pub fn add_compressed(&self, len: u64) {
        self.compressed_size.fetch_add(len, Ordering::Relaxed);
    }

    /// Store the finalized content digest (hash stage, exactly once).
    pub fn set_digest(&self, digest: Digest) {
        if self.digest.set(digest).is_err() {
            warn!(tag = self.tag, "digest set twice on chunk");
        }
    }

    /// The finalized digest, once the hash stage is done with the stream.
    pub fn digest(&self) -> Option<Digest> {
        self.digest.get().copied()
    }

    /// Mark the chunk failed; the owning file fails with it.
    pub fn mark_failed(&self) {
        self.failed.store(true, Ordering::Release);
    }

    /// True once any stage failed this chunk.
    pub fn is_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire) || self.file.is_failed()
    }

    /// Mark the chunk's object committed in the store.
    pub fn mark_committed(&self) {
        self.committed.store(true, Ordering::Release);
    }

    /// True once the uploader confirmed the commit.
    pub fn is_committed(&self) -> bool {
        self.committed.load(Ordering::Acquire)
    }
}

/// Payload of a block: bytes, or end-of-stream.
pub enum BlockPayload {
    /// A run of bytes. Ownership of the buffer moves with the block.
    Data(Bytes),
    /// End of the (file, chunk) stream. Always the last block of a stream.
    Stop,
}

/// The unit that physically flows through tubes.
pub struct BlockItem {
    file: Arc<FileItem>,
    chunk: Option<Arc<ChunkItem>>,
    tag: u64,
    payload: BlockPayload,
}

impl BlockItem {
    /// Data block for a stream.
    pub fn data(
        file: Arc<FileItem>,
        chunk: Option<Arc<ChunkItem>>,
        tag: u64,
        bytes: Bytes,
    ) -> Self {
        Self {
            file,
            chunk,
            tag,
            payload: BlockPayload::Data(bytes),
        }
    }

    /// Stop block ending a stream.
    pub fn stop(file: Arc<FileItem>, chunk: Option<Arc<ChunkItem>>, tag: u64) -> Self {
        Self {
            file,
            chunk,
            tag,
            payload: BlockPayload::Stop,
        }
    }

    /// The file this block belongs to.
    pub fn file(&self) -> &Arc<FileItem> {
        &self.file
    }

    /// The owning chunk, once the chunk stage assigned one.
    pub fn chunk(&self) -> Option<&Arc<ChunkItem>> {
        self.chunk.as_ref()
    }

    /// Routing tag of the stream this block belongs to.
    pub fn tag(&self) -> u64 {
        self.tag
    }

    /// The payload.
    pub fn payload(&self) -> &BlockPayload {
        &self.payload
    }

    /// True for the end-of-stream sentinel.
    pub fn is_stop(&self) -> bool {
        matches!(self.payload, BlockPayload::Stop)
    }

    /// Payload length in bytes (zero for Stop).
    pub fn len(&self) -> usize {
        match &self.payload {
            BlockPayload::Data(bytes) => bytes.len(),
            BlockPayload::Stop => 0,
        }
    }

    /// True when the block carries no bytes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Split into parts, consuming the block.
    pub fn into_parts(self) -> (Arc<FileItem>, Option<Arc<ChunkItem>>, u64, BlockPayload) {
        (self.file, self.chunk, self.tag, self.payload)
    }
}

impl Tagged for BlockItem {
    fn tag(&self) -> u64 {
        self.tag
    }
}
