//! Chunk stage: regroup per-file block streams into chunk-bounded streams.
//!
//! Every chunk gets a fresh tag; all of its blocks (and its closing Stop)
//! are dispatched under that tag, which is what routes them through a
//! single downstream worker per stage and preserves their order. Data
//! payloads are sliced zero-copy at cut points; the optional legacy bulk
//! stream shares the payload buffers with the chunked stream.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use tracing::trace;

use crate::chunker::ChunkDetector;
use crate::item::{BlockItem, BlockPayload, ChunkItem, FileItem};
use crate::task::TubeConsumer;
use crate::tube::TubeGroup;

struct FileStream {
    detector: Option<ChunkDetector>,
    current: Option<Arc<ChunkItem>>,
    bulk: Option<Arc<ChunkItem>>,
    bulk_active: bool,
    offset: u64,
}

impl FileStream {
    fn new(file: &Arc<FileItem>) -> Self {
        // may_have_chunks already folds in the policy, the caller's
        // per-submission override, and the read stage's size check.
        let chunked = file.may_have_chunks();
        Self {
            detector: chunked.then(|| ChunkDetector::new(file.chunking())),
            current: None,
            bulk: None,
            bulk_active: !chunked || file.legacy_bulk(),
            offset: 0,
        }
    }

    fn ensure_current(&mut self, file: &Arc<FileItem>, started_at: u64) -> Arc<ChunkItem> {
        if let Some(chunk) = &self.current {
            return Arc::clone(chunk);
        }
        let chunk = Arc::new(ChunkItem::new(Arc::clone(file), started_at, false));
        file.register_chunk(Arc::clone(&chunk));
        trace!(tag = chunk.tag(), offset = started_at, "chunk opened");
        self.current = Some(Arc::clone(&chunk));
        chunk
    }

    fn ensure_bulk(&mut self, file: &Arc<FileItem>) -> Arc<ChunkItem> {
        if let Some(bulk) = &self.bulk {
            return Arc::clone(bulk);
        }
        let chunk = Arc::new(ChunkItem::new(Arc::clone(file), 0, true));
        file.register_bulk_chunk(Arc::clone(&chunk));
        self.bulk = Some(Arc::clone(&chunk));
        chunk
    }
}

/// Groups blocks into chunks with content-defined boundaries.
pub struct TaskChunk {
    tubes_out: Arc<TubeGroup<BlockItem>>,
    tubes_register: Arc<TubeGroup<Arc<FileItem>>>,
    streams: HashMap<u64, FileStream>,
}

impl TaskChunk {
    /// Chunker emitting chunk streams into `tubes_out`; files whose read
    /// reference drops to zero here (no chunks at all) go to `tubes_register`.
    pub fn new(
        tubes_out: Arc<TubeGroup<BlockItem>>,
        tubes_register: Arc<TubeGroup<Arc<FileItem>>>,
    ) -> Self {
        Self {
            tubes_out,
            tubes_register,
            streams: HashMap::new(),
        }
    }

    fn emit_data(
        tubes: &TubeGroup<BlockItem>,
        file: &Arc<FileItem>,
        chunk: &Arc<ChunkItem>,
        bytes: Bytes,
    ) {
        chunk.add_size(bytes.len() as u64);
        tubes.dispatch(BlockItem::data(
            Arc::clone(file),
            Some(Arc::clone(chunk)),
            chunk.tag(),
            bytes,
        ));
    }

    fn emit_close(tubes: &TubeGroup<BlockItem>, file: &Arc<FileItem>, chunk: Arc<ChunkItem>) {
        trace!(tag = chunk.tag(), size = chunk.size(), "chunk closed");
        let tag = chunk.tag();
        tubes.dispatch(BlockItem::stop(Arc::clone(file), Some(chunk), tag));
    }

    fn on_data(&mut self, file: &Arc<FileItem>, tag: u64, bytes: Bytes) {
        let tubes = Arc::clone(&self.tubes_out);
        let stream = self
            .streams
            .entry(tag)
            .or_insert_with(|| FileStream::new(file));

        if let Some(mut detector) = stream.detector.take() {
            let mut cursor = 0usize;
            while cursor < bytes.len() {
                let started_at = stream.offset + cursor as u64;
                let chunk = stream.ensure_current(file, started_at);
                match detector.find_cut(&bytes[cursor..]) {
                    Some(cut) => {
                        Self::emit_data(&tubes, file, &chunk, bytes.slice(cursor..cursor + cut));
                        stream.current = None;
                        Self::emit_close(&tubes, file, chunk);
                        cursor += cut;
                    }
                    None => {
                        Self::emit_data(&tubes, file, &chunk, bytes.slice(cursor..));
                        cursor = bytes.len();
                    }
                }
            }
            stream.detector = Some(detector);
        }

        if stream.bulk_active && !bytes.is_empty() {
            let bulk = stream.ensure_bulk(file);
            Self::emit_data(&tubes, file, &bulk, bytes);
        }
    }

    fn on_stop(&mut self, file: &Arc<FileItem>, tag: u64) {
        let tubes = Arc::clone(&self.tubes_out);
        let mut stream = self
            .streams
            .remove(&tag)
            .unwrap_or_else(|| FileStream::new(file));

        if let Some(chunk) = stream.current.take() {
            Self::emit_close(&tubes, file, chunk);
        } else if !file.is_failed() && stream.detector.is_some() && file.chunks().is_empty() {
            // Zero-byte file in chunked mode still yields exactly one
            // (empty) chunk.
            let chunk = stream.ensure_current(file, 0);
            stream.current = None;
            Self::emit_close(&tubes, file, chunk);
        }

        if stream.bulk_active {
            if let Some(bulk) = stream.bulk.take() {
                Self::emit_close(&tubes, file, bulk);
            } else if !file.is_failed() {
                let bulk = stream.ensure_bulk(file);
                stream.bulk = None;
                Self::emit_close(&tubes, file, bulk);
            }
        }

        // The "file still being read" reference ends here.
        if file.release() {
            self.tubes_register.dispatch(Arc::clone(file));
        }
    }
}

impl TubeConsumer for TaskChunk {
    type Item = BlockItem;

    fn process(&mut self, block: BlockItem) {
        let tag = block.tag();
        let (file, _chunk, _tag, payload) = block.into_parts();
        match payload {
            BlockPayload::Data(bytes) => {
                let len = bytes.len() as u64;
                self.on_data(&file, tag, bytes);
                if let Some(stream) = self.streams.get_mut(&tag) {
                    stream.offset += len;
                }
            }
            BlockPayload::Stop => self.on_stop(&file, tag),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::CompressionAlgorithm;
    use crate::config::ChunkingPolicy;
    use crate::digest::HashAlgorithm;
    use crate::tube::Tube;
    use casfs_upload::HashSuffix;

    const BLOCK: usize = 1024;

    fn file_item(policy: ChunkingPolicy, legacy_bulk: bool) -> Arc<FileItem> {
        Arc::new(FileItem::new(
            "./testfile",
            policy,
            CompressionAlgorithm::None,
            HashAlgorithm::Sha1,
            HashSuffix::None,
            legacy_bulk,
        ))
    }

    fn policy(min: u64, avg: u64, max: u64) -> ChunkingPolicy {
        ChunkingPolicy {
            enabled: true,
            min_size: min,
            avg_size: avg,
            max_size: max,
        }
    }

    struct Rig {
        task: TaskChunk,
        out: Arc<TubeGroup<BlockItem>>,
        register: Arc<TubeGroup<Arc<FileItem>>>,
    }

    impl Rig {
        fn new() -> Self {
            let out = Arc::new(TubeGroup::new(1, 1 << 20));
            let register = Arc::new(TubeGroup::new(1, 64));
            let task = TaskChunk::new(Arc::clone(&out), Arc::clone(&register));
            Self {
                task,
                out,
                register,
            }
        }

        fn feed_data(&mut self, file: &Arc<FileItem>, bytes: &[u8]) {
            self.task.process(BlockItem::data(
                Arc::clone(file),
                None,
                file.tag(),
                Bytes::copy_from_slice(bytes),
            ));
        }

        fn feed_stop(&mut self, file: &Arc<FileItem>) {
            self.task
                .process(BlockItem::stop(Arc::clone(file), None, file.tag()));
        }

        fn drain(&self) -> Vec<BlockItem> {
            let tube: Arc<Tube<BlockItem>> = self.out.tube(0);
            let mut blocks = Vec::new();
            while !tube.is_empty() {
                if let Some(b) = tube.pop() {
                    blocks.push(b);
                }
            }
            blocks
        }
    }

    #[test]
    fn empty_chunked_file_yields_one_empty_chunk() {
        let mut rig = Rig::new();
        let file = file_item(policy(1024, 2048, 4096), false);
        rig.feed_stop(&file);

        let blocks = rig.drain();
        assert_eq!(blocks.len(), 1);
        let stop = &blocks[0];
        assert!(stop.is_stop());
        let chunk = stop.chunk().unwrap();
        assert!(!chunk.is_bulk());
        assert_eq!(chunk.size(), 0);
        assert!(Arc::ptr_eq(chunk.file(), &file));
    }

    #[test]
    fn non_chunkable_file_yields_bulk_chunk() {
        let mut rig = Rig::new();
        let file = file_item(policy(1024, 2048, 4096), false);
        file.set_may_have_chunks(false);
        rig.feed_stop(&file);

        let blocks = rig.drain();
        assert_eq!(blocks.len(), 1);
        let chunk = blocks[0].chunk().unwrap();
        assert!(chunk.is_bulk());
        assert_eq!(chunk.size(), 0);
        assert!(file.bulk_chunk().is_some());
    }

    #[test]
    fn legacy_bulk_emits_chunked_then_bulk_stream() {
        let mut rig = Rig::new();
        let file = file_item(policy(1024, 2048, 4096), true);
        rig.feed_stop(&file);

        let blocks = rig.drain();
        assert_eq!(blocks.len(), 2);
        assert!(!blocks[0].chunk().unwrap().is_bulk());
        assert!(blocks[1].chunk().unwrap().is_bulk());
    }

    #[test]
    fn legacy_bulk_duplicates_content() {
        let mut rig = Rig::new();
        let file = file_item(policy(512, 1024, 2048), true);
        let data: Vec<u8> = (0..8 * BLOCK).map(|i| (i % 253) as u8).collect();
        for block in data.chunks(BLOCK) {
            rig.feed_data(&file, block);
        }
        rig.feed_stop(&file);

        let mut bulk_bytes = Vec::new();
        let mut chunk_bytes = Vec::new();
        for block in rig.drain() {
            let is_bulk = block.chunk().unwrap().is_bulk();
            if let BlockPayload::Data(bytes) = block.payload() {
                if is_bulk {
                    bulk_bytes.extend_from_slice(bytes);
                } else {
                    chunk_bytes.extend_from_slice(bytes);
                }
            }
        }
        assert_eq!(bulk_bytes, data);
        assert_eq!(chunk_bytes, data);
        assert_eq!(file.bulk_chunk().unwrap().size(), data.len() as u64);
    }

    #[test]
    fn chunk_streams_are_bounded_ordered_and_complete() {
        let mut rig = Rig::new();
        let avg = 4 * BLOCK as u64;
        let file = file_item(policy(avg / 2, avg, avg * 2), false);
        let nblocks = 4096usize;
        let mut state = 7u64;
        let data: Vec<u8> = (0..nblocks * BLOCK)
            .map(|_| {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
                (state >> 32) as u8
            })
            .collect();
        for block in data.chunks(BLOCK) {
            rig.feed_data(&file, block);
        }
        rig.feed_stop(&file);

        let mut consumed = 0u64;
        let mut chunk_size = 0u64;
        let mut current_tag: Option<u64> = None;
        let mut last_offset = 0u64;
        let mut reassembled = Vec::new();
        let blocks = rig.drain();
        for block in &blocks {
            let chunk = block.chunk().unwrap();
            assert!(!chunk.is_bulk());
            match current_tag {
                None => current_tag = Some(block.tag()),
                Some(tag) => assert_eq!(tag, block.tag(), "stream interleaved"),
            }
            match block.payload() {
                BlockPayload::Data(bytes) => {
                    chunk_size += bytes.len() as u64;
                    last_offset = chunk.offset();
                    reassembled.extend_from_slice(bytes);
                    consumed += bytes.len() as u64;
                }
                BlockPayload::Stop => {
                    if consumed < data.len() as u64 {
                        assert!(chunk_size >= avg / 2, "undersized chunk {chunk_size}");
                    }
                    assert!(chunk_size <= avg * 2, "oversized chunk {chunk_size}");
                    assert_eq!(chunk.size(), chunk_size);
                    assert_eq!(consumed, last_offset + chunk_size);
                    chunk_size = 0;
                    current_tag = None;
                }
            }
        }
        assert_eq!(consumed, data.len() as u64);
        assert_eq!(reassembled, data);
        let chunks = file.chunks();
        assert!(chunks.len() > 1);
        assert_eq!(
            chunks.iter().map(|c| c.size()).sum::<u64>(),
            data.len() as u64
        );
        // Offsets are non-decreasing and contiguous.
        let mut expected_offset = 0u64;
        for chunk in &chunks {
            assert_eq!(chunk.offset(), expected_offset);
            expected_offset += chunk.size();
        }
    }

    #[test]
    fn failed_file_with_no_blocks_registers_immediately() {
        let mut rig = Rig::new();
        let file = file_item(policy(1024, 2048, 4096), false);
        file.fail(crate::error::IngestError::Compression("boom".into()));
        rig.feed_stop(&file);

        assert!(rig.drain().is_empty());
        assert!(file.chunks().is_empty());
        let registered = rig.register.tube(0).pop().unwrap();
        assert!(Arc::ptr_eq(&registered, &file));
    }

    #[test]
    fn open_chunk_is_closed_even_when_file_failed_midstream() {
        let mut rig = Rig::new();
        let file = file_item(policy(4096, 8192, 16384), false);
        rig.feed_data(&file, &[0xaa; 1024]);
        file.fail(crate::error::IngestError::Compression("late".into()));
        rig.feed_stop(&file);

        let blocks = rig.drain();
        assert!(blocks.last().unwrap().is_stop());
        assert_eq!(file.chunks().len(), 1);
        // One chunk reference still alive; no premature registration.
        assert!(rig.register.tube(0).is_empty());
    }
}
