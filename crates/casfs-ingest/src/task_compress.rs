//! Compress stage: stream-compress each chunk's bytes independently.
//!
//! One compressor per chunk stream, opened lazily and closed on the
//! stream's Stop. Output is re-emitted as Data blocks whose boundaries
//! carry no meaning; the Stop flushes the trailing bytes first, so even an
//! empty chunk produces the compressor's canonical empty-input output. A
//! compressor failure fails the chunk (and with it the file) but the Stop
//! still flows, so downstream per-stream state unwinds normally.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use tracing::debug;

use crate::compression::StreamCompressor;
use crate::error::IngestError;
use crate::item::{BlockItem, BlockPayload, ChunkItem, FileItem};
use crate::task::TubeConsumer;
use crate::tube::TubeGroup;

/// Transforms chunk streams through per-chunk streaming compressors.
pub struct TaskCompress {
    tubes_out: Arc<TubeGroup<BlockItem>>,
    compressors: HashMap<u64, StreamCompressor>,
}

impl TaskCompress {
    /// Compressor forwarding into the write stage.
    pub fn new(tubes_out: Arc<TubeGroup<BlockItem>>) -> Self {
        Self {
            tubes_out,
            compressors: HashMap::new(),
        }
    }

    fn fail_chunk(file: &Arc<FileItem>, chunk: &Arc<ChunkItem>, error: IngestError) {
        debug!(tag = chunk.tag(), %error, "chunk compression failed");
        chunk.mark_failed();
        file.fail(error);
    }

    fn emit(&self, file: &Arc<FileItem>, chunk: &Arc<ChunkItem>, tag: u64, bytes: Bytes) {
        if bytes.is_empty() {
            return;
        }
        chunk.add_compressed(bytes.len() as u64);
        self.tubes_out.dispatch(BlockItem::data(
            Arc::clone(file),
            Some(Arc::clone(chunk)),
            tag,
            bytes,
        ));
    }

    fn on_data(&mut self, file: &Arc<FileItem>, chunk: &Arc<ChunkItem>, tag: u64, bytes: &[u8]) {
        if chunk.is_failed() {
            self.compressors.remove(&tag);
            return;
        }
        let compressor = match self.compressors.entry(tag) {
            std::collections::hash_map::Entry::Occupied(e) => e.into_mut(),
            std::collections::hash_map::Entry::Vacant(e) => {
                match StreamCompressor::new(file.compression()) {
                    Ok(c) => e.insert(c),
                    Err(error) => {
                        Self::fail_chunk(file, chunk, error);
                        return;
                    }
                }
            }
        };
        if let Err(error) = compressor.write(bytes) {
            self.compressors.remove(&tag);
            Self::fail_chunk(file, chunk, error);
            return;
        }
        let out = compressor.take_output();
        self.emit(file, chunk, tag, out);
    }

    fn on_stop(&mut self, file: &Arc<FileItem>, chunk: &Arc<ChunkItem>, tag: u64) {
        let compressor = self.compressors.remove(&tag);
        if chunk.is_failed() {
            return;
        }
        let finished = match compressor {
            Some(c) => c.finish(),
            // Empty stream: the canonical empty-input output still counts.
            None => StreamCompressor::new(file.compression()).and_then(|c| c.finish()),
        };
        match finished {
            Ok(trailing) => self.emit(file, chunk, tag, trailing),
            Err(error) => Self::fail_chunk(file, chunk, error),
        }
    }
}

impl TubeConsumer for TaskCompress {
    type Item = BlockItem;

    fn process(&mut self, block: BlockItem) {
        let tag = block.tag();
        let (file, chunk, _tag, payload) = block.into_parts();
        let Some(chunk) = chunk else {
            // Streams without a chunk identity never reach this stage; pass
            // them along untouched.
            let block = match payload {
                BlockPayload::Data(bytes) => BlockItem::data(file, None, tag, bytes),
                BlockPayload::Stop => BlockItem::stop(file, None, tag),
            };
            self.tubes_out.dispatch(block);
            return;
        };
        match payload {
            BlockPayload::Data(bytes) => self.on_data(&file, &chunk, tag, &bytes),
            BlockPayload::Stop => {
                self.on_stop(&file, &chunk, tag);
                self.tubes_out
                    .dispatch(BlockItem::stop(file, Some(chunk), tag));
            }
        }
    }
}
