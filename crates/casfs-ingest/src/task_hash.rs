//! Hash stage: digest each chunk's uncompressed byte stream.
//!
//! Sits between the chunk and compress stages so it observes the
//! pre-compression bytes; blocks pass through untouched. Because the hash
//! stage finalizes a chunk's digest before forwarding the chunk's Stop, and
//! per-stream order is preserved end to end, the digest is always available
//! by the time the write stage finalizes the upload.

use std::collections::HashMap;
use std::sync::Arc;

use crate::digest::ChunkHasher;
use crate::item::{BlockItem, BlockPayload};
use crate::task::TubeConsumer;
use crate::tube::TubeGroup;

/// Computes content digests over chunk streams, forwarding blocks unchanged.
pub struct TaskHash {
    tubes_out: Arc<TubeGroup<BlockItem>>,
    hashers: HashMap<u64, ChunkHasher>,
}

impl TaskHash {
    /// Hasher forwarding into the compress stage.
    pub fn new(tubes_out: Arc<TubeGroup<BlockItem>>) -> Self {
        Self {
            tubes_out,
            hashers: HashMap::new(),
        }
    }
}

impl TubeConsumer for TaskHash {
    type Item = BlockItem;

    fn process(&mut self, block: BlockItem) {
        if let Some(chunk) = block.chunk() {
            let algorithm = chunk.file().hash_algorithm();
            match block.payload() {
                BlockPayload::Data(bytes) => {
                    self.hashers
                        .entry(block.tag())
                        .or_insert_with(|| ChunkHasher::new(algorithm))
                        .update(bytes);
                }
                BlockPayload::Stop => {
                    let hasher = self
                        .hashers
                        .remove(&block.tag())
                        .unwrap_or_else(|| ChunkHasher::new(algorithm));
                    chunk.set_digest(hasher.finalize());
                }
            }
        }
        self.tubes_out.dispatch(block);
    }
}
