//! Write stage: stream each chunk's compressed bytes to the uploader.
//!
//! One streamed-upload session per chunk, opened on the first Data block
//! and finalized with the chunk's digest on Stop. The commit callback —
//! which an asynchronous backend may run on its own thread — does the
//! file's reference bookkeeping: the thread that observes the count reach
//! zero dispatches the file for registration.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use casfs_upload::{HashSuffix, UploadHandle, Uploader};

use crate::error::IngestError;
use crate::item::{BlockItem, BlockPayload, ChunkItem, FileItem};
use crate::task::TubeConsumer;
use crate::tube::TubeGroup;

/// Uploads chunk objects and tracks per-chunk completion.
pub struct TaskWrite {
    uploader: Arc<dyn Uploader>,
    tubes_register: Arc<TubeGroup<Arc<FileItem>>>,
    sessions: HashMap<u64, UploadHandle>,
}

impl TaskWrite {
    /// Writer committing through `uploader`; completed files go to
    /// `tubes_register`.
    pub fn new(
        uploader: Arc<dyn Uploader>,
        tubes_register: Arc<TubeGroup<Arc<FileItem>>>,
    ) -> Self {
        Self {
            uploader,
            tubes_register,
            sessions: HashMap::new(),
        }
    }

    fn suffix_for(chunk: &ChunkItem) -> HashSuffix {
        if chunk.is_bulk() {
            chunk.file().hash_suffix()
        } else {
            HashSuffix::Partial
        }
    }

    fn fail_chunk(file: &Arc<FileItem>, chunk: &Arc<ChunkItem>, error: IngestError) {
        debug!(tag = chunk.tag(), %error, "chunk upload failed");
        chunk.mark_failed();
        file.fail(error);
    }

    /// Called once per chunk, after its stream ended and its commit (or
    /// failure) is settled.
    fn finish_chunk(tubes_register: &TubeGroup<Arc<FileItem>>, file: &Arc<FileItem>) {
        if file.release() {
            tubes_register.dispatch(Arc::clone(file));
        }
    }

    fn on_data(&mut self, file: &Arc<FileItem>, chunk: &Arc<ChunkItem>, tag: u64, bytes: bytes::Bytes) {
        if chunk.is_failed() {
            if let Some(handle) = self.sessions.remove(&tag) {
                self.uploader.abort_streamed_upload(handle);
            }
            return;
        }
        let handle = match self.sessions.get(&tag) {
            Some(h) => *h,
            None => match self.uploader.init_streamed_upload() {
                Ok(h) => {
                    self.sessions.insert(tag, h);
                    h
                }
                Err(error) => {
                    Self::fail_chunk(file, chunk, error.into());
                    return;
                }
            },
        };
        if let Err(error) = self.uploader.streamed_upload(handle, bytes) {
            self.sessions.remove(&tag);
            self.uploader.abort_streamed_upload(handle);
            Self::fail_chunk(file, chunk, error.into());
        }
    }

    fn on_stop(&mut self, file: &Arc<FileItem>, chunk: &Arc<ChunkItem>, tag: u64) {
        let session = self.sessions.remove(&tag);

        if chunk.is_failed() {
            if let Some(handle) = session {
                self.uploader.abort_streamed_upload(handle);
            }
            Self::finish_chunk(&self.tubes_register, file);
            return;
        }

        let Some(digest) = chunk.digest() else {
            if let Some(handle) = session {
                self.uploader.abort_streamed_upload(handle);
            }
            Self::fail_chunk(file, chunk, IngestError::MissingDigest(chunk.offset()));
            Self::finish_chunk(&self.tubes_register, file);
            return;
        };

        // A zero-output stream (empty chunk under passthrough compression)
        // never opened a session; the object still has to exist.
        let handle = match session {
            Some(h) => Some(h),
            None => match self.uploader.init_streamed_upload() {
                Ok(h) => Some(h),
                Err(error) => {
                    Self::fail_chunk(file, chunk, error.into());
                    None
                }
            },
        };
        let Some(handle) = handle else {
            Self::finish_chunk(&self.tubes_register, file);
            return;
        };

        let address = digest.address(Self::suffix_for(chunk));
        let cb_file = Arc::clone(file);
        let cb_chunk = Arc::clone(chunk);
        let cb_register = Arc::clone(&self.tubes_register);
        self.uploader.finalize_streamed_upload(
            handle,
            address,
            Box::new(move |outcome| {
                match outcome {
                    Ok(receipt) => {
                        debug!(
                            address = %receipt.address,
                            deduplicated = receipt.deduplicated,
                            "chunk committed"
                        );
                        cb_chunk.mark_committed();
                    }
                    Err(error) => {
                        Self::fail_chunk(&cb_file, &cb_chunk, error.into());
                    }
                }
                Self::finish_chunk(&cb_register, &cb_file);
            }),
        );
    }
}

impl TubeConsumer for TaskWrite {
    type Item = BlockItem;

    fn process(&mut self, block: BlockItem) {
        let tag = block.tag();
        let (file, chunk, _tag, payload) = block.into_parts();
        let Some(chunk) = chunk else {
            return;
        };
        match payload {
            BlockPayload::Data(bytes) => self.on_data(&file, &chunk, tag, bytes),
            BlockPayload::Stop => self.on_stop(&file, &chunk, tag),
        }
    }
}
