//! Register stage: finalize fully processed files.
//!
//! A file arrives here exactly once, after its last chunk reference was
//! released. The stage assembles the final descriptor, notifies every
//! result sink, updates the pipeline counters, and removes the file's
//! token from the in-flight counter tube — which is what `wait_for`
//! observes.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::item::FileItem;
use crate::result::{ChunkDescriptor, FileResult, IngestCounters, IngestStatus, ResultSink};
use crate::task::TubeConsumer;
use crate::tube::Tube;

/// Shared, growable list of result sinks.
pub type SinkList = Arc<Mutex<Vec<Arc<dyn ResultSink>>>>;

/// Builds final results and reports them.
pub struct TaskRegister {
    sinks: SinkList,
    tube_counter: Arc<Tube<Arc<FileItem>>>,
    counters: Arc<IngestCounters>,
}

impl TaskRegister {
    /// Registrar reporting through `sinks` and draining `tube_counter`.
    pub fn new(
        sinks: SinkList,
        tube_counter: Arc<Tube<Arc<FileItem>>>,
        counters: Arc<IngestCounters>,
    ) -> Self {
        Self {
            sinks,
            tube_counter,
            counters,
        }
    }

    fn build_result(file: &Arc<FileItem>) -> FileResult {
        let chunks = file.chunks();
        let bulk = file.bulk_chunk();

        let all_committed = chunks.iter().all(|c| c.is_committed())
            && bulk.as_ref().map(|c| c.is_committed()).unwrap_or(true)
            && (!chunks.is_empty() || bulk.is_some());

        let status = match file.take_error() {
            Some(error) => IngestStatus::Failed(error.to_string()),
            None if file.is_failed() || !all_committed => {
                IngestStatus::Failed("file failed without recorded error".into())
            }
            None => IngestStatus::Registered,
        };

        let descriptors = chunks
            .iter()
            .filter_map(|chunk| {
                chunk.digest().map(|digest| ChunkDescriptor {
                    offset: chunk.offset(),
                    size: chunk.size(),
                    digest,
                })
            })
            .collect();

        FileResult {
            path: file.path().to_path_buf(),
            size: file.size(),
            status,
            bulk_digest: bulk.as_ref().and_then(|c| c.digest()),
            chunks: descriptors,
        }
    }
}

impl TubeConsumer for TaskRegister {
    type Item = Arc<FileItem>;

    fn process(&mut self, file: Arc<FileItem>) {
        let result = Self::build_result(&file);

        self.counters
            .bytes_read
            .fetch_add(result.size, Ordering::Relaxed);
        let chunk_count =
            result.chunks.len() as u64 + u64::from(result.bulk_digest.is_some());
        self.counters
            .chunks_created
            .fetch_add(chunk_count, Ordering::Relaxed);
        if result.is_success() {
            self.counters
                .chunks_committed
                .fetch_add(chunk_count, Ordering::Relaxed);
            self.counters.files_registered.fetch_add(1, Ordering::Relaxed);
            info!(path = %result.path.display(), chunks = result.chunks.len(), "file registered");
        } else {
            self.counters.files_failed.fetch_add(1, Ordering::Relaxed);
            debug!(path = %result.path.display(), "file failed");
        }

        let sinks = self.sinks.lock().clone();
        for sink in sinks {
            sink.file_processed(result.clone());
        }

        // One token per in-flight file; wait_for() drains on this.
        self.tube_counter.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::CompressionAlgorithm;
    use crate::config::ChunkingPolicy;
    use crate::digest::{hash_bytes, HashAlgorithm};
    use crate::error::IngestError;
    use crate::item::ChunkItem;
    use crate::result::MemorySink;
    use casfs_upload::HashSuffix;

    struct Rig {
        task: TaskRegister,
        sink: Arc<MemorySink>,
        counter: Arc<Tube<Arc<FileItem>>>,
        counters: Arc<IngestCounters>,
    }

    impl Rig {
        fn new() -> Self {
            let sink = Arc::new(MemorySink::new());
            let sinks: SinkList = Arc::new(Mutex::new(vec![
                Arc::clone(&sink) as Arc<dyn ResultSink>
            ]));
            let counter = Arc::new(Tube::new(64));
            let counters = Arc::new(IngestCounters::default());
            let task = TaskRegister::new(sinks, Arc::clone(&counter), Arc::clone(&counters));
            Self {
                task,
                sink,
                counter,
                counters,
            }
        }
    }

    fn bare_file() -> Arc<FileItem> {
        Arc::new(FileItem::new(
            "./registered",
            ChunkingPolicy::default(),
            CompressionAlgorithm::None,
            HashAlgorithm::Sha1,
            HashSuffix::None,
            false,
        ))
    }

    fn committed_chunk(file: &Arc<FileItem>, offset: u64, payload: &[u8]) -> Arc<ChunkItem> {
        let chunk = Arc::new(ChunkItem::new(Arc::clone(file), offset, false));
        chunk.add_size(payload.len() as u64);
        chunk.set_digest(hash_bytes(HashAlgorithm::Sha1, payload));
        chunk.mark_committed();
        file.register_chunk(Arc::clone(&chunk));
        chunk
    }

    #[test]
    fn successful_file_reports_ordered_chunks() {
        let mut rig = Rig::new();
        let file = bare_file();
        file.record_read(8);
        committed_chunk(&file, 0, b"alpha");
        committed_chunk(&file, 5, b"bet");
        rig.counter.enqueue(Arc::clone(&file));

        rig.task.process(Arc::clone(&file));

        let results = rig.sink.results();
        assert_eq!(results.len(), 1);
        let result = &results[0];
        assert!(result.is_success());
        assert_eq!(result.size, 8);
        assert_eq!(result.chunks.len(), 2);
        assert!(result.chunks[0].offset < result.chunks[1].offset);
        assert!(result.bulk_digest.is_none());
        assert!(rig.counter.is_empty());

        let stats = rig.counters.snapshot();
        assert_eq!(stats.files_registered, 1);
        assert_eq!(stats.files_failed, 0);
        assert_eq!(stats.chunks_committed, 2);
        assert_eq!(stats.bytes_read, 8);
    }

    #[test]
    fn failed_file_reports_error_string() {
        let mut rig = Rig::new();
        let file = bare_file();
        file.fail(IngestError::Compression("deflate exploded".into()));
        rig.counter.enqueue(Arc::clone(&file));

        rig.task.process(Arc::clone(&file));

        let results = rig.sink.results();
        assert_eq!(results.len(), 1);
        match &results[0].status {
            IngestStatus::Failed(msg) => assert!(msg.contains("deflate exploded")),
            IngestStatus::Registered => panic!("expected failure"),
        }
        assert_eq!(rig.counters.snapshot().files_failed, 1);
    }

    #[test]
    fn uncommitted_chunk_means_failure() {
        let mut rig = Rig::new();
        let file = bare_file();
        let chunk = Arc::new(ChunkItem::new(Arc::clone(&file), 0, false));
        chunk.set_digest(hash_bytes(HashAlgorithm::Sha1, b"x"));
        file.register_chunk(chunk);
        rig.counter.enqueue(Arc::clone(&file));

        rig.task.process(Arc::clone(&file));

        assert!(!rig.sink.results()[0].is_success());
    }

    #[test]
    fn bulk_digest_reported() {
        let mut rig = Rig::new();
        let file = bare_file();
        let bulk = Arc::new(ChunkItem::new(Arc::clone(&file), 0, true));
        let digest = hash_bytes(HashAlgorithm::Sha1, b"whole");
        bulk.set_digest(digest);
        bulk.mark_committed();
        file.register_bulk_chunk(bulk);
        rig.counter.enqueue(Arc::clone(&file));

        rig.task.process(Arc::clone(&file));

        let result = &rig.sink.results()[0];
        assert!(result.is_success());
        assert_eq!(result.bulk_digest.unwrap(), digest);
        assert!(result.chunks.is_empty());
    }
}
