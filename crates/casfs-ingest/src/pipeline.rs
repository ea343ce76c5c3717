//! Pipeline wiring: tubes, stages, submission, and the completion barrier.
//!
//! Stage chain: read → chunk → hash → compress → write → register. The
//! hash stage precedes compression so content digests cover the
//! uncompressed bytes. Every inter-stage tube is bounded; a slow stage
//! blocks its upstream producers, which is the pipeline's only flow
//! control.
//!
//! Teardown is cooperative and ordered upstream-first: each stage drains
//! fully before the next one's tubes close, so everything submitted still
//! reaches a terminal state during `Drop`.

use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use casfs_upload::{HashSuffix, Uploader};

use crate::config::IngestConfig;
use crate::error::IngestResult;
use crate::item::{BlockItem, FileItem};
use crate::result::{IngestCounters, IngestStats, ResultSink};
use crate::task::TubeConsumerGroup;
use crate::task_chunk::TaskChunk;
use crate::task_compress::TaskCompress;
use crate::task_hash::TaskHash;
use crate::task_read::TaskRead;
use crate::task_register::{SinkList, TaskRegister};
use crate::task_write::TaskWrite;
use crate::tube::{Tube, TubeGroup};

/// The staged concurrent ingestion pipeline.
pub struct IngestionPipeline {
    config: IngestConfig,
    tube_input: Arc<Tube<Arc<FileItem>>>,
    // One token per file in flight; wait_for() drains on it. A counting
    // semaphore in tube clothing.
    tube_counter: Arc<Tube<Arc<FileItem>>>,
    sinks: SinkList,
    counters: Arc<IngestCounters>,

    tasks_read: TubeConsumerGroup<Arc<FileItem>>,
    tasks_chunk: TubeConsumerGroup<BlockItem>,
    tasks_hash: TubeConsumerGroup<BlockItem>,
    tasks_compress: TubeConsumerGroup<BlockItem>,
    tasks_write: TubeConsumerGroup<BlockItem>,
    tasks_register: TubeConsumerGroup<Arc<FileItem>>,
    spawned: bool,
}

impl IngestionPipeline {
    /// Wire a pipeline against `uploader` with the given configuration.
    pub fn new(uploader: Arc<dyn Uploader>, config: IngestConfig) -> IngestResult<Self> {
        config.validate()?;
        let w = config.workers;
        let cap = config.tube_capacity;

        let tube_input = Arc::new(Tube::new(cap));
        let tube_counter = Arc::new(Tube::new(config.max_files_in_flight));
        let tubes_register: Arc<TubeGroup<Arc<FileItem>>> =
            Arc::new(TubeGroup::new(w.register, cap));
        let tubes_write: Arc<TubeGroup<BlockItem>> = Arc::new(TubeGroup::new(w.write, cap));
        let tubes_compress: Arc<TubeGroup<BlockItem>> = Arc::new(TubeGroup::new(w.compress, cap));
        let tubes_hash: Arc<TubeGroup<BlockItem>> = Arc::new(TubeGroup::new(w.hash, cap));
        let tubes_chunk: Arc<TubeGroup<BlockItem>> = Arc::new(TubeGroup::new(w.chunk, cap));

        let sinks: SinkList = Arc::new(Mutex::new(Vec::new()));
        let counters = Arc::new(IngestCounters::default());

        let mut tasks_read = TubeConsumerGroup::new();
        for _ in 0..w.read {
            tasks_read.add_consumer(
                Arc::clone(&tube_input),
                Box::new(TaskRead::new(
                    Arc::clone(&tubes_chunk),
                    config.read_block_size,
                )),
            );
        }

        let mut tasks_chunk = TubeConsumerGroup::new();
        for i in 0..w.chunk {
            tasks_chunk.add_consumer(
                tubes_chunk.tube(i),
                Box::new(TaskChunk::new(
                    Arc::clone(&tubes_hash),
                    Arc::clone(&tubes_register),
                )),
            );
        }

        let mut tasks_hash = TubeConsumerGroup::new();
        for i in 0..w.hash {
            tasks_hash.add_consumer(
                tubes_hash.tube(i),
                Box::new(TaskHash::new(Arc::clone(&tubes_compress))),
            );
        }

        let mut tasks_compress = TubeConsumerGroup::new();
        for i in 0..w.compress {
            tasks_compress.add_consumer(
                tubes_compress.tube(i),
                Box::new(TaskCompress::new(Arc::clone(&tubes_write))),
            );
        }

        let mut tasks_write = TubeConsumerGroup::new();
        for i in 0..w.write {
            tasks_write.add_consumer(
                tubes_write.tube(i),
                Box::new(TaskWrite::new(
                    Arc::clone(&uploader),
                    Arc::clone(&tubes_register),
                )),
            );
        }

        let mut tasks_register = TubeConsumerGroup::new();
        for i in 0..w.register {
            tasks_register.add_consumer(
                tubes_register.tube(i),
                Box::new(TaskRegister::new(
                    Arc::clone(&sinks),
                    Arc::clone(&tube_counter),
                    Arc::clone(&counters),
                )),
            );
        }

        Ok(Self {
            config,
            tube_input,
            tube_counter,
            sinks,
            counters,
            tasks_read,
            tasks_chunk,
            tasks_hash,
            tasks_compress,
            tasks_write,
            tasks_register,
            spawned: false,
        })
    }

    /// Start every stage's worker threads.
    pub fn spawn(&mut self) {
        if self.spawned {
            return;
        }
        self.tasks_read.spawn();
        self.tasks_chunk.spawn();
        self.tasks_hash.spawn();
        self.tasks_compress.spawn();
        self.tasks_write.spawn();
        self.tasks_register.spawn();
        self.spawned = true;
        debug!("ingestion pipeline spawned");
    }

    /// Add an observer for per-file results.
    pub fn register_sink(&self, sink: Arc<dyn ResultSink>) {
        self.sinks.lock().push(sink);
    }

    /// Submit a file; returns immediately unless the in-flight limit
    /// applies backpressure.
    pub fn process(&self, path: impl AsRef<Path>, allow_chunking: bool, hash_suffix: HashSuffix) {
        let file = Arc::new(FileItem::for_config(
            path.as_ref(),
            &self.config,
            allow_chunking,
            hash_suffix,
        ));
        self.counters.files_submitted.fetch_add(1, Ordering::Relaxed);
        self.tube_counter.enqueue(Arc::clone(&file));
        self.tube_input.enqueue(file);
    }

    /// Block until every previously submitted file reached a terminal
    /// state and was reported. Requires a spawned pipeline.
    pub fn wait_for(&self) {
        self.tube_counter.wait_empty();
    }

    /// Snapshot of the pipeline counters.
    pub fn stats(&self) -> IngestStats {
        self.counters.snapshot()
    }

    /// The configuration the pipeline runs with.
    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Stop all stages, upstream first, draining everything in flight.
    pub fn terminate(&mut self) {
        if !self.spawned {
            return;
        }
        self.tasks_read.terminate();
        self.tasks_chunk.terminate();
        self.tasks_hash.terminate();
        self.tasks_compress.terminate();
        self.tasks_write.terminate();
        self.tasks_register.terminate();
        self.spawned = false;
        debug!("ingestion pipeline terminated");
    }
}

impl Drop for IngestionPipeline {
    fn drop(&mut self) {
        self.terminate();
    }
}
