//! Stage workers: the consumer trait and the per-stage thread pool.

use std::sync::Arc;
use std::thread;

use tracing::debug;

use crate::tube::Tube;

/// Per-stage item processing logic.
///
/// The pipeline has a fixed, closed set of implementations (read, chunk,
/// hash, compress, write, register). Each worker owns its consumer
/// exclusively, so `process` takes `&mut self` and per-stream state needs
/// no locking.
pub trait TubeConsumer: Send {
    /// Item type drained from the input tube.
    type Item: Send;

    /// Handle one item.
    fn process(&mut self, item: Self::Item);

    /// Runs exactly once, on the worker thread, after the input ended.
    fn on_terminate(&mut self) {}
}

struct Worker<T> {
    tube: Arc<Tube<T>>,
    consumer: Box<dyn TubeConsumer<Item = T>>,
}

/// Owns and runs the workers of one pipeline stage.
///
/// Termination is cooperative: [`TubeConsumerGroup::terminate`] closes the
/// input tubes, each worker drains what is already queued, runs its
/// `on_terminate` hook, and exits. Workers never inspect item content to
/// decide when to stop.
pub struct TubeConsumerGroup<T> {
    workers: Vec<Worker<T>>,
    tubes: Vec<Arc<Tube<T>>>,
    handles: Vec<thread::JoinHandle<()>>,
    spawned: bool,
}

impl<T: Send + 'static> TubeConsumerGroup<T> {
    /// Empty group.
    pub fn new() -> Self {
        Self {
            workers: Vec::new(),
            tubes: Vec::new(),
            handles: Vec::new(),
            spawned: false,
        }
    }

    /// Bind a consumer to its input tube. Multiple consumers may share one
    /// tube (they compete for items) or each own their own (tag routing).
    pub fn add_consumer(&mut self, tube: Arc<Tube<T>>, consumer: Box<dyn TubeConsumer<Item = T>>) {
        if !self.tubes.iter().any(|t| Arc::ptr_eq(t, &tube)) {
            self.tubes.push(Arc::clone(&tube));
        }
        self.workers.push(Worker { tube, consumer });
    }

    /// Number of workers in the group.
    pub fn num_workers(&self) -> usize {
        self.workers.len() + self.handles.len()
    }

    /// Start one thread per worker.
    pub fn spawn(&mut self) {
        assert!(!self.spawned, "consumer group spawned twice");
        self.spawned = true;
        for (i, mut worker) in self.workers.drain(..).enumerate() {
            let handle = thread::Builder::new()
                .name(format!("casfs-worker-{i}"))
                .spawn(move || {
                    while let Some(item) = worker.tube.pop() {
                        worker.consumer.process(item);
                    }
                    worker.consumer.on_terminate();
                })
                .expect("failed to spawn stage worker");
            self.handles.push(handle);
        }
        debug!(workers = self.handles.len(), "stage spawned");
    }

    /// Close the input tubes, let the workers drain them, and join.
    pub fn terminate(&mut self) {
        if !self.spawned {
            return;
        }
        for tube in &self.tubes {
            tube.close();
        }
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
        self.spawned = false;
        debug!("stage terminated");
    }

    /// True between `spawn` and `terminate`.
    pub fn is_running(&self) -> bool {
        self.spawned
    }
}

impl<T: Send + 'static> Default for TubeConsumerGroup<T> {
    fn default() -> Self {
        Self::new()
    }
}
