//! Bounded blocking queues connecting pipeline stages.
//!
//! A [`Tube`] is the only explicitly synchronized structure in the
//! pipeline: producers block on a full tube (backpressure is the pipeline's
//! sole flow-control mechanism), consumers block on an empty one, and
//! [`Tube::wait_empty`] serves as a drain barrier. Shutdown is an explicit
//! closed state, never a sentinel item, so "no more input" can never be
//! confused with "end of the current stream".
//!
//! A [`TubeGroup`] shards items over its member tubes by `tag % N`. This
//! sharding function is part of the ordering contract, not an
//! implementation detail: all items carrying the same tag funnel through
//! the same tube, which is what preserves relative order within a
//! chunk stream end to end.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tracing::warn;

/// Items routable through a [`TubeGroup`].
pub trait Tagged {
    /// Routing key. Items sharing a tag share a tube, hence an order.
    fn tag(&self) -> u64;
}

struct TubeState<T> {
    queue: VecDeque<T>,
    closed: bool,
}

/// Bounded, thread-safe FIFO queue.
pub struct Tube<T> {
    state: Mutex<TubeState<T>>,
    capacity: usize,
    not_full: Condvar,
    not_empty: Condvar,
    drained: Condvar,
}

impl<T> Tube<T> {
    /// Tube holding at most `capacity` items.
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(TubeState {
                queue: VecDeque::new(),
                closed: false,
            }),
            capacity: capacity.max(1),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
            drained: Condvar::new(),
        }
    }

    /// Append an item, blocking while the tube is at capacity.
    ///
    /// Enqueueing on a closed tube drops the item; stage teardown runs
    /// upstream-first precisely so this cannot happen in a wired pipeline.
    pub fn enqueue(&self, item: T) {
        let mut state = self.state.lock();
        while state.queue.len() >= self.capacity && !state.closed {
            self.not_full.wait(&mut state);
        }
        if state.closed {
            warn!("enqueue on closed tube, dropping item");
            return;
        }
        state.queue.push_back(item);
        drop(state);
        self.not_empty.notify_one();
    }

    /// Remove and return the oldest item, blocking while the tube is empty.
    ///
    /// Returns `None` only once the tube is closed *and* drained.
    pub fn pop(&self) -> Option<T> {
        let mut state = self.state.lock();
        while state.queue.is_empty() && !state.closed {
            self.not_empty.wait(&mut state);
        }
        let item = state.queue.pop_front();
        let now_empty = state.queue.is_empty();
        drop(state);
        if item.is_some() {
            self.not_full.notify_one();
            if now_empty {
                self.drained.notify_all();
            }
        }
        item
    }

    /// Block until the tube is observably empty.
    ///
    /// A completion barrier, not a consumption operation: items already
    /// popped may still be in flight inside a consumer.
    pub fn wait_empty(&self) {
        let mut state = self.state.lock();
        while !state.queue.is_empty() {
            self.drained.wait(&mut state);
        }
    }

    /// Close the tube: producers are refused, consumers drain what is left
    /// and then observe the end of input.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        drop(state);
        self.not_empty.notify_all();
        self.not_full.notify_all();
        self.drained.notify_all();
    }

    /// Number of queued items.
    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// True if no items are queued.
    pub fn is_empty(&self) -> bool {
        self.state.lock().queue.is_empty()
    }
}

/// A set of tubes presented as one virtual output.
pub struct TubeGroup<T> {
    tubes: Vec<Arc<Tube<T>>>,
}

impl<T: Tagged> TubeGroup<T> {
    /// Group of `n` tubes, each with the given capacity.
    pub fn new(n: usize, capacity: usize) -> Self {
        let tubes = (0..n.max(1)).map(|_| Arc::new(Tube::new(capacity))).collect();
        Self { tubes }
    }

    /// Route an item to its member tube by `tag % N` and enqueue it there.
    pub fn dispatch(&self, item: T) {
        let idx = (item.tag() % self.tubes.len() as u64) as usize;
        self.tubes[idx].enqueue(item);
    }

    /// Member tube at `idx`.
    pub fn tube(&self, idx: usize) -> Arc<Tube<T>> {
        Arc::clone(&self.tubes[idx])
    }

    /// Number of member tubes.
    pub fn len(&self) -> usize {
        self.tubes.len()
    }

    /// Groups are never empty; present for completeness.
    pub fn is_empty(&self) -> bool {
        self.tubes.is_empty()
    }
}
