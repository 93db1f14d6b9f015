//! Bounded work queue shared by the download and ingest pipelines.
//!
//! The queue is the only synchronization point between the dispatcher and the
//! worker pool. Besides buffering items it tracks how many accepted items have
//! not yet been acknowledged, which is what [`BoundedQueue::join`] waits on:
//!
//! ```text
//! put()      outstanding += 1   (blocks while the buffer is at capacity)
//! get()      outstanding  = =   (blocks while the buffer is empty)
//! ack()      outstanding -= 1   (error if it would go below zero)
//! join()     blocks until outstanding == 0
//! ```

use anyhow::Result;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;

/// An item travelling through a worker queue.
///
/// `Stop` is a distinct variant rather than a reserved job value, so no real
/// job can ever be mistaken for a shutdown request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkItem<T> {
    /// A unit of real work.
    Job(T),
    /// Tells exactly one worker to exit.
    Stop,
}

impl<T> WorkItem<T> {
    /// Whether this item is a stop signal.
    pub fn is_stop(&self) -> bool {
        matches!(self, WorkItem::Stop)
    }
}

struct QueueState<T> {
    items: VecDeque<T>,
    /// Items accepted by put/requeue but not yet acknowledged.
    outstanding: usize,
}

/// A blocking FIFO with a capacity limit and task-done accounting.
pub struct BoundedQueue<T> {
    state: Mutex<QueueState<T>>,
    capacity: Option<usize>,
    not_empty: Condvar,
    not_full: Condvar,
    all_done: Condvar,
}

impl<T> BoundedQueue<T> {
    /// Create a queue that buffers at most `capacity` items.
    ///
    /// A capacity of zero is treated as one; a zero-sized buffer could never
    /// accept an item.
    pub fn bounded(capacity: usize) -> Self {
        Self::with_capacity(Some(capacity.max(1)))
    }

    /// Create a queue without a capacity limit. `put` never blocks.
    pub fn unbounded() -> Self {
        Self::with_capacity(None)
    }

    /// Create a queue from an optional capacity (`None` = unbounded).
    pub fn with_capacity(capacity: Option<usize>) -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(capacity.unwrap_or(0)),
                outstanding: 0,
            }),
            capacity: capacity.map(|c| c.max(1)),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            all_done: Condvar::new(),
        }
    }

    /// Enqueue an item at the back, blocking while the buffer is full.
    pub fn put(&self, item: T) {
        let mut state = self.state.lock();
        while self.is_full(&state) {
            self.not_full.wait(&mut state);
        }
        state.items.push_back(item);
        state.outstanding += 1;
        self.not_empty.notify_one();
    }

    /// Put an item back at the front of the queue, ignoring the capacity limit.
    ///
    /// Used by a worker that gives up on an item it dequeued. The caller still
    /// owes an `ack` for its original `get`. Never blocks, so a worker cannot
    /// deadlock against a producer that is itself blocked on a full buffer.
    pub fn requeue(&self, item: T) {
        let mut state = self.state.lock();
        state.items.push_front(item);
        state.outstanding += 1;
        self.not_empty.notify_one();
    }

    /// Dequeue the next item, blocking until one is available.
    ///
    /// Does not change the outstanding count; the caller must `ack` once it is
    /// done with the item.
    pub fn get(&self) -> T {
        let mut state = self.state.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                self.not_full.notify_one();
                return item;
            }
            self.not_empty.wait(&mut state);
        }
    }

    /// Acknowledge that one previously dequeued item is finished.
    pub fn ack(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.outstanding == 0 {
            anyhow::bail!("queue ack called more times than items were put");
        }
        state.outstanding -= 1;
        if state.outstanding == 0 {
            self.all_done.notify_all();
        }
        Ok(())
    }

    /// Block until every accepted item has been acknowledged.
    pub fn join(&self) {
        let mut state = self.state.lock();
        while state.outstanding > 0 {
            self.all_done.wait(&mut state);
        }
    }

    /// Number of accepted-but-unacknowledged items.
    pub fn outstanding(&self) -> usize {
        self.state.lock().outstanding
    }

    /// Number of items currently buffered.
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Capacity limit, `None` when unbounded.
    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    fn is_full(&self, state: &QueueState<T>) -> bool {
        self.capacity
            .is_some_and(|capacity| state.items.len() >= capacity)
    }
}
