//! Fixed-size pool of named worker threads draining a [`BoundedQueue`].
//!
//! Each worker runs the same loop until it takes a stop signal:
//!
//! ```text
//! loop {
//!     item = queue.get()
//!     Stop      -> ack, exit
//!     Job(job)  -> handler(job), ack
//! }
//! ```
//!
//! The dispatcher must enqueue one [`WorkItem::Stop`] per worker after all real
//! work, then wait on [`BoundedQueue::join`] and finally [`WorkerPool::join`].

use crate::pipeline::{BoundedQueue, WorkItem};
use anyhow::Result;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

type WorkerFn = Box<dyn FnOnce() -> Result<usize> + Send + 'static>;

/// Handles to a running set of workers.
pub struct WorkerPool {
    name: String,
    handles: Vec<JoinHandle<Result<usize>>>,
}

impl WorkerPool {
    /// Spawn `count` workers named `{name}-{i}` that pass every job to `handler`.
    ///
    /// If a thread cannot be spawned, the workers already started are stopped
    /// and joined before the error is returned.
    pub fn spawn<T, F>(
        name: &str,
        count: usize,
        queue: Arc<BoundedQueue<WorkItem<T>>>,
        handler: F,
    ) -> Result<Self>
    where
        T: Send + 'static,
        F: Fn(T) + Send + Sync + 'static,
    {
        Self::spawn_with(name, count, queue, handler, |builder, worker| builder.spawn(worker))
    }

    fn spawn_with<T, F, S>(
        name: &str,
        count: usize,
        queue: Arc<BoundedQueue<WorkItem<T>>>,
        handler: F,
        mut spawn_thread: S,
    ) -> Result<Self>
    where
        T: Send + 'static,
        F: Fn(T) + Send + Sync + 'static,
        S: FnMut(thread::Builder, WorkerFn) -> std::io::Result<JoinHandle<Result<usize>>>,
    {
        let handler = Arc::new(handler);
        let mut handles = Vec::with_capacity(count);

        for worker_id in 0..count {
            let worker_queue = queue.clone();
            let handler = handler.clone();
            let builder = thread::Builder::new().name(format!("{}-{}", name, worker_id));

            match spawn_thread(
                builder,
                Box::new(move || run_worker(&worker_queue, handler.as_ref())),
            ) {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    let started = Self {
                        name: name.to_string(),
                        handles,
                    };
                    // Never blocks, even on a full queue
                    for _ in 0..started.size() {
                        queue.requeue(WorkItem::Stop);
                    }
                    if let Err(join_err) = started.join() {
                        tracing::warn!("Partially started {} pool failed: {}", name, join_err);
                    }
                    return Err(anyhow::Error::new(e)
                        .context(format!("Failed to spawn worker {}-{}", name, worker_id)));
                }
            }
        }

        tracing::debug!("Started {} {} workers", count, name);

        Ok(Self {
            name: name.to_string(),
            handles,
        })
    }

    /// Number of workers in the pool.
    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Enqueue one stop signal per worker.
    pub fn signal_stop<T>(&self, queue: &BoundedQueue<WorkItem<T>>) {
        for _ in 0..self.handles.len() {
            queue.put(WorkItem::Stop);
        }
    }

    /// Wait for every worker thread to exit.
    ///
    /// Returns the number of jobs each worker handled, in worker order.
    pub fn join(self) -> Result<Vec<usize>> {
        let mut handled = Vec::with_capacity(self.handles.len());
        let mut first_error = None;

        for (worker_id, handle) in self.handles.into_iter().enumerate() {
            match handle.join() {
                Ok(Ok(count)) => handled.push(count),
                Ok(Err(e)) => {
                    tracing::error!("Worker {}-{} failed: {}", self.name, worker_id, e);
                    first_error.get_or_insert(e);
                }
                Err(_) => {
                    first_error.get_or_insert(anyhow::anyhow!(
                        "Worker {}-{} panicked",
                        self.name,
                        worker_id
                    ));
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(handled),
        }
    }
}

/// Worker loop. Returns the number of jobs handled before the stop signal.
fn run_worker<T, F>(queue: &BoundedQueue<WorkItem<T>>, handler: &F) -> Result<usize>
where
    F: Fn(T),
{
    let mut handled = 0;

    loop {
        match queue.get() {
            WorkItem::Stop => {
                queue.ack()?;
                break;
            }
            WorkItem::Job(job) => {
                // A panicking job must still be acknowledged or join() never returns
                if panic::catch_unwind(AssertUnwindSafe(|| handler(job))).is_err() {
                    tracing::error!("Job handler panicked; item acknowledged and dropped");
                }
                queue.ack()?;
                handled += 1;
            }
        }
    }

    tracing::debug!(
        "{} worker shutting down...",
        thread::current().name().unwrap_or("unnamed")
    );

    Ok(handled)
}
