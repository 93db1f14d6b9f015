//! Ingest phase: stream dataset batches through a worker pool into a sink.
//!
//! ```text
//! ┌──────────────┐  put (blocks when full)  ┌──────────────┐  save_bulk  ┌──────┐
//! │ BatchSource  │─────────────────────────▶│ BoundedQueue │────────────▶│ Sink │
//! │ (this thread)│                          │  N workers   │◀─┐          └──────┘
//! └──────────────┘                          └──────────────┘  │ requeue after
//!                                                  └──────────┘ max_attempts
//! ```
//!
//! The reader runs on the calling thread, so a slow sink throttles reading and
//! memory stays near `queue_capacity + thread_count` batches.
//!
//! Every batch gets up to `max_attempts` bulk calls separated by a fixed
//! backoff. A batch that exhausts them is put back at the front of the queue.
//! Without `max_requeues` that repeats forever, so a batch the sink can never
//! accept keeps `load` from returning.

use crate::config::IngestConfig;
use crate::io::{Batch, BatchSource};
use crate::pipeline::{BoundedQueue, Metrics, WorkItem, WorkerPool};
use crate::sink::{documents_for, Document, IngestStats, Sink};
use anyhow::Result;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A batch on the ingest queue.
#[derive(Debug)]
struct IngestJob {
    batch: Batch,
    /// Times this batch has already been put back on the queue
    requeues: u32,
}

/// Bulk submission retry settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub backoff: Duration,
    /// `None` requeues failing batches without limit
    pub max_requeues: Option<u32>,
}

impl RetryPolicy {
    pub fn from_config(config: &IngestConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff: Duration::from_millis(config.retry_backoff_ms),
            max_requeues: config.max_requeues,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&IngestConfig::default())
    }
}

/// Per-worker state shared by every ingest thread.
struct IngestWorker {
    sink: Arc<dyn Sink>,
    queue: Arc<BoundedQueue<WorkItem<IngestJob>>>,
    policy: RetryPolicy,
    metrics: Arc<Metrics>,
}

impl IngestWorker {
    fn process(&self, job: IngestJob) {
        let records = job.batch.len();
        let documents = documents_for(self.sink.as_ref(), &job.batch);

        if self.submit_with_retry(&documents) {
            self.metrics.add_batch_ingested(records as u64);
            tracing::info!(
                "Ingested {} records ({} total)",
                records,
                self.sink.processed_count()
            );
            return;
        }

        match self.policy.max_requeues {
            Some(limit) if job.requeues >= limit => {
                tracing::error!(
                    "Dropping batch of {} records after {} requeues",
                    records,
                    job.requeues
                );
                self.metrics.add_batch_dropped();
            }
            _ => {
                tracing::warn!(
                    "Batch of {} records failed {} attempts, requeueing (requeue #{})",
                    records,
                    self.policy.max_attempts,
                    job.requeues + 1
                );
                self.metrics.add_batch_requeued();
                // Must happen before the pool acks the original dequeue
                self.queue.requeue(WorkItem::Job(IngestJob {
                    batch: job.batch,
                    requeues: job.requeues + 1,
                }));
            }
        }
    }

    /// Returns true once the sink fully accepts the documents.
    fn submit_with_retry(&self, documents: &[Document]) -> bool {
        for attempt in 1..=self.policy.max_attempts {
            let start = Instant::now();
            let result = self.sink.save_bulk(documents);
            self.metrics.add_bulk_time(start.elapsed());

            match result {
                Ok(true) => return true,
                Ok(false) => tracing::warn!(
                    "Bulk attempt {}/{} partially rejected",
                    attempt,
                    self.policy.max_attempts
                ),
                Err(e) => tracing::warn!(
                    "Bulk attempt {}/{} failed: {:#}",
                    attempt,
                    self.policy.max_attempts,
                    e
                ),
            }
            self.metrics.add_bulk_failure();

            if attempt < self.policy.max_attempts {
                std::thread::sleep(self.policy.backoff);
            }
        }
        false
    }
}

/// Loads a dataset into a sink with a fixed pool of ingest threads.
pub struct DatasetLoader {
    source: Box<dyn BatchSource>,
    sink: Arc<dyn Sink>,
    metrics: Arc<Metrics>,
    thread_count: usize,
    queue_capacity: usize,
    policy: RetryPolicy,
}

impl DatasetLoader {
    pub fn new(
        config: &IngestConfig,
        source: Box<dyn BatchSource>,
        sink: Arc<dyn Sink>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            source,
            sink,
            metrics,
            thread_count: config.thread_count.max(1),
            queue_capacity: config.queue_capacity.max(1),
            policy: RetryPolicy::from_config(config),
        }
    }

    /// Records accepted by the sink so far.
    pub fn processed_count(&self) -> u64 {
        self.sink.processed_count()
    }

    /// Ingest the whole dataset and return the store's final stats.
    ///
    /// If reading the dataset fails, workers still drain what was queued and
    /// are joined before the error is returned.
    pub fn load(&self) -> Result<IngestStats> {
        let queue = Arc::new(BoundedQueue::bounded(self.queue_capacity));

        let worker = IngestWorker {
            sink: self.sink.clone(),
            queue: queue.clone(),
            policy: self.policy,
            metrics: self.metrics.clone(),
        };
        let pool = WorkerPool::spawn("ingest", self.thread_count, queue.clone(), move |job| {
            worker.process(job)
        })?;

        tracing::info!(
            "Ingesting with {} workers (queue capacity {}, {} attempts per batch)",
            pool.size(),
            self.queue_capacity,
            self.policy.max_attempts
        );

        let produced = self.produce(&queue);

        // Stop signals go in only after every real batch
        pool.signal_stop(&queue);
        queue.join();
        let handled = pool.join()?;

        let produced = produced?;
        tracing::info!(
            "Ingest complete: {} batches read, {} jobs handled, {} records accepted",
            produced,
            handled.iter().sum::<usize>(),
            self.sink.processed_count()
        );

        Ok(self.sink.stats())
    }

    /// Feed every non-empty batch to the queue. Returns the number queued.
    fn produce(&self, queue: &BoundedQueue<WorkItem<IngestJob>>) -> Result<usize> {
        let mut produced = 0;

        for batch in self.source.batches()? {
            let batch = batch?;
            if batch.is_empty() {
                continue;
            }
            self.metrics.add_batch_read();
            queue.put(WorkItem::Job(IngestJob { batch, requeues: 0 }));
            produced += 1;
        }

        Ok(produced)
    }
}
