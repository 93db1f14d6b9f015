//! Producer/consumer pipeline for the download and ingest phases.

mod download;
mod ingest;
mod metrics;
mod queue;
mod worker_pool;


pub use download::{DatasetDownloader, DownloadStats, FileLayout};
pub use ingest::{DatasetLoader, RetryPolicy};
pub use metrics::{Counter, Metrics, MetricsReporter, MetricsSnapshot, ReporterHandle};
pub use queue::{BoundedQueue, WorkItem};
pub use worker_pool::WorkerPool;
