//! Full-text search ingest benchmark
//!
//! Downloads a slice of the Wikipedia parquet dataset and measures how fast it
//! can be bulk-indexed into a search store with a fixed pool of worker threads.
//!
//! # Architecture
//!
//! The benchmark consists of:
//!
//! - **Pipeline**: Bounded work queue, worker pools, and the download and ingest phases
//! - **I/O**: Streaming HTTP fetch of dataset files and projected parquet reading
//! - **Sink**: Search store abstraction with an Elasticsearch implementation
//! - **Benchmark**: Sequences both phases and reports timings
//!
//! # Usage
//!
//! ```no_run
//! use fts_ingest_bench::{Config, run_benchmark};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = Config::from_file(&"config.yaml".into())?;
//!     let report = run_benchmark(config)?;
//!     println!("{}", report);
//!     Ok(())
//! }
//! ```

pub mod benchmark;
pub mod config;
pub mod io;
pub mod pipeline;
pub mod sink;

pub use benchmark::{Benchmark, BenchmarkReport};
pub use config::Config;
pub use io::{HttpFileSource, ParquetDataset};
pub use pipeline::{DatasetDownloader, DatasetLoader, Metrics, MetricsReporter};
pub use sink::{ElasticsearchSink, IngestStats, Sink};

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

/// Run the full benchmark against Elasticsearch with the given configuration.
pub fn run_benchmark(config: Config) -> Result<BenchmarkReport> {
    config.validate()?;

    tracing::info!("Starting ingest benchmark");

    // Fatal before any worker starts if the cluster is unreachable
    let sink = Arc::new(ElasticsearchSink::connect(&config.elasticsearch)?);
    tracing::info!(
        "Indexing into '{}' on {}",
        sink.index(),
        config.elasticsearch.urls.join(",")
    );

    let file_source = Arc::new(HttpFileSource::new(
        Duration::from_secs(config.download.connect_timeout_secs),
        config.download.request_timeout_secs.map(Duration::from_secs),
    )?);

    let metrics = Metrics::new();
    let reporter = if config.metrics.enabled {
        Some(MetricsReporter::new(metrics.clone(), config.metrics.interval_secs).spawn()?)
    } else {
        None
    };

    let output_path = config.metrics.output_path.clone();
    let benchmark = Benchmark::new(config, file_source, sink, metrics.clone());
    let result = benchmark.run();

    if let Some(reporter) = reporter {
        reporter.stop();
    }
    MetricsReporter::new(metrics.clone(), 1).print_summary();

    if let Some(path) = output_path {
        metrics.snapshot().save_to_file(&path)?;
    }

    let report = result?;
    tracing::info!("Benchmark complete: {}", report.stats);

    Ok(report)
}
