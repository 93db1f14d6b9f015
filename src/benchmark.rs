//! Benchmark orchestration: optional download, then a timed ingest.

use crate::config::Config;
use crate::io::{FileSource, ParquetDataset};
use crate::pipeline::{DatasetDownloader, DatasetLoader, DownloadStats, Metrics};
use crate::sink::{IngestStats, Sink};
use anyhow::Result;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Timings and results of one benchmark run.
#[derive(Debug, Clone, PartialEq)]
pub struct BenchmarkReport {
    /// `None` when the download phase was skipped
    pub download: Option<DownloadStats>,
    pub download_elapsed: Option<Duration>,
    pub ingest_elapsed: Duration,
    pub stats: IngestStats,
}

impl std::fmt::Display for BenchmarkReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let (Some(download), Some(elapsed)) = (&self.download, self.download_elapsed) {
            writeln!(f, "{}", download)?;
            writeln!(f, "Download Elapsed Time: {:.2} seconds", elapsed.as_secs_f64())?;
        }
        write!(
            f,
            "Loaded {} documents in {:.2} seconds",
            self.stats.num_records,
            self.ingest_elapsed.as_secs_f64()
        )
    }
}

/// Runs the download and ingest phases against a file source and a sink.
pub struct Benchmark {
    config: Config,
    file_source: Arc<dyn FileSource>,
    sink: Arc<dyn Sink>,
    metrics: Arc<Metrics>,
}

impl Benchmark {
    pub fn new(
        config: Config,
        file_source: Arc<dyn FileSource>,
        sink: Arc<dyn Sink>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            config,
            file_source,
            sink,
            metrics,
        }
    }

    pub fn run(&self) -> Result<BenchmarkReport> {
        let (download, download_elapsed) = if self.config.download.skip {
            tracing::info!("Skipping dataset download");
            (None, None)
        } else {
            let start = Instant::now();
            let downloader = DatasetDownloader::new(
                &self.config.download,
                self.file_source.clone(),
                self.metrics.clone(),
            );
            let stats = downloader.download()?;
            let elapsed = start.elapsed();
            tracing::info!("Download Elapsed Time: {:.2} seconds", elapsed.as_secs_f64());
            (Some(stats), Some(elapsed))
        };

        let dataset = ParquetDataset::new(
            self.config.download.data_dir.clone(),
            &self.config.download.file_format,
            self.config.ingest.batch_size,
        );
        let loader = DatasetLoader::new(
            &self.config.ingest,
            Box::new(dataset),
            self.sink.clone(),
            self.metrics.clone(),
        );

        let start = Instant::now();
        let stats = loader.load()?;
        let ingest_elapsed = start.elapsed();
        tracing::info!(
            "Loaded {} documents in {:.2} seconds",
            stats.num_records,
            ingest_elapsed.as_secs_f64()
        );

        Ok(BenchmarkReport {
            download,
            download_elapsed,
            ingest_elapsed,
            stats,
        })
    }
}
