//! Download phase: fetch indexed dataset files concurrently.
//!
//! The dispatcher enumerates `0..num_files`, hands each index to a pool of
//! download workers and waits for all of them. A failed fetch is logged and
//! the file dropped; there is no retry.

use crate::config::DownloadConfig;
use crate::io::{fetch_to_file, FileSource};
use crate::pipeline::{BoundedQueue, Metrics, WorkItem, WorkerPool};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Maps a file index to its source URL and local destination.
#[derive(Debug, Clone)]
pub struct FileLayout {
    url_template: String,
    zero_fill_width: Option<usize>,
    data_dir: PathBuf,
    file_format: String,
}

impl FileLayout {
    pub fn new(config: &DownloadConfig) -> Self {
        Self {
            url_template: config.url_template.clone(),
            zero_fill_width: config.zero_fill_width,
            data_dir: config.data_dir.clone(),
            file_format: config.file_format.clone(),
        }
    }

    /// Index as it appears in URLs and file names.
    pub fn format_index(&self, index: usize) -> String {
        match self.zero_fill_width {
            Some(width) => format!("{:0width$}", index, width = width),
            None => index.to_string(),
        }
    }

    pub fn url(&self, index: usize) -> String {
        self.url_template
            .replace("{index}", &self.format_index(index))
    }

    pub fn destination(&self, index: usize) -> PathBuf {
        self.data_dir
            .join(format!("{}.{}", self.format_index(index), self.file_format))
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}

/// Outcome of a download run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DownloadStats {
    pub requested: usize,
    pub downloaded: usize,
    pub failed: usize,
}

impl std::fmt::Display for DownloadStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Downloaded: {}, Failed: {}, Requested: {}",
            self.downloaded, self.failed, self.requested
        )
    }
}

/// Concurrent downloader for an indexed set of dataset files.
pub struct DatasetDownloader {
    layout: FileLayout,
    source: Arc<dyn FileSource>,
    metrics: Arc<Metrics>,
    num_files: usize,
    thread_count: usize,
    queue_capacity: Option<usize>,
    chunk_size: usize,
}

impl DatasetDownloader {
    pub fn new(config: &DownloadConfig, source: Arc<dyn FileSource>, metrics: Arc<Metrics>) -> Self {
        Self {
            layout: FileLayout::new(config),
            source,
            metrics,
            num_files: config.num_files,
            thread_count: config.thread_count.max(1),
            queue_capacity: config.queue_capacity,
            chunk_size: config.chunk_size,
        }
    }

    /// Create the destination directory (and parents).
    pub fn create_data_dir(&self) -> Result<()> {
        std::fs::create_dir_all(self.layout.data_dir()).with_context(|| {
            format!(
                "Failed to create data directory: {}",
                self.layout.data_dir().display()
            )
        })
    }

    /// Fetch every file and return once all are written or dropped.
    pub fn download(&self) -> Result<DownloadStats> {
        self.create_data_dir()?;

        let queue = Arc::new(BoundedQueue::with_capacity(self.queue_capacity));
        let downloaded = Arc::new(AtomicUsize::new(0));
        let failed = Arc::new(AtomicUsize::new(0));

        let pool = {
            let layout = self.layout.clone();
            let source = self.source.clone();
            let metrics = self.metrics.clone();
            let chunk_size = self.chunk_size;
            let downloaded = downloaded.clone();
            let failed = failed.clone();

            WorkerPool::spawn("download", self.thread_count, queue.clone(), move |index: usize| {
                let url = layout.url(index);
                let destination = layout.destination(index);
                tracing::info!("Working on {}", url);

                match fetch_to_file(source.as_ref(), &url, &destination, chunk_size) {
                    Ok(bytes) => {
                        tracing::debug!("Wrote {} bytes to {}", bytes, destination.display());
                        metrics.add_file_downloaded(bytes);
                        downloaded.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        tracing::error!("Error downloading the file: {:#}", e);
                        metrics.add_file_failed();
                        failed.fetch_add(1, Ordering::Relaxed);
                    }
                }
            })?
        };

        tracing::info!(
            "Downloading {} files with {} workers into {}",
            self.num_files,
            pool.size(),
            self.layout.data_dir().display()
        );

        for index in 0..self.num_files {
            queue.put(WorkItem::Job(index));
        }
        pool.signal_stop(&queue);

        queue.join();
        pool.join()?;

        let stats = DownloadStats {
            requested: self.num_files,
            downloaded: downloaded.load(Ordering::Relaxed),
            failed: failed.load(Ordering::Relaxed),
        };
        tracing::info!("Download complete: {}", stats);

        Ok(stats)
    }
}
