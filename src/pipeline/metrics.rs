//! Throughput monitoring and the shared ingest counter.

use crossbeam_channel::{select, tick, Receiver, Sender};
use serde::{Serialize, Serializer};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_f64(duration.as_secs_f64())
}

/// Running total of successfully ingested records.
///
/// Only ever incremented; callers get snapshot reads, never the raw cell.
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `n` and return the new total.
    pub fn add(&self, n: u64) -> u64 {
        self.value.fetch_add(n, Ordering::SeqCst) + n
    }

    /// Current total.
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::SeqCst)
    }
}

/// Metrics for both pipeline phases.
#[derive(Debug, Default)]
pub struct Metrics {
    /// Files written to the data directory
    pub files_downloaded: AtomicU64,

    /// Files dropped after a fetch error
    pub files_failed: AtomicU64,

    /// Bytes written to downloaded files
    pub bytes_downloaded: AtomicU64,

    /// Batches produced by the dataset reader
    pub batches_read: AtomicU64,

    /// Batches accepted by the sink
    pub batches_ingested: AtomicU64,

    /// Records accepted by the sink
    pub records_ingested: AtomicU64,

    /// Individual bulk attempts that failed
    pub bulk_failures: AtomicU64,

    /// Batches put back on the queue after exhausting their attempts
    pub batches_requeued: AtomicU64,

    /// Batches abandoned after hitting the requeue limit
    pub batches_dropped: AtomicU64,

    /// Time spent inside bulk submissions (microseconds, summed across threads)
    pub bulk_us: AtomicU64,

    start_time: Option<Instant>,
}

impl Metrics {
    /// Create new metrics.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        })
    }

    pub fn add_file_downloaded(&self, bytes: u64) {
        self.files_downloaded.fetch_add(1, Ordering::Relaxed);
        self.bytes_downloaded.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn add_file_failed(&self) {
        self.files_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_batch_read(&self) {
        self.batches_read.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a batch of `records` accepted by the sink.
    pub fn add_batch_ingested(&self, records: u64) {
        self.batches_ingested.fetch_add(1, Ordering::Relaxed);
        self.records_ingested.fetch_add(records, Ordering::Relaxed);
    }

    pub fn add_bulk_failure(&self) {
        self.bulk_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_batch_requeued(&self) {
        self.batches_requeued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_batch_dropped(&self) {
        self.batches_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record time spent in one bulk submission.
    pub fn add_bulk_time(&self, duration: Duration) {
        self.bulk_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    /// Get elapsed time since start.
    pub fn elapsed(&self) -> Duration {
        self.start_time.map_or(Duration::ZERO, |t| t.elapsed())
    }

    /// Records accepted per second since start.
    pub fn records_per_second(&self) -> f64 {
        let records = self.records_ingested.load(Ordering::Relaxed);
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            records as f64 / elapsed
        } else {
            0.0
        }
    }

    /// Download throughput in MB/s since start.
    pub fn download_throughput_mbps(&self) -> f64 {
        let bytes = self.bytes_downloaded.load(Ordering::Relaxed);
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            bytes as f64 / (1024.0 * 1024.0) / elapsed
        } else {
            0.0
        }
    }

    /// Get a snapshot of current metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            files_downloaded: self.files_downloaded.load(Ordering::Relaxed),
            files_failed: self.files_failed.load(Ordering::Relaxed),
            bytes_downloaded: self.bytes_downloaded.load(Ordering::Relaxed),
            batches_read: self.batches_read.load(Ordering::Relaxed),
            batches_ingested: self.batches_ingested.load(Ordering::Relaxed),
            records_ingested: self.records_ingested.load(Ordering::Relaxed),
            bulk_failures: self.bulk_failures.load(Ordering::Relaxed),
            batches_requeued: self.batches_requeued.load(Ordering::Relaxed),
            batches_dropped: self.batches_dropped.load(Ordering::Relaxed),
            bulk_secs: self.bulk_us.load(Ordering::Relaxed) as f64 / 1_000_000.0,
            elapsed: self.elapsed(),
            records_per_second: self.records_per_second(),
            download_throughput_mbps: self.download_throughput_mbps(),
        }
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub files_downloaded: u64,
    pub files_failed: u64,
    pub bytes_downloaded: u64,
    pub batches_read: u64,
    pub batches_ingested: u64,
    pub records_ingested: u64,
    pub bulk_failures: u64,
    pub batches_requeued: u64,
    pub batches_dropped: u64,
    /// Total time spent in bulk calls (seconds, summed across threads)
    pub bulk_secs: f64,
    #[serde(serialize_with = "serialize_duration")]
    pub elapsed: Duration,
    pub records_per_second: f64,
    pub download_throughput_mbps: f64,
}

impl MetricsSnapshot {
    /// Save metrics to a JSON file.
    pub fn save_to_file(&self, path: &str) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        tracing::info!("Metrics saved to {}", path);
        Ok(())
    }
}

impl std::fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Files: {} downloaded, {} failed ({:.1} MB @ {:.1} MB/s) | \
             Batches: {} read, {} ingested, {} requeued, {} dropped | \
             Records: {} @ {:.1}/s | Bulk failures: {} | Elapsed: {:.1}s",
            self.files_downloaded,
            self.files_failed,
            self.bytes_downloaded as f64 / (1024.0 * 1024.0),
            self.download_throughput_mbps,
            self.batches_read,
            self.batches_ingested,
            self.batches_requeued,
            self.batches_dropped,
            self.records_ingested,
            self.records_per_second,
            self.bulk_failures,
            self.elapsed.as_secs_f64(),
        )
    }
}

/// Periodic metrics reporter running on its own thread.
pub struct MetricsReporter {
    metrics: Arc<Metrics>,
    interval_secs: u64,
}

impl MetricsReporter {
    /// Create a new metrics reporter.
    pub fn new(metrics: Arc<Metrics>, interval_secs: u64) -> Self {
        Self {
            metrics,
            interval_secs: interval_secs.max(1),
        }
    }

    /// Start reporting. Drop or call [`ReporterHandle::stop`] to end it.
    pub fn spawn(self) -> std::io::Result<ReporterHandle> {
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded(1);
        let handle = thread::Builder::new()
            .name("metrics-reporter".to_string())
            .spawn(move || self.run(shutdown_rx))?;

        Ok(ReporterHandle {
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    fn run(self, shutdown: Receiver<()>) {
        let ticker = tick(Duration::from_secs(self.interval_secs));

        loop {
            select! {
                recv(ticker) -> _ => {
                    tracing::info!("{}", self.metrics.snapshot());
                }
                recv(shutdown) -> _ => {
                    tracing::info!("Final: {}", self.metrics.snapshot());
                    break;
                }
            }
        }
    }

    /// Print a final summary.
    pub fn print_summary(&self) {
        let snapshot = self.metrics.snapshot();

        println!("\n=== Benchmark Metrics ===");
        println!("Total time: {:.1}s", snapshot.elapsed.as_secs_f64());
        println!(
            "Files downloaded: {} ({} failed)",
            snapshot.files_downloaded, snapshot.files_failed
        );
        println!(
            "Data downloaded: {:.2} MB",
            snapshot.bytes_downloaded as f64 / (1024.0 * 1024.0)
        );
        println!("Batches read: {}", snapshot.batches_read);
        println!("Batches ingested: {}", snapshot.batches_ingested);
        println!("Records ingested: {}", snapshot.records_ingested);
        println!("Ingest rate: {:.1} records/s", snapshot.records_per_second);
        println!("Bulk failures: {}", snapshot.bulk_failures);
        println!("Batches requeued: {}", snapshot.batches_requeued);
        if snapshot.batches_dropped > 0 {
            println!("Batches dropped: {}", snapshot.batches_dropped);
        }
        println!("Bulk time: {:.1}s (summed across workers)", snapshot.bulk_secs);
        println!("=========================\n");
    }
}

/// Handle to a running [`MetricsReporter`] thread.
pub struct ReporterHandle {
    shutdown: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl ReporterHandle {
    /// Emit the final report and wait for the reporter thread to exit.
    pub fn stop(mut self) {
        self.shutdown_now();
    }

    fn shutdown_now(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ReporterHandle {
    fn drop(&mut self) {
        self.shutdown_now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_concurrent_adds() {
        let counter = Arc::new(Counter::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let counter = counter.clone();
                thread::spawn(move || {
                    for _ in 0..1000 {
                        counter.add(3);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(counter.get(), 24_000);
    }

    #[test]
    fn test_counter_add_returns_total() {
        let counter = Counter::new();
        assert_eq!(counter.add(5), 5);
        assert_eq!(counter.add(2), 7);
        assert_eq!(counter.get(), 7);
    }

    #[test]
    fn test_metrics_snapshot() {
        let metrics = Metrics::new();

        metrics.add_file_downloaded(1024);
        metrics.add_file_downloaded(2048);
        metrics.add_file_failed();
        metrics.add_batch_read();
        metrics.add_batch_ingested(100);
        metrics.add_bulk_failure();
        metrics.add_batch_requeued();
        metrics.add_batch_dropped();

        let snapshot = metrics.snapshot();

        assert_eq!(snapshot.files_downloaded, 2);
        assert_eq!(snapshot.bytes_downloaded, 3072);
        assert_eq!(snapshot.files_failed, 1);
        assert_eq!(snapshot.batches_read, 1);
        assert_eq!(snapshot.batches_ingested, 1);
        assert_eq!(snapshot.records_ingested, 100);
        assert_eq!(snapshot.bulk_failures, 1);
        assert_eq!(snapshot.batches_requeued, 1);
        assert_eq!(snapshot.batches_dropped, 1);
    }

    #[test]
    fn test_bulk_timing() {
        let metrics = Metrics::new();
        metrics.add_bulk_time(Duration::from_millis(250));
        metrics.add_bulk_time(Duration::from_millis(250));

        assert!((metrics.snapshot().bulk_secs - 0.5).abs() < 0.001);
    }

    #[test]
    fn test_zero_elapsed_no_panic() {
        let metrics = Metrics {
            start_time: None,
            ..Default::default()
        };
        metrics.add_batch_ingested(10);

        assert_eq!(metrics.records_per_second(), 0.0);
        assert_eq!(metrics.download_throughput_mbps(), 0.0);
    }

    #[test]
    fn test_snapshot_display() {
        let metrics = Metrics::new();
        metrics.add_batch_ingested(42);
        metrics.add_batch_requeued();

        let display = format!("{}", metrics.snapshot());
        assert!(display.contains("Records: 42"));
        assert!(display.contains("1 requeued"));
    }

    #[test]
    fn test_snapshot_save_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.json");
        let metrics = Metrics::new();
        metrics.add_batch_ingested(7);

        metrics
            .snapshot()
            .save_to_file(path.to_str().unwrap())
            .unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["records_ingested"], 7);
    }

    #[test]
    fn test_reporter_stops_cleanly() {
        let reporter = MetricsReporter::new(Metrics::new(), 60);
        let handle = reporter.spawn().unwrap();
        handle.stop();
    }
}
