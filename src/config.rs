//! Configuration for the ingest benchmark.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration for a benchmark run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Dataset download phase
    #[serde(default)]
    pub download: DownloadConfig,

    /// Ingest phase
    #[serde(default)]
    pub ingest: IngestConfig,

    /// Target search store
    #[serde(default)]
    pub elasticsearch: ElasticsearchConfig,

    /// Progress reporting
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Dataset download configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Skip the download phase and ingest whatever is already in `data_dir`
    #[serde(default)]
    pub skip: bool,

    /// Number of download worker threads
    #[serde(default = "default_download_threads")]
    pub thread_count: usize,

    /// Number of files to fetch (indices `0..num_files`)
    #[serde(default = "default_num_files")]
    pub num_files: usize,

    /// Zero-pad file indices to this width (`None` = no padding)
    #[serde(default = "default_zero_fill_width")]
    pub zero_fill_width: Option<usize>,

    /// Extension of downloaded files
    #[serde(default = "default_file_format")]
    pub file_format: String,

    /// Directory downloaded files are written to and read from
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Source URL; `{index}` is replaced by the (padded) file index
    #[serde(default = "default_url_template")]
    pub url_template: String,

    /// Work queue capacity (`None` = unbounded)
    #[serde(default)]
    pub queue_capacity: Option<usize>,

    /// Write chunk size in bytes
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Connect timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Whole-transfer timeout in seconds (`None` = no limit)
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            skip: false,
            thread_count: default_download_threads(),
            num_files: default_num_files(),
            zero_fill_width: default_zero_fill_width(),
            file_format: default_file_format(),
            data_dir: default_data_dir(),
            url_template: default_url_template(),
            queue_capacity: None,
            chunk_size: default_chunk_size(),
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: None,
        }
    }
}

/// Ingest configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Number of ingest worker threads
    #[serde(default = "default_ingest_threads")]
    pub thread_count: usize,

    /// Records per batch read from the dataset
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Batches buffered ahead of the workers; bounds memory in flight
    #[serde(default = "default_ingest_queue_capacity")]
    pub queue_capacity: usize,

    /// Bulk attempts per batch before it is requeued
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,

    /// Sleep between bulk attempts in milliseconds
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Requeues allowed per batch before it is dropped.
    /// Unset means a failing batch is requeued forever and the run never ends.
    #[serde(default)]
    pub max_requeues: Option<u32>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            thread_count: default_ingest_threads(),
            batch_size: default_batch_size(),
            queue_capacity: default_ingest_queue_capacity(),
            max_attempts: default_max_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
            max_requeues: None,
        }
    }
}

/// Elasticsearch connection configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElasticsearchConfig {
    /// Cluster node URLs
    #[serde(default = "default_elastic_urls")]
    pub urls: Vec<String>,

    /// Target index
    #[serde(default = "default_elastic_index")]
    pub index: String,

    #[serde(default = "default_elastic_username")]
    pub username: String,

    #[serde(default = "default_elastic_password")]
    pub password: String,

    /// CA certificate (PEM) for TLS clusters
    #[serde(default)]
    pub ca_cert: Option<PathBuf>,

    /// Per-request timeout in seconds
    #[serde(default = "default_elastic_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ElasticsearchConfig {
    fn default() -> Self {
        Self {
            urls: default_elastic_urls(),
            index: default_elastic_index(),
            username: default_elastic_username(),
            password: default_elastic_password(),
            ca_cert: None,
            timeout_secs: default_elastic_timeout_secs(),
        }
    }
}

/// Metrics reporting configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Log throughput periodically while running
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Reporting interval in seconds
    #[serde(default = "default_metrics_interval")]
    pub interval_secs: u64,

    /// Optional path to save metrics JSON after the run completes
    #[serde(default)]
    pub output_path: Option<String>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_metrics_interval(),
            output_path: None,
        }
    }
}

impl Config {
    /// Load configuration from a YAML or JSON file.
    /// Format is auto-detected from file extension (.yaml, .yml, or .json).
    pub fn from_file(path: &PathBuf) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        let config: Config = match ext {
            "yaml" | "yml" => serde_yaml::from_str(&contents)?,
            "json" => serde_json::from_str(&contents)?,
            _ => {
                // Try YAML first (it's a superset of JSON)
                serde_yaml::from_str(&contents)?
            }
        };
        Ok(config)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Load configuration from a JSON string.
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let config: Config = serde_json::from_str(json)?;
        Ok(config)
    }

    /// Serialize configuration to YAML.
    pub fn to_yaml(&self) -> anyhow::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.download.thread_count == 0 {
            anyhow::bail!("Download thread count must be > 0");
        }
        if !self.download.url_template.contains("{index}") {
            anyhow::bail!("URL template must contain an {{index}} placeholder");
        }
        if self.download.file_format.is_empty() {
            anyhow::bail!("File format must not be empty");
        }
        if self.download.queue_capacity == Some(0) {
            anyhow::bail!("Download queue capacity must be > 0");
        }
        if self.download.chunk_size == 0 {
            anyhow::bail!("Download chunk size must be > 0");
        }
        if self.ingest.thread_count == 0 {
            anyhow::bail!("Ingest thread count must be > 0");
        }
        if self.ingest.batch_size == 0 {
            anyhow::bail!("Batch size must be > 0");
        }
        if self.ingest.queue_capacity == 0 {
            anyhow::bail!("Ingest queue capacity must be > 0");
        }
        if self.ingest.max_attempts == 0 {
            anyhow::bail!("Max attempts must be > 0");
        }
        if self.elasticsearch.urls.iter().all(|u| u.trim().is_empty()) {
            anyhow::bail!("At least one Elasticsearch URL is required");
        }
        if self.elasticsearch.index.is_empty() {
            anyhow::bail!("Elasticsearch index must not be empty");
        }
        Ok(())
    }
}

// Default value functions for serde
fn default_download_threads() -> usize { 5 }
fn default_num_files() -> usize { 5 }
fn default_zero_fill_width() -> Option<usize> { Some(5) }
fn default_file_format() -> String { "parquet".to_string() }
fn default_data_dir() -> PathBuf { PathBuf::from("./test_data_dir") }
fn default_url_template() -> String {
    "https://huggingface.co/datasets/wikimedia/wikipedia/resolve/main/20231101.en/train-{index}-of-00041.parquet?download=true".to_string()
}
fn default_chunk_size() -> usize { 8192 }
fn default_connect_timeout_secs() -> u64 { 30 }
fn default_ingest_threads() -> usize { 5 }
fn default_batch_size() -> usize { 1000 }
fn default_ingest_queue_capacity() -> usize { 16 }
fn default_max_attempts() -> usize { 3 }
fn default_retry_backoff_ms() -> u64 { 50 }
fn default_elastic_urls() -> Vec<String> { vec!["http://localhost:9200".to_string()] }
fn default_elastic_index() -> String { "idx-articles".to_string() }
fn default_elastic_username() -> String { "elastic".to_string() }
fn default_elastic_password() -> String { "elastic".to_string() }
fn default_elastic_timeout_secs() -> u64 { 60 }
fn default_true() -> bool { true }
fn default_metrics_interval() -> u64 { 10 }
