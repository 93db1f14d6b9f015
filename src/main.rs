//! Full-text search ingest benchmark CLI
//!
//! Download Wikipedia parquet files and bulk-index them into a search store.

use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use fts_ingest_bench::{run_benchmark, Config};

#[derive(Parser)]
#[command(name = "fts-ingest-bench")]
#[command(about = "Benchmark bulk ingestion of Wikipedia articles into a search store", long_about = None)]
struct Cli {
    /// Path to configuration file (defaults are used when omitted)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(flatten)]
    overrides: Overrides,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Command-line settings that take precedence over the config file.
#[derive(Args, Debug, Default)]
struct Overrides {
    /// Search store to ingest into
    #[arg(short, long, value_enum, global = true)]
    target: Option<Target>,

    /// Number of dataset files to download
    #[arg(short, long, global = true)]
    num_files: Option<usize>,

    /// Number of ingest worker threads
    #[arg(short = 'c', long, global = true)]
    ingest_thread_count: Option<usize>,

    /// Elasticsearch URL(s), comma delimited
    #[arg(long, global = true)]
    elastic_url: Option<String>,

    #[arg(long, global = true)]
    elastic_username: Option<String>,

    #[arg(long, global = true)]
    elastic_password: Option<String>,

    /// PEM CA certificate for TLS connections
    #[arg(long, global = true)]
    elastic_ca_cert: Option<PathBuf>,

    /// Ingest files already present in the data directory
    #[arg(long, global = true)]
    skip_download_dataset: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum Target {
    Elasticsearch,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the benchmark (default if no command specified)
    Run,

    /// Validate configuration
    Validate,

    /// Generate a sample configuration file
    GenerateConfig {
        /// Output path for configuration file
        #[arg(short, long, default_value = "config.yaml")]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer().with_thread_names(true))
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();

    match cli.command {
        None | Some(Commands::Run) => {
            run_command(cli.config, &cli.overrides)?;
        }

        Some(Commands::Validate) => {
            validate_command(cli.config, &cli.overrides)?;
        }

        Some(Commands::GenerateConfig { output }) => {
            generate_config_command(output)?;
        }
    }

    Ok(())
}

fn load_config(config_path: Option<PathBuf>, overrides: &Overrides) -> Result<Config> {
    let mut config = match config_path {
        Some(path) => Config::from_file(&path)?,
        None => Config::default(),
    };
    apply_overrides(&mut config, overrides);
    Ok(config)
}

fn apply_overrides(config: &mut Config, overrides: &Overrides) {
    // Elasticsearch is the only target
    if let Some(target) = overrides.target {
        tracing::debug!("Target: {:?}", target);
    }
    if let Some(n) = overrides.num_files {
        config.download.num_files = n;
    }
    if let Some(n) = overrides.ingest_thread_count {
        config.ingest.thread_count = n;
    }
    if let Some(urls) = &overrides.elastic_url {
        config.elasticsearch.urls = urls
            .split(',')
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty())
            .collect();
    }
    if let Some(username) = &overrides.elastic_username {
        config.elasticsearch.username = username.clone();
    }
    if let Some(password) = &overrides.elastic_password {
        config.elasticsearch.password = password.clone();
    }
    if let Some(ca_cert) = &overrides.elastic_ca_cert {
        config.elasticsearch.ca_cert = Some(ca_cert.clone());
    }
    if overrides.skip_download_dataset {
        config.download.skip = true;
    }
}

fn run_command(config_path: Option<PathBuf>, overrides: &Overrides) -> Result<()> {
    let config = load_config(config_path, overrides)?;
    let report = run_benchmark(config)?;
    println!("{}", report);
    Ok(())
}

fn validate_command(config_path: Option<PathBuf>, overrides: &Overrides) -> Result<()> {
    let config = load_config(config_path, overrides)?;
    config.validate()?;
    println!("Configuration is valid");
    Ok(())
}

fn generate_config_command(output: PathBuf) -> Result<()> {
    // Generate a commented YAML config
    let yaml = r#"# Full-text search ingest benchmark configuration

# === DOWNLOAD: Fetch dataset files into a local directory ===
download:
  # Set to true to ingest files already in data_dir
  skip: false

  # Concurrent download workers
  thread_count: 5

  # Files fetched are indices 0..num_files
  num_files: 5

  # Index is zero padded to this width in URLs and file names (null = no padding)
  zero_fill_width: 5

  file_format: "parquet"
  data_dir: "./test_data_dir"

  # {index} is replaced by the padded file index
  url_template: "https://huggingface.co/datasets/wikimedia/wikipedia/resolve/main/20231101.en/train-{index}-of-00041.parquet?download=true"

  # Bytes per write while streaming a file to disk
  chunk_size: 8192

  connect_timeout_secs: 30

# === INGEST: Bulk-index the dataset ===
ingest:
  # Concurrent ingest workers
  thread_count: 5

  # Records per bulk request
  batch_size: 1000

  # Batches buffered between the reader and the workers
  queue_capacity: 16

  # Bulk attempts per batch before it is requeued
  max_attempts: 3
  retry_backoff_ms: 50

  # Drop a batch after this many requeues (omit to retry forever)
  # max_requeues: 5

# === ELASTICSEARCH: Target cluster ===
elasticsearch:
  urls:
    - "http://localhost:9200"
  index: "idx-articles"
  username: "elastic"
  password: "elastic"

  # PEM CA certificate for self-signed clusters
  # ca_cert: "/path/to/http_ca.crt"

  timeout_secs: 60

# === METRICS: Progress reporting ===
metrics:
  enabled: true
  interval_secs: 10

  # Write the final metrics snapshot as JSON
  # output_path: "metrics.json"
"#;

    std::fs::write(&output, yaml)?;
    println!("Generated sample configuration at: {}", output.display());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_default() {
        // No subcommand - should default to Run
        let cli = Cli::try_parse_from(["fts-ingest-bench"]);
        assert!(cli.is_ok());
        let cli = cli.unwrap();
        assert!(cli.command.is_none());
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_cli_parse_flags() {
        let cli = Cli::try_parse_from([
            "fts-ingest-bench",
            "-t",
            "elasticsearch",
            "-n",
            "2",
            "-c",
            "8",
            "--elastic-url",
            "https://es1:9200, https://es2:9200",
            "--skip-download-dataset",
        ])
        .unwrap();

        assert_eq!(cli.overrides.target, Some(Target::Elasticsearch));

        let config = load_config(None, &cli.overrides).unwrap();
        assert_eq!(config.download.num_files, 2);
        assert_eq!(config.ingest.thread_count, 8);
        assert!(config.download.skip);
        assert_eq!(
            config.elasticsearch.urls,
            vec!["https://es1:9200", "https://es2:9200"]
        );
    }

    #[test]
    fn test_cli_rejects_unknown_target() {
        assert!(Cli::try_parse_from(["fts-ingest-bench", "-t", "solr"]).is_err());
    }

    #[test]
    fn test_cli_parse_validate() {
        let cli = Cli::try_parse_from(["fts-ingest-bench", "validate", "--config", "test.json"]);
        assert!(cli.is_ok());
    }

    #[test]
    fn test_generated_config_parses() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        generate_config_command(path.clone()).unwrap();

        let config = Config::from_file(&path).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config, Config::default());
    }
}
