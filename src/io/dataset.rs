//! Columnar dataset reader: scans the downloaded parquet files in batches.

use anyhow::{Context, Result};
use arrow::array::{Array, LargeStringArray, StringArray};
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::{ParquetRecordBatchReader, ParquetRecordBatchReaderBuilder};
use parquet::arrow::ProjectionMask;
use std::path::{Path, PathBuf};

/// Columns projected out of every dataset file.
pub const ARTICLE_COLUMNS: [&str; 3] = ["url", "title", "text"];

/// A single dataset record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Article {
    pub url: String,
    pub title: String,
    pub text: String,
}

impl Article {
    pub fn new(url: impl Into<String>, title: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            text: text.into(),
        }
    }
}

/// One chunk of records read from the dataset in a single I/O step.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Batch {
    articles: Vec<Article>,
}

impl Batch {
    pub fn new(articles: Vec<Article>) -> Self {
        Self { articles }
    }

    /// Convert a columnar record batch into row-wise articles.
    ///
    /// Null cells become empty strings.
    pub fn from_record_batch(batch: &RecordBatch) -> Result<Self> {
        let urls = string_column(batch, "url")?;
        let titles = string_column(batch, "title")?;
        let texts = string_column(batch, "text")?;

        let articles = urls
            .into_iter()
            .zip(titles)
            .zip(texts)
            .map(|((url, title), text)| Article { url, title, text })
            .collect();

        Ok(Self { articles })
    }

    /// Number of records in the batch.
    pub fn len(&self) -> usize {
        self.articles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.articles.is_empty()
    }

    /// Record at ordinal `index`.
    pub fn get(&self, index: usize) -> Option<&Article> {
        self.articles.get(index)
    }

    pub fn articles(&self) -> &[Article] {
        &self.articles
    }
}

/// Extract a string column, accepting both `Utf8` and `LargeUtf8` encodings.
fn string_column(batch: &RecordBatch, name: &str) -> Result<Vec<String>> {
    let column = batch
        .column_by_name(name)
        .with_context(|| format!("Missing column '{}' in record batch", name))?;

    if let Some(arr) = column.as_any().downcast_ref::<StringArray>() {
        Ok((0..arr.len())
            .map(|i| if arr.is_null(i) { String::new() } else { arr.value(i).to_string() })
            .collect())
    } else if let Some(arr) = column.as_any().downcast_ref::<LargeStringArray>() {
        Ok((0..arr.len())
            .map(|i| if arr.is_null(i) { String::new() } else { arr.value(i).to_string() })
            .collect())
    } else {
        anyhow::bail!(
            "Column '{}' has unsupported type {:?}, expected a string column",
            name,
            column.data_type()
        )
    }
}

/// A finite, lazily produced sequence of batches.
///
/// Calling `batches` again starts a fresh scan.
pub trait BatchSource: Send + Sync {
    fn batches(&self) -> Result<Box<dyn Iterator<Item = Result<Batch>> + '_>>;
}

/// Parquet files in a directory, scanned file by file on the calling thread.
#[derive(Debug, Clone)]
pub struct ParquetDataset {
    dir: PathBuf,
    extension: String,
    batch_size: usize,
}

impl ParquetDataset {
    pub fn new(dir: impl Into<PathBuf>, extension: &str, batch_size: usize) -> Self {
        Self {
            dir: dir.into(),
            extension: extension.to_string(),
            batch_size: batch_size.max(1),
        }
    }

    /// Dataset files in the directory, sorted by name.
    pub fn files(&self) -> Result<Vec<PathBuf>> {
        let entries = std::fs::read_dir(&self.dir)
            .with_context(|| format!("Failed to open dataset directory: {}", self.dir.display()))?;

        let mut files = Vec::new();
        for entry in entries {
            let path = entry?.path();
            let matches = path.is_file()
                && path.extension().and_then(|e| e.to_str()) == Some(self.extension.as_str());
            if matches {
                files.push(path);
            }
        }
        files.sort();

        Ok(files)
    }
}

impl BatchSource for ParquetDataset {
    fn batches(&self) -> Result<Box<dyn Iterator<Item = Result<Batch>> + '_>> {
        let files = self.files()?;
        tracing::info!(
            "Scanning {} dataset files in {}",
            files.len(),
            self.dir.display()
        );

        let batch_size = self.batch_size;
        let iter = files.into_iter().flat_map(move |path| {
            let batches: Box<dyn Iterator<Item = Result<Batch>>> =
                match open_projected_reader(&path, batch_size) {
                    Ok(reader) => Box::new(reader.map(move |record_batch| {
                        let record_batch = record_batch?;
                        Batch::from_record_batch(&record_batch)
                    })),
                    Err(e) => Box::new(std::iter::once(Err(e))),
                };
            batches
        });

        Ok(Box::new(iter))
    }
}

/// Open one parquet file reading only the article columns.
fn open_projected_reader(path: &Path, batch_size: usize) -> Result<ParquetRecordBatchReader> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open parquet file: {}", path.display()))?;

    let builder = ParquetRecordBatchReaderBuilder::try_new(file)
        .with_context(|| format!("Failed to read parquet metadata: {}", path.display()))?;

    let schema = builder.schema().clone();
    let mut roots = Vec::with_capacity(ARTICLE_COLUMNS.len());
    for name in ARTICLE_COLUMNS {
        let index = schema
            .index_of(name)
            .with_context(|| format!("Missing column '{}' in {}", name, path.display()))?;
        roots.push(index);
    }
    let mask = ProjectionMask::roots(builder.parquet_schema(), roots);

    tracing::debug!("Reading {}", path.display());

    Ok(builder
        .with_projection(mask)
        .with_batch_size(batch_size)
        .build()?)
}

#[cfg(test)]
impl BatchSource for Vec<Batch> {
    fn batches(&self) -> Result<Box<dyn Iterator<Item = Result<Batch>> + '_>> {
        Ok(Box::new(self.iter().cloned().map(Ok)))
    }
}
