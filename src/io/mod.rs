//! I/O for remote dataset files and local parquet reading.

mod dataset;
mod remote;

#[cfg(test)]
mod http_stub;

pub use dataset::{Article, Batch, BatchSource, ParquetDataset, ARTICLE_COLUMNS};
pub use remote::{fetch_to_file, FileSource, HttpFileSource};
