//! Destination stores for ingested articles.

mod elasticsearch;

pub use elasticsearch::{bulk_body, ElasticsearchSink};

use crate::io::{Article, Batch};
use anyhow::Result;
use serde::Serialize;

/// Bulk operation tag carried by every document.
pub const INDEX_OP: &str = "index";

/// Fields stored for an article.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentSource {
    pub url: String,
    pub title: String,
    pub text: String,
}

/// A store-ready representation of one article.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// Bulk operation, e.g. `index`
    pub op: &'static str,

    /// Target collection
    pub index: String,

    /// Stable id; re-sending the document overwrites the stored copy
    pub id: String,

    pub source: DocumentSource,
}

impl Document {
    /// Build an `index` operation for `article` targeting `index`.
    ///
    /// The article URL is the id; it is unique within the dataset.
    pub fn index(index: &str, article: &Article) -> Self {
        Self {
            op: INDEX_OP,
            index: index.to_string(),
            id: article.url.clone(),
            source: DocumentSource {
                url: article.url.clone(),
                title: article.title.clone(),
                text: article.text.clone(),
            },
        }
    }
}

/// Final ingest result queried from the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IngestStats {
    /// Documents in the target collection, or -1 if the count query failed
    pub num_records: i64,
}

impl IngestStats {
    pub fn new(num_records: i64) -> Self {
        Self { num_records }
    }

    /// Stats for a store that could not be queried.
    pub fn unavailable() -> Self {
        Self { num_records: -1 }
    }

    pub fn is_available(&self) -> bool {
        self.num_records >= 0
    }
}

impl std::fmt::Display for IngestStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_available() {
            write!(f, "{} records", self.num_records)
        } else {
            write!(f, "record count unavailable")
        }
    }
}

/// A store that accepts bulk document submissions.
///
/// Implementations are shared by every ingest worker and must tolerate
/// concurrent calls.
pub trait Sink: Send + Sync {
    /// Map an article to this store's document shape.
    fn create_document(&self, article: &Article) -> Document;

    /// Submit documents. `Ok(true)` means every document was accepted; the
    /// running count is increased by `documents.len()` only in that case.
    fn save_bulk(&self, documents: &[Document]) -> Result<bool>;

    /// Documents accepted so far by this sink.
    fn processed_count(&self) -> u64;

    /// Query the store for the total document count. Never fails; returns
    /// [`IngestStats::unavailable`] if the query does.
    fn stats(&self) -> IngestStats;
}

/// Map every article in a batch to a document.
pub fn documents_for(sink: &dyn Sink, batch: &Batch) -> Vec<Document> {
    batch
        .articles()
        .iter()
        .map(|article| sink.create_document(article))
        .collect()
}
