//! Elasticsearch sink over the REST bulk API.

use crate::config::ElasticsearchConfig;
use crate::io::Article;
use crate::pipeline::Counter;
use crate::sink::{Document, IngestStats, Sink};
use anyhow::{Context, Result};
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::Method;
use serde::Deserialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct BulkResponse {
    errors: bool,
    #[serde(default)]
    items: Vec<serde_json::Value>,
}

impl BulkResponse {
    /// Number of items the store rejected.
    fn failed_items(&self) -> usize {
        self.items
            .iter()
            .filter(|item| {
                item.as_object()
                    .and_then(|ops| ops.values().next())
                    .and_then(|result| result.get("error"))
                    .is_some()
            })
            .count()
    }
}

#[derive(Debug, Deserialize)]
struct CountResponse {
    count: u64,
}

/// Bulk-indexes articles into one Elasticsearch index.
///
/// Requests rotate across the configured nodes.
pub struct ElasticsearchSink {
    client: Client,
    nodes: Vec<String>,
    next_node: AtomicUsize,
    index: String,
    username: String,
    password: String,
    counter: Counter,
}

impl ElasticsearchSink {
    /// Build the client and verify the cluster answers.
    ///
    /// Fails if the CA certificate cannot be loaded or the cluster is
    /// unreachable with the given credentials.
    pub fn connect(config: &ElasticsearchConfig) -> Result<Self> {
        let mut builder = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(config.timeout_secs));

        if let Some(ca_cert) = &config.ca_cert {
            let pem = std::fs::read(ca_cert)
                .with_context(|| format!("Failed to read CA certificate: {}", ca_cert.display()))?;
            let cert = reqwest::Certificate::from_pem(&pem)
                .with_context(|| format!("Invalid PEM certificate: {}", ca_cert.display()))?;
            builder = builder.add_root_certificate(cert);
        }

        let nodes: Vec<String> = config
            .urls
            .iter()
            .map(|url| url.trim().trim_end_matches('/').to_string())
            .filter(|url| !url.is_empty())
            .collect();

        if nodes.is_empty() {
            anyhow::bail!("No Elasticsearch URL configured");
        }

        let sink = Self {
            client: builder.build().context("Failed to build Elasticsearch client")?,
            nodes,
            next_node: AtomicUsize::new(0),
            index: config.index.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
            counter: Counter::new(),
        };

        let info = sink
            .info()
            .with_context(|| format!("Elasticsearch is unreachable at {}", sink.nodes.join(",")))?;
        tracing::info!("Client Info {}", info);

        Ok(sink)
    }

    /// Target index name.
    pub fn index(&self) -> &str {
        &self.index
    }

    /// Cluster information from `GET /`.
    pub fn info(&self) -> Result<serde_json::Value> {
        let response = self
            .request(Method::GET, "")
            .send()?
            .error_for_status()?;
        Ok(response.json()?)
    }

    fn node(&self) -> &str {
        let i = self.next_node.fetch_add(1, Ordering::Relaxed) % self.nodes.len();
        &self.nodes[i]
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/{}", self.node(), path);
        self.client
            .request(method, url)
            .basic_auth(&self.username, Some(&self.password))
    }

    fn refresh(&self) -> Result<()> {
        self.request(Method::POST, &format!("{}/_refresh", self.index))
            .send()?
            .error_for_status()?;
        Ok(())
    }

    fn count(&self) -> Result<u64> {
        let response: CountResponse = self
            .request(Method::GET, &format!("{}/_count", self.index))
            .send()?
            .error_for_status()?
            .json()?;
        Ok(response.count)
    }
}

impl Sink for ElasticsearchSink {
    fn create_document(&self, article: &Article) -> Document {
        Document::index(&self.index, article)
    }

    fn save_bulk(&self, documents: &[Document]) -> Result<bool> {
        if documents.is_empty() {
            return Ok(true);
        }

        let body = bulk_body(documents)?;
        let response: BulkResponse = self
            .request(Method::POST, "_bulk")
            .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
            .body(body)
            .send()?
            .error_for_status()?
            .json()
            .context("Invalid bulk response")?;

        if response.errors {
            tracing::warn!(
                "Bulk request rejected {} of {} documents",
                response.failed_items(),
                documents.len()
            );
            return Ok(false);
        }

        self.counter.add(documents.len() as u64);
        Ok(true)
    }

    fn processed_count(&self) -> u64 {
        self.counter.get()
    }

    fn stats(&self) -> IngestStats {
        if let Err(e) = self.refresh() {
            tracing::debug!("Index refresh before count failed: {}", e);
        }

        match self.count() {
            Ok(count) => IngestStats::new(count as i64),
            Err(e) => {
                tracing::warn!("Failed to count documents in {}: {}", self.index, e);
                IngestStats::unavailable()
            }
        }
    }
}

/// Encode documents as an NDJSON bulk request body.
///
/// Every action carries the document `_id`, so re-sending a batch overwrites
/// the copies already stored.
pub fn bulk_body(documents: &[Document]) -> Result<String> {
    let mut body = String::new();
    for doc in documents {
        let mut action = serde_json::Map::new();
        action.insert(
            doc.op.to_string(),
            serde_json::json!({ "_index": doc.index, "_id": doc.id }),
        );
        body.push_str(&serde_json::to_string(&action)?);
        body.push('\n');
        body.push_str(&serde_json::to_string(&doc.source)?);
        body.push('\n');
    }
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::test_support::{HttpStub, StubRoutes};
    use std::path::PathBuf;

    const INFO: &str = r#"{"name": "node-1", "cluster_name": "bench", "version": {"number": "8.11.0"}}"#;
    const BULK_OK: &str = r#"{"took": 5, "errors": false, "items": [
        {"index": {"_index": "idx-articles", "_id": "u1", "status": 201}},
        {"index": {"_index": "idx-articles", "_id": "u2", "status": 201}}
    ]}"#;
    const BULK_PARTIAL: &str = r#"{"took": 5, "errors": true, "items": [
        {"index": {"_index": "idx-articles", "_id": "u1", "status": 201}},
        {"index": {"_index": "idx-articles", "_id": "u2", "status": 429, "error": {"type": "es_rejected_execution_exception"}}}
    ]}"#;

    fn test_config(urls: Vec<&str>) -> ElasticsearchConfig {
        ElasticsearchConfig {
            urls: urls.into_iter().map(String::from).collect(),
            index: "idx-articles".to_string(),
            username: "elastic".to_string(),
            password: "elastic".to_string(),
            ca_cert: None,
            timeout_secs: 5,
        }
    }

    fn connect(stub: &HttpStub) -> ElasticsearchSink {
        ElasticsearchSink::connect(&test_config(vec![stub.url().as_str()])).unwrap()
    }

    fn two_docs() -> Vec<Document> {
        vec![
            Document::index("idx-articles", &Article::new("u1", "t1", "x1")),
            Document::index("idx-articles", &Article::new("u2", "t2", "x2")),
        ]
    }

    #[test]
    fn test_bulk_body_format() {
        let docs = vec![
            Document::index("idx", &Article::new("u1", "t1", "x1")),
            Document::index("idx", &Article::new("u2", "t2", "line\nbreak")),
        ];

        let body = bulk_body(&docs).unwrap();
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(body.ends_with('\n'));

        let action: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(action["index"]["_index"], "idx");
        assert_eq!(action["index"]["_id"], "u1");

        let source: serde_json::Value = serde_json::from_str(lines[3]).unwrap();
        assert_eq!(source["url"], "u2");
        assert_eq!(source["text"], "line\nbreak");
    }

    #[test]
    fn test_resent_batch_has_identical_ids() {
        let batch = crate::io::Batch::new(vec![
            Article::new("https://en.wikipedia.org/wiki/A", "A", "alpha"),
            Article::new("https://en.wikipedia.org/wiki/B", "B", "beta"),
        ]);
        let encode = || {
            let docs: Vec<Document> = batch
                .articles()
                .iter()
                .map(|a| Document::index("idx", a))
                .collect();
            bulk_body(&docs).unwrap()
        };

        let first = encode();
        let second = encode();
        assert_eq!(first, second);

        let ids: Vec<String> = first
            .lines()
            .step_by(2)
            .map(|line| {
                let action: serde_json::Value = serde_json::from_str(line).unwrap();
                action["index"]["_id"].as_str().unwrap().to_string()
            })
            .collect();
        assert_eq!(
            ids,
            vec!["https://en.wikipedia.org/wiki/A", "https://en.wikipedia.org/wiki/B"]
        );
    }

    #[test]
    fn test_bulk_response_failed_items() {
        let response: BulkResponse = serde_json::from_str(BULK_PARTIAL).unwrap();

        assert!(response.errors);
        assert_eq!(response.failed_items(), 1);
    }

    #[test]
    fn test_count_response() {
        let response: CountResponse =
            serde_json::from_str(r#"{"count": 6, "_shards": {"total": 1}}"#).unwrap();
        assert_eq!(response.count, 6);
    }

    #[test]
    fn test_connect_checks_cluster_with_basic_auth() {
        let stub = StubRoutes::new().route("GET", "/", 200, INFO).start();
        let sink = connect(&stub);

        assert_eq!(sink.index(), "idx-articles");
        let requests = stub.requests_to("/");
        assert_eq!(requests.len(), 1);
        assert_eq!(
            requests[0].authorization.as_deref(),
            Some("Basic ZWxhc3RpYzplbGFzdGlj")
        );
    }

    #[test]
    fn test_connect_rejected_credentials_is_fatal() {
        let stub = StubRoutes::new()
            .route("GET", "/", 401, r#"{"error":"unauthorized"}"#)
            .start();
        assert!(ElasticsearchSink::connect(&test_config(vec![stub.url().as_str()])).is_err());
    }

    #[test]
    fn test_save_bulk_accepted_counts_documents() {
        let stub = StubRoutes::new()
            .route("GET", "/", 200, INFO)
            .route("POST", "/_bulk", 200, BULK_OK)
            .start();
        let sink = connect(&stub);

        assert!(sink.save_bulk(&two_docs()).unwrap());
        assert_eq!(sink.processed_count(), 2);

        let bulk = stub.requests_to("/_bulk");
        assert_eq!(bulk.len(), 1);
        assert_eq!(bulk[0].body, bulk_body(&two_docs()).unwrap());
    }

    #[test]
    fn test_save_bulk_item_errors_are_not_counted() {
        let stub = StubRoutes::new()
            .route("GET", "/", 200, INFO)
            .route("POST", "/_bulk", 200, BULK_PARTIAL)
            .start();
        let sink = connect(&stub);

        assert!(!sink.save_bulk(&two_docs()).unwrap());
        assert_eq!(sink.processed_count(), 0);
    }

    #[test]
    fn test_save_bulk_error_status_is_err() {
        let stub = StubRoutes::new()
            .route("GET", "/", 200, INFO)
            .route("POST", "/_bulk", 503, r#"{"error":"unavailable"}"#)
            .start();
        let sink = connect(&stub);

        assert!(sink.save_bulk(&two_docs()).is_err());
        assert_eq!(sink.processed_count(), 0);
    }

    #[test]
    fn test_save_bulk_empty_skips_request() {
        let stub = StubRoutes::new().route("GET", "/", 200, INFO).start();
        let sink = connect(&stub);

        assert!(sink.save_bulk(&[]).unwrap());
        assert!(stub.requests_to("/_bulk").is_empty());
    }

    #[test]
    fn test_stats_refreshes_then_counts() {
        let stub = StubRoutes::new()
            .route("GET", "/", 200, INFO)
            .route("POST", "/idx-articles/_refresh", 200, r#"{"_shards":{"total":1}}"#)
            .route("GET", "/idx-articles/_count", 200, r#"{"count": 6}"#)
            .start();
        let sink = connect(&stub);

        assert_eq!(sink.stats(), IngestStats::new(6));
        let paths: Vec<String> = stub.requests().into_iter().map(|r| r.path).collect();
        assert_eq!(paths, vec!["/", "/idx-articles/_refresh", "/idx-articles/_count"]);
    }

    #[test]
    fn test_stats_failed_count_is_unavailable() {
        // No _refresh or _count route: both answer 404
        let stub = StubRoutes::new().route("GET", "/", 200, INFO).start();
        let sink = connect(&stub);

        assert_eq!(sink.stats(), IngestStats::unavailable());
        assert_eq!(sink.stats().num_records, -1);
    }

    #[test]
    fn test_requests_rotate_across_nodes() {
        let first = StubRoutes::new()
            .route("GET", "/", 200, INFO)
            .route("POST", "/_bulk", 200, BULK_OK)
            .start();
        let second = StubRoutes::new()
            .route("GET", "/", 200, INFO)
            .route("POST", "/_bulk", 200, BULK_OK)
            .start();
        let config = test_config(vec![first.url().as_str(), second.url().as_str()]);
        let sink = ElasticsearchSink::connect(&config).unwrap();

        for _ in 0..4 {
            assert!(sink.save_bulk(&two_docs()).unwrap());
        }

        // connect used the first node, so bulks alternate starting at the second
        assert_eq!(first.requests_to("/_bulk").len(), 2);
        assert_eq!(second.requests_to("/_bulk").len(), 2);
        assert_eq!(first.requests_to("/").len(), 1);
        assert!(second.requests_to("/").is_empty());
        assert_eq!(sink.processed_count(), 8);
    }

    #[test]
    fn test_connect_rejects_empty_urls() {
        assert!(ElasticsearchSink::connect(&test_config(vec![" "])).is_err());
    }

    #[test]
    fn test_connect_unreachable_is_fatal() {
        // Port 9 (discard) on localhost is not an Elasticsearch node
        assert!(ElasticsearchSink::connect(&test_config(vec!["http://127.0.0.1:9"])).is_err());
    }

    #[test]
    fn test_connect_missing_ca_cert() {
        let mut config = test_config(vec!["http://127.0.0.1:9"]);
        config.ca_cert = Some(PathBuf::from("/nonexistent/ca.pem"));

        let err = ElasticsearchSink::connect(&config).err().unwrap();
        assert!(err.to_string().contains("CA certificate"));
    }
}
