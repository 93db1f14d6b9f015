//! Remote file source: streaming HTTP GET of dataset files.

use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;
use std::time::Duration;

/// Anything that can open a byte stream for a URL.
pub trait FileSource: Send + Sync {
    /// Start a streaming fetch. A non-success status is an error.
    fn open(&self, url: &str) -> Result<Box<dyn Read + Send>>;
}

/// Blocking HTTP client for fetching dataset files.
pub struct HttpFileSource {
    client: reqwest::blocking::Client,
}

impl HttpFileSource {
    /// Create a client. `request_timeout` bounds a whole transfer; `None`
    /// lets large files stream for as long as they need.
    pub fn new(connect_timeout: Duration, request_timeout: Option<Duration>) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self { client })
    }
}

impl FileSource for HttpFileSource {
    fn open(&self, url: &str) -> Result<Box<dyn Read + Send>> {
        let response = self
            .client
            .get(url)
            .send()
            .with_context(|| format!("GET {} failed", url))?
            .error_for_status()
            .with_context(|| format!("GET {} returned an error status", url))?;

        Ok(Box::new(response))
    }
}

/// Fetch `url` and write the body to `destination` in `chunk_size` pieces.
///
/// The destination file is only created once the source has accepted the
/// request, so a rejected fetch leaves nothing behind. A failure mid-stream
/// leaves whatever was already written. Returns the number of bytes written.
pub fn fetch_to_file(
    source: &dyn FileSource,
    url: &str,
    destination: &Path,
    chunk_size: usize,
) -> Result<u64> {
    let mut body = source.open(url)?;

    let file = File::create(destination)
        .with_context(|| format!("Failed to create {}", destination.display()))?;
    let mut writer = BufWriter::with_capacity(chunk_size.max(1), file);

    let written = copy_chunked(&mut body, &mut writer, chunk_size)
        .with_context(|| format!("Failed while streaming {}", url))?;
    writer.flush()?;

    Ok(written)
}

fn copy_chunked(reader: &mut dyn Read, writer: &mut dyn Write, chunk_size: usize) -> std::io::Result<u64> {
    let mut buf = vec![0u8; chunk_size.max(1)];
    let mut total = 0u64;

    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => return Ok(total),
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        writer.write_all(&buf[..n])?;
        total += n as u64;
    }
}
