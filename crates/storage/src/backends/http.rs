//! Remote object store reached over plain HTTP.

use crate::error::{StorageError, StorageResult};
use crate::traits::{LocalBlob, SourceStore};
use async_trait::async_trait;
use futures::StreamExt;
use pigment_core::{BlobHash, http_date};
use reqwest::header::{CONTENT_TYPE, LAST_MODIFIED};
use reqwest::{Client, Response, StatusCode};
use std::time::Duration;
use time::OffsetDateTime;
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument};

/// Blobs served at `{base_url}/{hash}`.
///
/// Every request, including the body download, is bounded by `timeout`;
/// exceeding it yields [`StorageError::Timeout`].
#[derive(Debug, Clone)]
pub struct HttpStore {
    base_url: String,
    client: Client,
}

impl HttpStore {
    pub fn new(base_url: &str, timeout: Duration) -> StorageResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StorageError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn blob_url(&self, hash: &BlobHash) -> String {
        format!("{}/{}", self.base_url, hash)
    }

    async fn head(&self, hash: &BlobHash) -> StorageResult<Response> {
        let response = self.client.head(self.blob_url(hash)).send().await?;
        check_status(hash, response)
    }
}

fn check_status(hash: &BlobHash, response: Response) -> StorageResult<Response> {
    match response.status() {
        StatusCode::NOT_FOUND => Err(StorageError::NotFound(hash.to_string())),
        status if status.is_success() => Ok(response),
        status => Err(StorageError::Http(format!(
            "unexpected status {status} for {hash}"
        ))),
    }
}

#[async_trait]
impl SourceStore for HttpStore {
    fn is_local(&self) -> bool {
        false
    }

    #[instrument(skip(self), fields(store = "http"))]
    async fn fetch_to_local(&self, hash: &BlobHash) -> StorageResult<LocalBlob> {
        let response = self.client.get(self.blob_url(hash)).send().await?;
        let response = check_status(hash, response)?;

        let temp = tempfile::Builder::new().prefix("pigment-source-").tempfile()?;
        let (file, path) = temp.into_parts();
        let mut file = tokio::fs::File::from_std(file);
        let mut body = response.bytes_stream();
        let mut written = 0usize;
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            written += chunk.len();
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        debug!(bytes = written, "downloaded source blob");
        Ok(LocalBlob::Temporary(path))
    }

    #[instrument(skip(self), fields(store = "http"))]
    async fn last_modified(&self, hash: &BlobHash) -> StorageResult<OffsetDateTime> {
        let response = self.head(hash).await?;
        response
            .headers()
            .get(LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .and_then(http_date::parse)
            .ok_or_else(|| StorageError::Http(format!("missing Last-Modified for {hash}")))
    }

    #[instrument(skip(self), fields(store = "http"))]
    async fn mime_type(&self, hash: &BlobHash) -> StorageResult<Option<String>> {
        let response = self.head(hash).await?;
        Ok(response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string()))
    }
}
