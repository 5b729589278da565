//! Downloads attachment bytes once per relay operation.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::future::join_all;
use tracing::{debug, warn};

use crate::error::{RelayError, RelayResult};
use crate::relay::normalize::AttachmentRef;

/// A downloaded attachment.
///
/// `bytes` is reference-counted and read-only: cloning a `FetchedFile` for
/// another destination shares the buffer instead of copying or consuming it.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedFile {
    pub filename: String,
    pub bytes: Bytes,
    pub content_type: Option<String>,
}

#[async_trait]
pub trait AttachmentFetcher: Send + Sync {
    async fn fetch(&self, attachment: &AttachmentRef) -> RelayResult<FetchedFile>;
}

/// Filename from the last URL path segment, query and fragment stripped.
pub fn filename_from_url(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or_default();
    let path = path.split_once("://").map(|(_, rest)| rest).unwrap_or(path);
    match path.split_once('/') {
        Some((_, tail)) => tail
            .rsplit('/')
            .find(|segment| !segment.is_empty())
            .unwrap_or("attachment")
            .to_string(),
        None => "attachment".to_string(),
    }
}

fn resolve_filename(attachment: &AttachmentRef) -> String {
    attachment
        .filename
        .clone()
        .unwrap_or_else(|| filename_from_url(&attachment.url))
}

/// Fetches attachments over HTTP with a per-request timeout.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build attachment HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl AttachmentFetcher for HttpFetcher {
    async fn fetch(&self, attachment: &AttachmentRef) -> RelayResult<FetchedFile> {
        let response = self
            .client
            .get(&attachment.url)
            .send()
            .await
            .map_err(|e| RelayError::fetch(&attachment.url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RelayError::fetch(&attachment.url, format!("HTTP {status}")));
        }

        let header_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let bytes = response
            .bytes()
            .await
            .map_err(|e| RelayError::fetch(&attachment.url, e))?;

        debug!(url = %attachment.url, size = bytes.len(), "Fetched attachment");

        Ok(FetchedFile {
            filename: resolve_filename(attachment),
            bytes,
            content_type: attachment.content_type.clone().or(header_type),
        })
    }
}

/// Fetch every attachment concurrently, one attempt each.
///
/// Failures are logged and left out; the surviving files keep the relative
/// order of their references.
pub async fn fetch_all(
    fetcher: &dyn AttachmentFetcher,
    attachments: &[AttachmentRef],
) -> Vec<FetchedFile> {
    let results = join_all(attachments.iter().map(|a| fetcher.fetch(a))).await;

    results
        .into_iter()
        .filter_map(|result| match result {
            Ok(file) => Some(file),
            Err(e) => {
                warn!(error = %e, "Skipping attachment");
                None
            }
        })
        .collect()
}
