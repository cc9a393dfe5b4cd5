//! Concurrent reference fetching.
//!
//! Every URL gets its own spawned task; results are collected in input order.

use std::time::Duration;

use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use tracing::{debug, instrument, warn};

use promptbatch_shared::{PromptBatchError, Result};

/// User-Agent string for reference requests.
const USER_AGENT: &str = concat!("promptbatch/", env!("CARGO_PKG_VERSION"));

/// What to do when a reference cannot be retrieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchMode {
    /// Missing references are left out of the block; the task continues.
    #[default]
    Lenient,
    /// Any failed or empty fetch fails the task.
    Strict,
}

impl FetchMode {
    pub fn from_strict(strict: bool) -> Self {
        if strict { Self::Strict } else { Self::Lenient }
    }
}

/// One fetched URL. `content` is `None` when the fetch failed or produced
/// no text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedReference {
    pub url: String,
    pub content: Option<String>,
}

// ---------------------------------------------------------------------------
// PageFetcher
// ---------------------------------------------------------------------------

/// HTTP client for reference pages.
#[derive(Debug, Clone)]
pub struct PageFetcher {
    client: Client,
    mode: FetchMode,
}

impl PageFetcher {
    /// Create a fetcher with a per-request timeout.
    pub fn new(timeout: Duration, mode: FetchMode) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(timeout)
            .build()
            .map_err(|e| PromptBatchError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, mode })
    }

    pub fn mode(&self) -> FetchMode {
        self.mode
    }

    /// Fetch every URL concurrently. The output has one entry per input URL,
    /// in the same order.
    ///
    /// In strict mode any failure yields [`PromptBatchError::ContextFetchFailed`]
    /// naming all failed URLs.
    #[instrument(skip_all, fields(urls = urls.len(), mode = ?self.mode))]
    pub async fn fetch_all(&self, urls: &[String]) -> Result<Vec<FetchedReference>> {
        let handles: Vec<_> = urls
            .iter()
            .map(|url| {
                let client = self.client.clone();
                let url = url.clone();
                tokio::spawn(async move { fetch_text(&client, &url).await })
            })
            .collect();

        let mut references = Vec::with_capacity(urls.len());
        let mut failed = Vec::new();

        for (url, handle) in urls.iter().zip(handles) {
            let outcome = handle.await.unwrap_or_else(|e| {
                Err(PromptBatchError::Network(format!("{url}: fetch task failed: {e}")))
            });

            let content = match outcome {
                Ok(Some(text)) => {
                    debug!(%url, chars = text.chars().count(), "reference fetched");
                    Some(text)
                }
                Ok(None) => {
                    warn!(%url, "reference has no extractable text");
                    failed.push(url.clone());
                    None
                }
                Err(e) => {
                    warn!(%url, error = %e, "reference fetch failed");
                    failed.push(url.clone());
                    None
                }
            };

            references.push(FetchedReference {
                url: url.clone(),
                content,
            });
        }

        if self.mode == FetchMode::Strict && !failed.is_empty() {
            return Err(PromptBatchError::ContextFetchFailed { urls: failed });
        }

        Ok(references)
    }
}

/// GET one URL and reduce it to text. `Ok(None)` means the page was empty.
async fn fetch_text(client: &Client, url: &str) -> Result<Option<String>> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| PromptBatchError::Network(format!("{url}: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        return Err(PromptBatchError::Network(format!("{url}: HTTP {status}")));
    }

    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_ascii_lowercase();

    let body = response
        .text()
        .await
        .map_err(|e| PromptBatchError::Network(format!("{url}: failed to read body: {e}")))?;

    let text = if looks_like_html(&content_type, &body) {
        promptbatch_markdown::extract_text(&body, url)?.text
    } else {
        body.trim().to_string()
    };

    Ok(Some(text).filter(|t| !t.is_empty()))
}

fn looks_like_html(content_type: &str, body: &str) -> bool {
    if content_type.contains("html") {
        return true;
    }
    content_type.is_empty() && body.trim_start().starts_with('<')
}
