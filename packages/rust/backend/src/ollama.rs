//! Ollama `/api/chat` client.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use promptbatch_shared::{PromptBatchError, Result};

use crate::{Backend, ChatMessage};

/// Ollama-compatible backend at a single host.
#[derive(Debug, Clone)]
pub struct OllamaBackend {
    host: String,
    base_url: String,
    client: reqwest::Client,
}

impl OllamaBackend {
    /// Create a client for `host`, given as `host:port` or a full base URL.
    pub fn new(host: impl Into<String>, timeout: Duration) -> Result<Self> {
        let host = host.into();
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PromptBatchError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url_for(&host),
            host,
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

/// `host:port` gets an `http://` scheme; URLs are kept as given.
fn base_url_for(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("http://{host}")
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: String,
}

#[async_trait]
impl Backend for OllamaBackend {
    fn host(&self) -> &str {
        &self.host
    }

    async fn chat(&self, model: &str, messages: &[ChatMessage]) -> Result<String> {
        let url = format!("{}/api/chat", self.base_url);
        let body = ChatRequest {
            model,
            messages,
            stream: false,
        };

        debug!(host = %self.host, %model, messages = messages.len(), "sending chat request");

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| PromptBatchError::backend_unavailable(&self.host, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            warn!(host = %self.host, status = status.as_u16(), body = %error_body, "backend returned error");
            return Err(PromptBatchError::backend_error(
                &self.host,
                format!("HTTP {status}: {error_body}"),
            ));
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| {
            PromptBatchError::backend_error(&self.host, format!("malformed response: {e}"))
        })?;

        Ok(parsed.message.content)
    }
}
