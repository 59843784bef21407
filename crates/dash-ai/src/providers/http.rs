//! HTTP transport for the streaming chat endpoint

use async_trait::async_trait;
use futures::StreamExt;

use super::{CHAT_STREAM_PATH, ChatResponse, ChatTransport, DEFAULT_BASE_URL};
use crate::{
    error::{Error, Result},
    types::ChatRequest,
};

/// Chat service client over HTTP
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    /// Create a transport for the service at `base_url`
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(Error::InvalidConfig(format!(
                "base URL must start with http:// or https://, got {:?}",
                base_url
            )));
        }
        Ok(Self {
            client: reqwest::Client::new(),
            base_url,
        })
    }

    /// Full URL of the streaming endpoint
    pub fn endpoint(&self) -> String {
        format!("{}{}", self.base_url, CHAT_STREAM_PATH)
    }

    /// Base URL requests are sent to
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }
}

#[async_trait]
impl ChatTransport for HttpTransport {
    async fn send(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let url = self.endpoint();
        tracing::debug!(%url, history = request.history.len(), "sending chat request");

        let response = self
            .client
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .json(request)
            .send()
            .await?;

        let status = response.status();
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(Error::from));

        Ok(ChatResponse {
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or_default().to_string(),
            body: Some(Box::pin(body)),
        })
    }
}
