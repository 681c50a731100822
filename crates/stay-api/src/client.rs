//! Transport abstraction and the HTTP implementation

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{ACCEPT, HeaderValue};
use serde::de::DeserializeOwned;

use crate::error::{Error, Result};
use crate::sse::ByteStream;
use crate::types::{ConfirmResult, ConversationSummary, StoredMessage, StreamRequest};

/// Default API root of a local backend
pub const DEFAULT_BASE_URL: &str = "http://localhost:8000/api/v1";

/// Connection settings for [`HttpChatClient`]
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// API root, e.g. `http://localhost:8000/api/v1`
    pub base_url: String,
    /// Bound for ordinary request/response calls
    pub request_timeout: Duration,
    /// Bound for streamed chat calls; generation is slow
    pub stream_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout: Duration::from_secs(30),
            stream_timeout: Duration::from_secs(300),
        }
    }
}

impl ClientConfig {
    /// Create a config for the given API root with default timeouts
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }
}

/// Calls the chat backend makes available to the client
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Create a conversation
    async fn create_conversation(&self, title: Option<&str>) -> Result<ConversationSummary>;

    /// List active conversations, most recent first
    async fn list_conversations(&self) -> Result<Vec<ConversationSummary>>;

    /// Delete a conversation and its messages
    async fn delete_conversation(&self, conversation_id: &str) -> Result<()>;

    /// Load the message history of a conversation
    async fn get_messages(&self, conversation_id: &str) -> Result<Vec<StoredMessage>>;

    /// Open a streamed exchange. A non-success status fails here, before
    /// any bytes are read.
    async fn open_stream(
        &self,
        conversation_id: &str,
        request: &StreamRequest,
    ) -> Result<ByteStream>;

    /// Confirm a pending action
    async fn confirm_action(&self, conversation_id: &str, action_id: &str)
    -> Result<ConfirmResult>;
}

/// reqwest-backed transport
pub struct HttpChatClient {
    client: reqwest::Client,
    config: ClientConfig,
}

impl HttpChatClient {
    /// Create a client, validating the base URL
    pub fn new(config: ClientConfig) -> Result<Self> {
        let base = config.base_url.trim();
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(Error::InvalidConfig(format!(
                "base URL must start with http:// or https://, got '{}'",
                config.base_url
            )));
        }
        let client = reqwest::Client::builder()
            .connect_timeout(config.request_timeout)
            .build()?;
        Ok(Self { client, config })
    }

    /// The configuration this client was built with
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim().trim_end_matches('/'), path)
    }

    async fn send_json<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> Result<T> {
        let response = request.timeout(self.config.request_timeout).send().await?;
        let response = check_status(response).await?;
        Ok(response.json::<T>().await?)
    }
}

/// Map a non-success response to [`Error::Status`], preferring the
/// backend's `detail` field as the message.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v.get("detail").and_then(|d| d.as_str()).map(str::to_string))
        .unwrap_or(body);
    Err(Error::status(status.as_u16(), message))
}

#[async_trait]
impl ChatTransport for HttpChatClient {
    async fn create_conversation(&self, title: Option<&str>) -> Result<ConversationSummary> {
        let url = self.url("/chat/conversations");
        tracing::debug!("POST {}", url);
        self.send_json(
            self.client
                .post(&url)
                .json(&serde_json::json!({ "title": title })),
        )
        .await
    }

    async fn list_conversations(&self) -> Result<Vec<ConversationSummary>> {
        let url = self.url("/chat/conversations");
        tracing::debug!("GET {}", url);
        self.send_json(self.client.get(&url)).await
    }

    async fn delete_conversation(&self, conversation_id: &str) -> Result<()> {
        let url = self.url(&format!("/chat/conversations/{}", conversation_id));
        tracing::debug!("DELETE {}", url);
        let response = self
            .client
            .delete(&url)
            .timeout(self.config.request_timeout)
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    async fn get_messages(&self, conversation_id: &str) -> Result<Vec<StoredMessage>> {
        let url = self.url(&format!("/chat/conversations/{}/messages", conversation_id));
        tracing::debug!("GET {}", url);
        self.send_json(self.client.get(&url)).await
    }

    async fn open_stream(
        &self,
        conversation_id: &str,
        request: &StreamRequest,
    ) -> Result<ByteStream> {
        let url = self.url(&format!(
            "/chat/conversations/{}/messages/{}",
            conversation_id,
            request.endpoint()
        ));
        tracing::debug!("POST {} (stream)", url);

        let response = self
            .client
            .post(&url)
            .timeout(self.config.stream_timeout)
            .header(ACCEPT, HeaderValue::from_static("text/event-stream"))
            .json(&request.body())
            .send()
            .await?;
        let response = check_status(response).await?;

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(Error::from));
        Ok(Box::pin(body))
    }

    async fn confirm_action(
        &self,
        conversation_id: &str,
        action_id: &str,
    ) -> Result<ConfirmResult> {
        let url = self.url(&format!("/chat/conversations/{}/confirm", conversation_id));
        tracing::debug!("POST {}", url);
        self.send_json(
            self.client
                .post(&url)
                .json(&serde_json::json!({ "action_id": action_id })),
        )
        .await
    }
}
