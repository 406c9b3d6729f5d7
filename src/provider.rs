//! HTTP surface of the WhatsApp-bridging provider.
//!
//! `ChatProvider` is the seam between the synchronization logic and the
//! transport; `HttpProvider` is the production implementation. The raw
//! `serde_json::Value` records it returns go through `normalize` before
//! anything else touches them.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{ConfigResolver, ConnectionConfig};
use crate::error::{Result, SyncError};

const API_KEY_HEADER: &str = "X-Api-Key";

/// Bound on any single request so a wedged provider cannot hang the
/// session poller.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared HTTP client with the request timeout applied.
pub fn default_http_client() -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()
}

/// Operations the synchronizer needs from the provider.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// One page of raw chat overview records.
    async fn chats_overview(&self, limit: usize, offset: usize) -> Result<Vec<Value>>;

    /// Raw per-chat record used for name/avatar enrichment.
    async fn chat_info(&self, chat_id: &str) -> Result<Value>;

    /// One page of raw message records for a chat, media URLs included.
    async fn messages(&self, chat_id: &str, limit: usize, offset: usize) -> Result<Vec<Value>>;

    /// Send a text message; returns the created raw message record.
    async fn send_text(&self, chat_id: &str, text: &str) -> Result<Value>;

    /// Mark a chat read, with a count hint of how many messages were seen.
    async fn mark_read(&self, chat_id: &str, messages: usize) -> Result<()>;

    /// Raw session-status payload.
    async fn session_status(&self) -> Result<Value>;
}

pub struct HttpProvider {
    http: reqwest::Client,
    resolver: Arc<ConfigResolver>,
}

impl HttpProvider {
    pub fn new(http: reqwest::Client, resolver: Arc<ConfigResolver>) -> Self {
        Self { http, resolver }
    }

    async fn connection(&self) -> Result<(ConnectionConfig, String)> {
        let config = self.resolver.resolve().await?;
        let session = self.resolver.effective_session(&config);
        Ok((config, session))
    }

    async fn get_json(&self, url: String, api_key: &str) -> Result<Value> {
        let req = self.http.get(&url).header(API_KEY_HEADER, api_key);
        Self::execute(req, url).await
    }

    async fn execute(req: reqwest::RequestBuilder, url: String) -> Result<Value> {
        let resp = req.send().await.map_err(|source| SyncError::Transport {
            url: url.clone(),
            source,
        })?;
        let status = resp.status();
        if !status.is_success() {
            return Err(SyncError::Status {
                status: status.as_u16(),
                url,
            });
        }
        resp.json()
            .await
            .map_err(|source| SyncError::Decode { url, source })
    }
}

#[async_trait]
impl ChatProvider for HttpProvider {
    async fn chats_overview(&self, limit: usize, offset: usize) -> Result<Vec<Value>> {
        let (config, session) = self.connection().await?;
        let url = format!(
            "{}/api/{}/chats/overview?limit={}&offset={}",
            config.base_url, session, limit, offset
        );
        let raw = self.get_json(url, &config.api_key).await?;
        Ok(as_records(raw))
    }

    async fn chat_info(&self, chat_id: &str) -> Result<Value> {
        let (config, session) = self.connection().await?;
        let url = format!("{}/api/{}/chats/{}", config.base_url, session, chat_id);
        self.get_json(url, &config.api_key).await
    }

    async fn messages(&self, chat_id: &str, limit: usize, offset: usize) -> Result<Vec<Value>> {
        let (config, session) = self.connection().await?;
        let url = format!(
            "{}/api/{}/chats/{}/messages?limit={}&offset={}&downloadMedia=true",
            config.base_url, session, chat_id, limit, offset
        );
        let raw = self.get_json(url, &config.api_key).await?;
        Ok(as_records(raw))
    }

    async fn send_text(&self, chat_id: &str, text: &str) -> Result<Value> {
        let (config, session) = self.connection().await?;
        let url = format!("{}/api/sendText", config.base_url);
        let body = json!({
            "chatId": chat_id,
            "text": text,
            "session": session,
            "linkPreview": false,
        });
        let req = self
            .http
            .post(&url)
            .header(API_KEY_HEADER, &config.api_key)
            .json(&body);
        Self::execute(req, url).await
    }

    async fn mark_read(&self, chat_id: &str, messages: usize) -> Result<()> {
        let (config, session) = self.connection().await?;
        let url = format!(
            "{}/api/{}/chats/{}/messages/read",
            config.base_url, session, chat_id
        );
        // The response body is not interesting here, only the status.
        let resp = self
            .http
            .post(&url)
            .header(API_KEY_HEADER, &config.api_key)
            .json(&json!({ "messages": messages }))
            .send()
            .await
            .map_err(|source| SyncError::Transport {
                url: url.clone(),
                source,
            })?;
        let status = resp.status();
        if !status.is_success() {
            return Err(SyncError::Status {
                status: status.as_u16(),
                url,
            });
        }
        Ok(())
    }

    async fn session_status(&self) -> Result<Value> {
        let (config, session) = self.connection().await?;
        let url = format!("{}/api/sessions/{}", config.base_url, session);
        self.get_json(url, &config.api_key).await
    }
}

/// List endpoints return either a bare array or an envelope object,
/// depending on the provider version; accept both.
fn as_records(raw: Value) -> Vec<Value> {
    match raw {
        Value::Array(items) => items,
        Value::Object(mut map) => {
            for key in ["data", "chats", "messages"] {
                if let Some(Value::Array(items)) = map.remove(key) {
                    return items;
                }
            }
            Vec::new()
        }
        _ => Vec::new(),
    }
}
