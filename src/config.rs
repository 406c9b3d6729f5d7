//! Per-tenant provider connection configuration.
//!
//! The CRM backend exposes one endpoint per tenant returning the provider
//! base URL, API key and (optionally) which session to talk to. The
//! resolver fetches it once, caches the result for the process lifetime and
//! lets the caller redirect to a different session at runtime without
//! re-fetching.

use serde_json::Value;
use std::sync::RwLock;
use tokio::sync::Mutex;
use tracing::debug;
use url::Url;

use crate::error::{Result, SyncError};

/// Session used when the tenant config names none.
pub const DEFAULT_SESSION: &str = "default";

/// `environment` values that describe the deployment rather than a session.
const RESERVED_ENVIRONMENTS: [&str; 2] = ["production", "development"];

/// Resolved provider connection parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionConfig {
    pub base_url: String,
    pub api_key: String,
    pub session_name: String,
}

/// Memoized tenant-config resolver.
///
/// Concurrent callers queue on the cache lock and share a single in-flight
/// fetch; a failed fetch leaves the cache empty so the next call retries
/// instead of failing forever.
pub struct ConfigResolver {
    http: reqwest::Client,
    config_url: String,
    cached: Mutex<Option<ConnectionConfig>>,
    session_override: RwLock<Option<String>>,
}

impl ConfigResolver {
    pub fn new(http: reqwest::Client, config_url: impl Into<String>) -> Self {
        Self {
            http,
            config_url: config_url.into(),
            cached: Mutex::new(None),
            session_override: RwLock::new(None),
        }
    }

    /// Resolve the connection config, fetching it on first use.
    pub async fn resolve(&self) -> Result<ConnectionConfig> {
        let mut slot = self.cached.lock().await;
        if let Some(config) = slot.as_ref() {
            return Ok(config.clone());
        }
        let config = self.fetch().await?;
        debug!(
            "resolve: provider config cached (base_url={}, session={})",
            config.base_url, config.session_name
        );
        *slot = Some(config.clone());
        Ok(config)
    }

    async fn fetch(&self) -> Result<ConnectionConfig> {
        let url = self.config_url.clone();
        let resp = self
            .http
            .get(&url)
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
        let raw: Value = resp
            .json()
            .await
            .map_err(|source| SyncError::Decode { url, source })?;
        parse_connection_config(&raw)
    }

    /// Redirect all subsequent requests to another session (or back to the
    /// resolved one with `None`). Does not re-fetch the base config.
    pub fn set_session_override(&self, name: Option<String>) {
        if let Ok(mut guard) = self.session_override.write() {
            *guard = name;
        }
    }

    /// Session all requests should target: the runtime override when set,
    /// otherwise the resolved session name.
    pub fn effective_session(&self, config: &ConnectionConfig) -> String {
        self.session_override
            .read()
            .ok()
            .and_then(|guard| guard.clone())
            .unwrap_or_else(|| config.session_name.clone())
    }
}

/// Parse and validate the tenant-config payload
/// (`{ apiUrl, key, environment?, metadata? }`).
pub fn parse_connection_config(raw: &Value) -> Result<ConnectionConfig> {
    let base_url = crate::normalize::str_at(raw, &["apiUrl", "api_url", "baseUrl"])
        .ok_or_else(|| SyncError::Config("provider API URL is missing or empty".into()))?
        .trim_end_matches('/')
        .to_string();
    Url::parse(&base_url)
        .map_err(|e| SyncError::Config(format!("provider API URL {base_url:?} is invalid: {e}")))?;

    let api_key = crate::normalize::str_at(raw, &["key", "apiKey", "api_key"])
        .ok_or_else(|| SyncError::Config("provider API key is missing or empty".into()))?
        .to_string();

    Ok(ConnectionConfig {
        base_url,
        api_key,
        session_name: session_name_from(raw),
    })
}

/// An `environment` outside the reserved set names the session directly;
/// otherwise the metadata candidates are tried, then the default.
fn session_name_from(raw: &Value) -> String {
    if let Some(environment) = crate::normalize::str_at(raw, &["environment"]) {
        if !RESERVED_ENVIRONMENTS.contains(&environment.to_ascii_lowercase().as_str()) {
            return environment.to_string();
        }
    }
    crate::normalize::str_at(
        raw,
        &[
            "metadata.session",
            "metadata.wahaSession",
            "metadata.whatsappSession",
            "metadata.sessionName",
        ],
    )
    .unwrap_or(DEFAULT_SESSION)
    .to_string()
}
