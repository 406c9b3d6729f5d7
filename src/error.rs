use thiserror::Error;

/// Errors surfaced by the synchronization client.
///
/// Normalization never produces an error: malformed provider records degrade
/// to skipped entries instead.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("request to {url} failed")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("provider returned HTTP {status} for {url}")]
    Status { status: u16, url: String },

    #[error("failed to decode response from {url}")]
    Decode {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

pub type Result<T> = std::result::Result<T, SyncError>;
