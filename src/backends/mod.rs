pub mod google;

use async_trait::async_trait;
use thiserror::Error;

pub use google::GoogleTranslateBackend;

/// A single failed synthesis attempt. Every variant names the URL it hit.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("cannot build request from {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} answered {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },

    #[error("{url} returned no audio")]
    EmptyBody { url: String },
}

/// Trait that all remote speech synthesis services implement.
/// One call turns one short utterance into encoded audio bytes.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SpeechBackend: Send + Sync {
    /// Returns the unique ID of the backend (e.g., "google-translate")
    fn id(&self) -> &'static str;

    /// Synthesizes `text` spoken in `language`, a two-letter code.
    async fn synthesize(&self, text: &str, language: &str) -> Result<Vec<u8>, BackendError>;
}
