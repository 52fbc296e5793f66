use super::{BackendError, SpeechBackend};
use crate::config_loader::Settings;
use async_trait::async_trait;
use reqwest::{Client, Url};
use tracing::debug;

/// The public Google Translate speech endpoint, answering MP3 for up to
/// 100 characters of text per request.
pub struct GoogleTranslateBackend {
    client: Client,
    endpoint: String,
}

impl GoogleTranslateBackend {
    pub fn new(endpoint: impl Into<String>, user_agent: &str) -> reqwest::Result<Self> {
        let client = Client::builder().user_agent(user_agent).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    pub fn from_settings(settings: &Settings) -> reqwest::Result<Self> {
        Self::new(settings.tts_url.clone(), &settings.user_agent)
    }

    pub fn request_url(&self, text: &str, language: &str) -> Result<Url, BackendError> {
        Url::parse_with_params(
            &self.endpoint,
            &[
                ("ie", "UTF-8"),
                ("client", "tw-ob"),
                ("tl", language),
                ("q", text),
            ],
        )
        .map_err(|e| BackendError::InvalidUrl {
            url: self.endpoint.clone(),
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl SpeechBackend for GoogleTranslateBackend {
    fn id(&self) -> &'static str {
        "google-translate"
    }

    async fn synthesize(&self, text: &str, language: &str) -> Result<Vec<u8>, BackendError> {
        let url = self.request_url(text, language)?;
        debug!(%url, "requesting speech");

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|source| BackendError::Request {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(BackendError::Status {
                url: url.to_string(),
                status,
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|source| BackendError::Request {
                url: url.to_string(),
                source,
            })?;
        if body.is_empty() {
            return Err(BackendError::EmptyBody {
                url: url.to_string(),
            });
        }
        Ok(body.to_vec())
    }
}
