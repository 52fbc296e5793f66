use crate::backends::SpeechBackend;
use crate::segmenter::{Chunk, ChunkKind};
use crate::silence::SilenceProvider;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Explicit pauses are rendered twice as long as their marker count, so they
/// stand out from punctuation pauses.
pub const SILENCE_REPEAT_FACTOR: usize = 2;

pub const DEFAULT_ATTEMPTS: u32 = 3;

/// Every attempt at synthesizing one chunk failed.
#[derive(Debug, Error)]
#[error("giving up on {text:?} after {} attempts: {}", .attempts.len(), .attempts.join("; "))]
pub struct FetchError {
    pub text: String,
    /// One line per failed attempt, each naming the URL it hit.
    pub attempts: Vec<String>,
}

/// Turns chunks into audio: silence locally, words through the backend.
#[derive(Clone)]
pub struct SpeechFetcher {
    backend: Arc<dyn SpeechBackend>,
    silence: SilenceProvider,
    max_attempts: u32,
}

impl SpeechFetcher {
    pub fn new(
        backend: Arc<dyn SpeechBackend>,
        silence: SilenceProvider,
        max_attempts: u32,
    ) -> Self {
        Self {
            backend,
            silence,
            max_attempts: max_attempts.max(1),
        }
    }

    pub async fn fetch(&self, chunk: &Chunk, language: &str) -> Result<Vec<u8>, FetchError> {
        if let ChunkKind::Silence { count } = chunk.kind {
            return Ok(self.silence.render(SILENCE_REPEAT_FACTOR * count));
        }

        // No backoff between attempts.
        let mut attempts = Vec::new();
        for attempt in 1..=self.max_attempts {
            match self.backend.synthesize(&chunk.text, language).await {
                Ok(audio) => {
                    debug!(
                        backend = self.backend.id(),
                        chunk = chunk.index,
                        attempt,
                        bytes = audio.len(),
                        "chunk synthesized"
                    );
                    return Ok(audio);
                }
                Err(e) => {
                    warn!(
                        backend = self.backend.id(),
                        chunk = chunk.index,
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %e,
                        "speech fetch failed"
                    );
                    attempts.push(format!("attempt {}: {}", attempt, e));
                }
            }
        }

        Err(FetchError {
            text: chunk.text.clone(),
            attempts,
        })
    }
}
