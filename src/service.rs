use crate::artifacts::{ArtifactError, ArtifactState, ArtifactStore, Recorded};
use crate::assembler::{Assembler, ChunkAudio};
use crate::backends::{GoogleTranslateBackend, SpeechBackend};
use crate::config_loader::Settings;
use crate::fetcher::SpeechFetcher;
use crate::languages::{self, Language};
use crate::worker::{
    Request, RequestId, RequestState, RequestWorker, SegmentOptions, SpeechEvent,
};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Config(#[from] config::ConfigError),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("nothing to speak")]
    EmptyText,
    #[error("unsupported language {0:?}")]
    UnknownLanguage(String),
    #[error("speech worker has stopped")]
    WorkerStopped,
}

/// What the caller hears about its requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Notification {
    Progress {
        request_id: RequestId,
        received: usize,
        total: usize,
    },
    /// A chunk ready for playback before the whole request is done.
    /// Not sent for requests submitted with `all_at_once`.
    ChunkReady {
        request_id: RequestId,
        chunk_index: usize,
        chunk_count: usize,
        chunk_text: String,
        #[serde(skip)]
        audio: Vec<u8>,
    },
    Completed {
        request_id: RequestId,
        artifact: PathBuf,
    },
    Failed {
        request_id: RequestId,
        message: String,
    },
}

struct Entry {
    text: String,
    language: String,
    all_at_once: bool,
    ignored: bool,
}

type Entries = Arc<Mutex<HashMap<RequestId, Entry>>>;

/// Submit text, get notified as its audio arrives, save the merged result.
pub struct SpeechService {
    worker: RequestWorker,
    store: Arc<Mutex<ArtifactStore>>,
    entries: Entries,
    languages: Vec<Language>,
    consumer: JoinHandle<()>,
}

impl SpeechService {
    /// Builds a service talking to the configured online endpoint.
    pub fn new(
        settings: &Settings,
    ) -> Result<(Self, UnboundedReceiver<Notification>), ServiceError> {
        let backend = GoogleTranslateBackend::from_settings(settings)?;
        Self::with_backend(settings, Arc::new(backend))
    }

    /// Must be called within a tokio runtime.
    pub fn with_backend(
        settings: &Settings,
        backend: Arc<dyn SpeechBackend>,
    ) -> Result<(Self, UnboundedReceiver<Notification>), ServiceError> {
        settings.validate()?;
        let silence = settings.silence_provider()?;

        let fetcher = SpeechFetcher::new(backend, silence.clone(), settings.retry_attempts);
        let options = SegmentOptions {
            max_len: settings.max_len,
            silence_marker: settings.silence_marker.clone(),
        };
        let assembler = Assembler::new(
            silence,
            settings.silence_count_short,
            settings.silence_count_long,
        );
        let store = Arc::new(Mutex::new(ArtifactStore::new(settings.work_dir(), assembler)));
        let entries: Entries = Arc::new(Mutex::new(HashMap::new()));

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();
        let worker = RequestWorker::spawn(fetcher, options, event_tx);
        let consumer = tokio::spawn(consume(
            event_rx,
            store.clone(),
            entries.clone(),
            notify_tx,
        ));

        info!(work_dir = %settings.work_dir, "speech service ready");
        let service = Self {
            worker,
            store,
            entries,
            languages: settings.languages.clone(),
            consumer,
        };
        Ok((service, notify_rx))
    }

    pub fn languages(&self) -> &[Language] {
        &self.languages
    }

    /// Queues `text` for speaking and returns immediately.
    ///
    /// Text already submitted in the same language is not fetched again:
    /// the earlier request's id comes back and it is watched again. A failed
    /// earlier request is replaced by a fresh one.
    pub fn submit(
        &self,
        text: &str,
        language: &str,
        all_at_once: bool,
    ) -> Result<RequestId, SubmitError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SubmitError::EmptyText);
        }
        let language = languages::find(&self.languages, language)
            .ok_or_else(|| SubmitError::UnknownLanguage(language.to_string()))?
            .code
            .clone();

        let existing = self.entries.lock().ok().and_then(|mut entries| {
            let (id, entry) = entries
                .iter_mut()
                .find(|(_, e)| e.text == text && e.language == language)?;
            entry.ignored = false;
            Some(*id)
        });
        if let Some(id) = existing {
            if self.state(id) != Some(RequestState::Failed) {
                debug!(request = %id, "text already submitted, reusing");
                return Ok(id);
            }
            info!(request = %id, "replacing failed request");
            self.discard(id);
        }

        let request = Request::new(text, language.clone(), all_at_once);
        let id = request.id;
        if let Ok(mut store) = self.store.lock() {
            store.register(id);
        }
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(
                id,
                Entry {
                    text: text.to_string(),
                    language,
                    all_at_once,
                    ignored: false,
                },
            );
        }

        self.worker.submit(request).map_err(|_| {
            self.forget(id);
            SubmitError::WorkerStopped
        })
    }

    /// Stops notifications for `request_id`; its fetching carries on.
    pub fn ignore(&self, request_id: RequestId) {
        self.set_ignored(request_id, true);
    }

    /// Resumes notifications for an ignored request.
    pub fn watch(&self, request_id: RequestId) {
        self.set_ignored(request_id, false);
    }

    fn set_ignored(&self, request_id: RequestId, ignored: bool) {
        if let Ok(mut entries) = self.entries.lock() {
            if let Some(entry) = entries.get_mut(&request_id) {
                entry.ignored = ignored;
            }
        }
    }

    /// A request whose chunks could not be stored counts as failed even when
    /// every fetch succeeded.
    pub fn state(&self, request_id: RequestId) -> Option<RequestState> {
        let failed = self
            .store
            .lock()
            .ok()
            .and_then(|store| store.state(request_id).map(ArtifactState::is_failed))
            .unwrap_or(false);
        if failed {
            return Some(RequestState::Failed);
        }
        self.worker.state(request_id)
    }

    /// Audio of a chunk that has arrived but not been merged yet.
    pub fn chunk_audio(&self, request_id: RequestId, chunk_index: usize) -> Option<Vec<u8>> {
        let store = self.store.lock().ok()?;
        store.chunk(request_id, chunk_index).map(<[u8]>::to_vec)
    }

    pub fn artifact(&self, request_id: RequestId) -> Option<PathBuf> {
        let store = self.store.lock().ok()?;
        store.artifact(request_id).map(Path::to_path_buf)
    }

    /// Copies the merged audio of `request_id` to `dest`.
    pub fn save(&self, request_id: RequestId, dest: &Path) -> Result<u64, ArtifactError> {
        match self.store.lock() {
            Ok(store) => store.save(request_id, dest),
            Err(_) => Err(ArtifactError::NotReady(request_id)),
        }
    }

    /// Forgets a request and deletes its artifact.
    pub fn discard(&self, request_id: RequestId) {
        if let Ok(mut store) = self.store.lock() {
            store.discard(request_id);
        }
        self.forget(request_id);
    }

    fn forget(&self, request_id: RequestId) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.remove(&request_id);
        }
        self.worker.forget(request_id);
    }

    /// Teardown: stops the worker and deletes every artifact of this run.
    /// Returns the number of files removed.
    pub fn cleanup(self) -> usize {
        self.worker.abort();
        self.consumer.abort();
        let removed = match self.store.lock() {
            Ok(mut store) => store.cleanup(),
            Err(e) => {
                warn!("artifact store unavailable during cleanup: {}", e);
                0
            }
        };
        info!(removed, "speech service cleaned up");
        removed
    }
}

async fn consume(
    mut events: UnboundedReceiver<SpeechEvent>,
    store: Arc<Mutex<ArtifactStore>>,
    entries: Entries,
    notify: UnboundedSender<Notification>,
) {
    while let Some(event) = events.recv().await {
        let request_id = event.request_id();
        let Some((all_at_once, ignored)) = entries
            .lock()
            .ok()
            .and_then(|e| e.get(&request_id).map(|e| (e.all_at_once, e.ignored)))
        else {
            debug!(request = %request_id, "result for discarded request dropped");
            continue;
        };

        let notifications = match event {
            SpeechEvent::Chunk {
                chunk_index,
                chunk_count,
                chunk_text,
                silence,
                audio,
                ..
            } => {
                let ready = (!all_at_once).then(|| Notification::ChunkReady {
                    request_id,
                    chunk_index,
                    chunk_count,
                    chunk_text: chunk_text.clone(),
                    audio: audio.clone(),
                });
                let chunk = ChunkAudio {
                    text: chunk_text,
                    silence,
                    audio,
                };
                let recorded = match store.lock() {
                    Ok(mut store) => {
                        let recorded = store.record(request_id, chunk_index, chunk_count, chunk);
                        if matches!(&recorded, Err(e) if !matches!(e, ArtifactError::Failed(_))) {
                            store.fail(request_id);
                        }
                        recorded
                    }
                    Err(_) => Err(ArtifactError::NotReady(request_id)),
                };
                after_record(request_id, chunk_count, recorded, ready)
            }
            SpeechEvent::Failed { message, .. } => {
                if let Ok(mut store) = store.lock() {
                    store.fail(request_id);
                }
                vec![Notification::Failed {
                    request_id,
                    message,
                }]
            }
        };

        if ignored {
            continue;
        }
        for notification in notifications {
            if notify.send(notification).is_err() {
                debug!("notification receiver dropped");
            }
        }
    }
}

fn after_record(
    request_id: RequestId,
    chunk_count: usize,
    recorded: Result<Recorded, ArtifactError>,
    ready: Option<Notification>,
) -> Vec<Notification> {
    match recorded {
        Ok(Recorded::Partial { received, total }) => {
            let mut out = vec![Notification::Progress {
                request_id,
                received,
                total,
            }];
            out.extend(ready);
            out
        }
        Ok(Recorded::Merged(artifact)) => {
            let mut out = vec![Notification::Progress {
                request_id,
                received: chunk_count,
                total: chunk_count,
            }];
            out.extend(ready);
            out.push(Notification::Completed {
                request_id,
                artifact,
            });
            out
        }
        Err(ArtifactError::Failed(_)) => {
            debug!(request = %request_id, "chunk for failed request dropped");
            Vec::new()
        }
        Err(e) => {
            error!(request = %request_id, "{}", e);
            vec![Notification::Failed {
                request_id,
                message: e.to_string(),
            }]
        }
    }
}
