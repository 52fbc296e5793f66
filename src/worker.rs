use crate::fetcher::SpeechFetcher;
use crate::segmenter::segment;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct RequestId(u64);

impl RequestId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One text-to-speech job.
#[derive(Debug, Clone)]
pub struct Request {
    pub id: RequestId,
    pub text: String,
    pub language: String,
    pub all_at_once: bool,
}

impl Request {
    pub fn new(text: impl Into<String>, language: impl Into<String>, all_at_once: bool) -> Self {
        Self {
            id: RequestId::next(),
            text: text.into(),
            language: language.into(),
            all_at_once,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestState {
    Queued,
    Fetching,
    Completed,
    Failed,
}

/// Worker output. Per request, events arrive in chunk index order, at most
/// one per chunk, and nothing follows a `Failed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeechEvent {
    Chunk {
        request_id: RequestId,
        chunk_index: usize,
        chunk_count: usize,
        chunk_text: String,
        silence: bool,
        audio: Vec<u8>,
    },
    Failed {
        request_id: RequestId,
        chunk_index: usize,
        chunk_count: usize,
        message: String,
    },
}

impl SpeechEvent {
    pub fn request_id(&self) -> RequestId {
        match self {
            SpeechEvent::Chunk { request_id, .. } | SpeechEvent::Failed { request_id, .. } => {
                *request_id
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct SegmentOptions {
    pub max_len: usize,
    pub silence_marker: String,
}

#[derive(Debug, thiserror::Error)]
#[error("speech worker has stopped")]
pub struct WorkerStopped;

type States = Arc<Mutex<HashMap<RequestId, RequestState>>>;

/// The single background consumer of the request queue. Requests are handled
/// one at a time in submission order, their chunks strictly in sequence.
pub struct RequestWorker {
    tx: UnboundedSender<Request>,
    states: States,
    handle: JoinHandle<()>,
}

impl RequestWorker {
    /// Starts the worker task; must be called within a tokio runtime.
    pub fn spawn(
        fetcher: SpeechFetcher,
        options: SegmentOptions,
        events: UnboundedSender<SpeechEvent>,
    ) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Request>();
        let states: States = Arc::new(Mutex::new(HashMap::new()));
        let task_states = states.clone();

        let handle = tokio::spawn(async move {
            while let Some(request) = rx.recv().await {
                let id = request.id;
                if !update_state(&task_states, id, RequestState::Fetching) {
                    debug!(request = %id, "request forgotten before it started");
                    continue;
                }
                let outcome = process(&fetcher, &options, &events, request).await;
                update_state(&task_states, id, outcome);
            }
            debug!("request queue closed, worker stopping");
        });

        Self { tx, states, handle }
    }

    /// Queues `request` and returns at once.
    pub fn submit(&self, request: Request) -> Result<RequestId, WorkerStopped> {
        let id = request.id;
        if let Ok(mut states) = self.states.lock() {
            states.insert(id, RequestState::Queued);
        }
        if self.tx.send(request).is_err() {
            self.forget(id);
            return Err(WorkerStopped);
        }
        debug!(request = %id, "request queued");
        Ok(id)
    }

    pub fn state(&self, id: RequestId) -> Option<RequestState> {
        self.states.lock().ok()?.get(&id).copied()
    }

    pub fn forget(&self, id: RequestId) {
        if let Ok(mut states) = self.states.lock() {
            states.remove(&id);
        }
    }

    /// Stops taking requests and waits until the queue has drained.
    pub async fn shutdown(self) {
        drop(self.tx);
        if let Err(e) = self.handle.await {
            warn!("worker task ended abnormally: {}", e);
        }
    }

    /// Stops at once, abandoning queued and in-flight requests.
    pub fn abort(&self) {
        self.handle.abort();
    }
}

/// Forgotten requests stay forgotten; returns whether `id` was still known.
fn update_state(states: &States, id: RequestId, state: RequestState) -> bool {
    match states.lock() {
        Ok(mut states) => match states.get_mut(&id) {
            Some(current) => {
                *current = state;
                true
            }
            None => false,
        },
        Err(_) => false,
    }
}

async fn process(
    fetcher: &SpeechFetcher,
    options: &SegmentOptions,
    events: &UnboundedSender<SpeechEvent>,
    request: Request,
) -> RequestState {
    let chunks = segment(&request.text, options.max_len, &options.silence_marker);
    let chunk_count = chunks.len();
    info!(
        request = %request.id,
        language = %request.language,
        chunks = chunk_count,
        "processing request"
    );
    if chunks.is_empty() {
        debug!(request = %request.id, "nothing to speak");
        return RequestState::Completed;
    }

    for chunk in &chunks {
        let event = match fetcher.fetch(chunk, &request.language).await {
            Ok(audio) => SpeechEvent::Chunk {
                request_id: request.id,
                chunk_index: chunk.index,
                chunk_count,
                chunk_text: chunk.text.clone(),
                silence: chunk.is_silence(),
                audio,
            },
            Err(e) => {
                error!(request = %request.id, chunk = chunk.index, "{}", e);
                emit(
                    events,
                    SpeechEvent::Failed {
                        request_id: request.id,
                        chunk_index: chunk.index,
                        chunk_count,
                        message: e.to_string(),
                    },
                );
                return RequestState::Failed;
            }
        };
        emit(events, event);
    }

    info!(request = %request.id, "all chunks fetched");
    RequestState::Completed
}

fn emit(events: &UnboundedSender<SpeechEvent>, event: SpeechEvent) {
    if events.send(event).is_err() {
        warn!("event receiver dropped, discarding result");
    }
}
