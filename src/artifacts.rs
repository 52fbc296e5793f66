use crate::assembler::{Assembler, ChunkAudio};
use crate::worker::RequestId;
use chrono::Local;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("request {request_id} expected chunk {expected}, got {got}")]
    OutOfOrder {
        request_id: RequestId,
        expected: usize,
        got: usize,
    },

    #[error("request {0} was never registered")]
    UnknownRequest(RequestId),

    #[error("request {0} has already been merged")]
    AlreadyMerged(RequestId),

    #[error("request {0} has failed")]
    Failed(RequestId),

    #[error("request {0} has no merged audio yet")]
    NotReady(RequestId),

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// What a request has received so far.
#[derive(Debug, Default)]
pub struct ArtifactState {
    received: BTreeMap<usize, ChunkAudio>,
    chunk_count: usize,
    completed: bool,
    failed: bool,
    merged: Option<PathBuf>,
}

impl ArtifactState {
    pub fn received(&self) -> usize {
        self.received.len()
    }

    /// Chunks expected; 1 once merged.
    pub fn chunk_count(&self) -> usize {
        self.chunk_count
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    pub fn is_failed(&self) -> bool {
        self.failed
    }

    pub fn merged(&self) -> Option<&Path> {
        self.merged.as_deref()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recorded {
    Partial { received: usize, total: usize },
    Merged(PathBuf),
}

/// Keeps chunk audio in memory until a request is complete, then writes the
/// merged artifact into the work directory.
pub struct ArtifactStore {
    work_dir: PathBuf,
    assembler: Assembler,
    states: HashMap<RequestId, ArtifactState>,
}

impl ArtifactStore {
    pub fn new(work_dir: impl Into<PathBuf>, assembler: Assembler) -> Self {
        Self {
            work_dir: work_dir.into(),
            assembler,
            states: HashMap::new(),
        }
    }

    pub fn register(&mut self, request_id: RequestId) {
        self.states.entry(request_id).or_default();
    }

    /// Accepts the next chunk of a registered request, merging once the last
    /// one is in.
    pub fn record(
        &mut self,
        request_id: RequestId,
        chunk_index: usize,
        chunk_count: usize,
        chunk: ChunkAudio,
    ) -> Result<Recorded, ArtifactError> {
        let Some(state) = self.states.get_mut(&request_id) else {
            return Err(ArtifactError::UnknownRequest(request_id));
        };
        if state.failed {
            return Err(ArtifactError::Failed(request_id));
        }
        if state.completed {
            return Err(ArtifactError::AlreadyMerged(request_id));
        }
        let expected = state.received.len();
        if chunk_index != expected {
            return Err(ArtifactError::OutOfOrder {
                request_id,
                expected,
                got: chunk_index,
            });
        }

        state.chunk_count = chunk_count;
        state.received.insert(chunk_index, chunk);
        if state.received.len() < chunk_count {
            return Ok(Recorded::Partial {
                received: state.received.len(),
                total: chunk_count,
            });
        }

        self.merge(request_id).map(Recorded::Merged)
    }

    fn merge(&mut self, request_id: RequestId) -> Result<PathBuf, ArtifactError> {
        let Some(state) = self.states.get_mut(&request_id) else {
            return Err(ArtifactError::NotReady(request_id));
        };

        let bytes = self.assembler.merge(state.received.values());
        fs::create_dir_all(&self.work_dir).map_err(|source| ArtifactError::Io {
            path: self.work_dir.clone(),
            source,
        })?;
        let path = self.work_dir.join(format!(
            "speech_{}_{}.mp3",
            request_id,
            Local::now().format("%Y%m%d_%H%M%S")
        ));
        fs::write(&path, &bytes).map_err(|source| ArtifactError::Io {
            path: path.clone(),
            source,
        })?;

        info!(
            request = %request_id,
            chunks = state.received.len(),
            bytes = bytes.len(),
            path = %path.display(),
            "merged speech"
        );
        state.received.clear();
        state.chunk_count = 1;
        state.completed = true;
        state.merged = Some(path.clone());
        Ok(path)
    }

    /// Gives up on a request: drops its buffered chunks and refuses any more.
    pub fn fail(&mut self, request_id: RequestId) {
        if let Some(state) = self.states.get_mut(&request_id) {
            state.received.clear();
            state.failed = true;
        }
    }

    pub fn state(&self, request_id: RequestId) -> Option<&ArtifactState> {
        self.states.get(&request_id)
    }

    /// Audio of a chunk received but not yet merged.
    pub fn chunk(&self, request_id: RequestId, chunk_index: usize) -> Option<&[u8]> {
        self.states
            .get(&request_id)?
            .received
            .get(&chunk_index)
            .map(|c| c.audio.as_slice())
    }

    pub fn artifact(&self, request_id: RequestId) -> Option<&Path> {
        self.states.get(&request_id)?.merged()
    }

    /// Copies the merged artifact to `dest`, returning the bytes written.
    pub fn save(&self, request_id: RequestId, dest: &Path) -> Result<u64, ArtifactError> {
        let source = self
            .artifact(request_id)
            .ok_or(ArtifactError::NotReady(request_id))?;
        fs::copy(source, dest).map_err(|source| ArtifactError::Io {
            path: dest.to_path_buf(),
            source,
        })
    }

    pub fn discard(&mut self, request_id: RequestId) {
        if let Some(state) = self.states.remove(&request_id) {
            if let Some(path) = state.merged {
                remove_artifact(&path);
            }
        }
    }

    /// Deletes every artifact written in this run, returning how many went.
    pub fn cleanup(&mut self) -> usize {
        let mut removed = 0;
        for (_, state) in self.states.drain() {
            if let Some(path) = state.merged {
                if remove_artifact(&path) {
                    removed += 1;
                }
            }
        }
        debug!(removed, "artifacts cleaned up");
        removed
    }
}

fn remove_artifact(path: &Path) -> bool {
    match fs::remove_file(path) {
        Ok(()) => true,
        Err(e) => {
            warn!(path = %path.display(), "failed to remove artifact: {}", e);
            false
        }
    }
}
