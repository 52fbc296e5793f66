//! textspeak - speaks arbitrary text through an online text-to-speech service
//! that only accepts short utterances.
//!
//! Text is cut into chunks by [`segmenter`], each chunk is fetched in order by
//! the background [`worker`], and the audio is merged by [`artifacts`] into
//! one MP3 with pauses after punctuation. [`service::SpeechService`] ties the
//! pieces together for callers.

pub mod artifacts;
pub mod assembler;
pub mod backends;
pub mod config_loader;
pub mod fetcher;
pub mod languages;
pub mod segmenter;
pub mod service;
pub mod silence;
pub mod worker;

pub use config_loader::Settings;
pub use segmenter::{segment, Chunk, ChunkKind};
pub use service::{Notification, SpeechService};
pub use worker::{RequestId, RequestState};
