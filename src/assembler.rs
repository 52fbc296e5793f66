//! Concatenates chunk audio into one artifact, with pauses after punctuation.

use crate::silence::SilenceProvider;

pub const SILENCE_COUNT_SHORT: usize = 2;
pub const SILENCE_COUNT_LONG: usize = 4;

/// Audio received for one chunk, with the text it was made from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkAudio {
    pub text: String,
    /// Silence chunks already carry their pause and get no padding.
    pub silence: bool,
    pub audio: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct Assembler {
    silence: SilenceProvider,
    short: usize,
    long: usize,
}

impl Assembler {
    pub fn new(silence: SilenceProvider, short: usize, long: usize) -> Self {
        Self {
            silence,
            short,
            long,
        }
    }

    /// Silence units to append after `chunk`.
    pub fn padding_for(&self, chunk: &ChunkAudio) -> usize {
        if chunk.silence {
            return 0;
        }
        match chunk.text.trim_end().chars().last() {
            Some('.' | '?' | '!') => self.long,
            Some(',' | ':' | ';' | '(' | ')') => self.short,
            _ => 0,
        }
    }

    pub fn merge<'a>(&self, chunks: impl IntoIterator<Item = &'a ChunkAudio>) -> Vec<u8> {
        let mut merged = Vec::new();
        for chunk in chunks {
            merged.extend_from_slice(&chunk.audio);
            merged.extend_from_slice(&self.silence.render(self.padding_for(chunk)));
        }
        merged
    }
}
