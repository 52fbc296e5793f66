//! Splits free text into chunks short enough for the online synthesis service.
//!
//! The service only accepts short utterances, so text is cut at word
//! boundaries, preferably right after punctuation so that intonation stays
//! natural. Explicit silence markers in the text become their own chunks.

use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;

/// Longest utterance the service accepts, in characters.
pub const DEFAULT_MAX_LEN: usize = 100;

/// Marker that inserts a pause, chopping up the sentence if inside one.
pub const DEFAULT_SILENCE_MARKER: &str = "\n";

/// Characters that end a phrase. The en dash is the only non-ASCII member.
pub const PUNCTUATION: [char; 9] = [',', ':', ';', '.', '–', '?', '!', '(', ')'];

lazy_static! {
    static ref BLANKS: Regex = Regex::new(r"[\r\t]").expect("static regex");
}

pub fn is_punctuation(c: char) -> bool {
    PUNCTUATION.contains(&c)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ChunkKind {
    /// Text to be spoken.
    Words,
    /// A run of `count` consecutive silence markers.
    Silence { count: usize },
}

/// One unit of text (or silence) sized for a single synthesis call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Chunk {
    pub index: usize,
    pub text: String,
    pub kind: ChunkKind,
    pub trailing_punctuation: Option<char>,
}

impl Chunk {
    pub fn is_silence(&self) -> bool {
        matches!(self.kind, ChunkKind::Silence { .. })
    }

    /// Marker count of a silence chunk, 0 for words.
    pub fn silence_count(&self) -> usize {
        match self.kind {
            ChunkKind::Silence { count } => count,
            ChunkKind::Words => 0,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Token<'a> {
    Word(&'a str),
    Silence(usize),
}

/// Splits `text` into ordered chunks.
///
/// Word chunks stay shorter than `max_len` characters, except for text that
/// fits `max_len` as a whole (kept in one piece) and for a single
/// punctuation-terminated word that is itself too long (emitted alone).
/// Every run of `silence_marker` becomes one silence chunk.
pub fn segment(text: &str, max_len: usize, silence_marker: &str) -> Vec<Chunk> {
    let normalized = BLANKS.replace_all(text, " ");
    let words: Vec<&str> = if normalized.chars().count() > max_len {
        normalized.split(' ').filter(|w| !w.is_empty()).collect()
    } else {
        vec![normalized.as_ref()]
    };

    let mut packer = Packer::new(max_len, silence_marker);
    for token in tokenize(&words, silence_marker) {
        packer.push(token);
    }
    packer.finish()
}

fn tokenize<'a>(words: &[&'a str], marker: &str) -> Vec<Token<'a>> {
    let mut tokens = Vec::new();
    for word in words {
        if marker.is_empty() || !word.contains(marker) {
            push_word(&mut tokens, word);
            continue;
        }

        let mut markers = 0;
        for (i, piece) in word.split(marker).enumerate() {
            if i > 0 {
                markers += 1;
            }
            if piece.trim().is_empty() {
                continue;
            }
            if markers > 0 {
                push_silence(&mut tokens, markers);
                markers = 0;
            }
            push_word(&mut tokens, piece);
        }
        if markers > 0 {
            push_silence(&mut tokens, markers);
        }
    }
    tokens
}

fn push_word<'a>(tokens: &mut Vec<Token<'a>>, word: &'a str) {
    let word = word.trim();
    if !word.is_empty() {
        tokens.push(Token::Word(word));
    }
}

// Markers separated only by blanks still form one run.
fn push_silence(tokens: &mut Vec<Token<'_>>, count: usize) {
    match tokens.last_mut() {
        Some(Token::Silence(run)) => *run += count,
        _ => tokens.push(Token::Silence(count)),
    }
}

struct Packer<'m> {
    max_len: usize,
    marker: &'m str,
    sentence: String,
    chunks: Vec<Chunk>,
}

impl<'m> Packer<'m> {
    fn new(max_len: usize, marker: &'m str) -> Self {
        Self {
            max_len,
            marker,
            sentence: String::new(),
            chunks: Vec::new(),
        }
    }

    fn push(&mut self, token: Token<'_>) {
        let word = match token {
            Token::Silence(count) => {
                self.flush();
                self.emit_silence(count);
                return;
            }
            Token::Word(word) => word,
        };

        let first = word.chars().next();
        let last = word.chars().last();
        if last.is_some_and(is_punctuation) {
            if self.fits(word) {
                self.append(word);
                self.flush();
            } else {
                self.flush();
                self.emit_words(word);
            }
        } else if first.is_some_and(is_punctuation) {
            // An opening bracket and the like starts the next chunk.
            self.flush();
            self.sentence = word.to_string();
        } else if self.fits(word) {
            self.append(word);
        } else {
            self.flush();
            self.sentence = word.to_string();
        }
    }

    fn fits(&self, word: &str) -> bool {
        self.sentence.chars().count() + word.chars().count() + 1 < self.max_len
    }

    fn append(&mut self, word: &str) {
        self.sentence.push(' ');
        self.sentence.push_str(word);
    }

    fn flush(&mut self) {
        let sentence = std::mem::take(&mut self.sentence);
        self.emit_words(&sentence);
    }

    fn emit_words(&mut self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        self.chunks.push(Chunk {
            index: self.chunks.len(),
            text: text.to_string(),
            kind: ChunkKind::Words,
            trailing_punctuation: text.chars().last().filter(|c| is_punctuation(*c)),
        });
    }

    fn emit_silence(&mut self, count: usize) {
        self.chunks.push(Chunk {
            index: self.chunks.len(),
            text: self.marker.repeat(count),
            kind: ChunkKind::Silence { count },
            trailing_punctuation: None,
        });
    }

    fn finish(mut self) -> Vec<Chunk> {
        self.flush();
        self.chunks
    }
}
