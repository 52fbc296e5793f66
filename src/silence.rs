use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::sync::Arc;

/// A pre-rendered pause; longer pauses are whole multiples of it.
#[derive(Debug, Clone)]
pub struct SilenceProvider {
    unit: Arc<[u8]>,
}

impl SilenceProvider {
    pub fn new(unit: impl Into<Vec<u8>>) -> Self {
        Self {
            unit: Arc::from(unit.into()),
        }
    }

    pub fn from_base64(encoded: &str) -> Result<Self, base64::DecodeError> {
        STANDARD.decode(encoded.trim()).map(Self::new)
    }

    pub fn unit_len(&self) -> usize {
        self.unit.len()
    }

    /// The silence unit concatenated `repeat` times.
    pub fn render(&self, repeat: usize) -> Vec<u8> {
        self.unit.repeat(repeat)
    }
}
