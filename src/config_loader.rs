use crate::languages::{self, Language};
use crate::silence::SilenceProvider;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const DEFAULT_TTS_URL: &str = "https://translate.google.com/translate_tts";

pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/4.0 (compatible; MSIE 6.0; Windows NT 5.0) Simple TextSpeak";

/// Silence for ~350 milliseconds, as base64-encoded MP3 (32Kbps 16KHz mono).
pub const DEFAULT_SILENCE_UNIT: &str = concat!(
    "//JIwITXABmDpmJUGITYtt2jqDK1cxCwimjmHZDQGLRDRA7hGPO7HRlzuRjybL/kVyf/3T//2VyT",
    "2t//yST9GkY7oRT53I3qdCKdG+yuShJ8in79X/88mro5FcmHcDMRjnRqEV6Md3Y4IQHFoEHJ/RWU",
    "J2Nol+30rL91OGCoLEtSDE1QxIZyjUTAKRUSBnDo//JIwAsOGxKAXoZUGMZIaCtB7oEbvaOf6Nyg",
    "KRoYMQzIrK/lSNmgihPQerwk7s8ke6BWMT/ioCJFidX/IhL/////////////////////////////",
    "////////////////////////////////////////////////////////////////////////////",
    "//////JIwAysUgAAAlwAAAAA////AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA",
    "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA",
    "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA//JIwC6+0xVAAlwAAAAAAAAAAAAAAAAA",
    "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA",
    "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA",
    "AAAAAAAA",
);

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    // Remote synthesis
    pub tts_url: String,
    pub user_agent: String,
    pub retry_attempts: u32,
    pub default_language: String,
    #[serde(default = "languages::builtin")]
    pub languages: Vec<Language>,
    // Segmentation
    pub max_len: usize,
    pub silence_marker: String,
    // Assembly
    pub silence_unit: String, // base64
    pub silence_count_short: usize,
    pub silence_count_long: usize,
    pub work_dir: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            tts_url: DEFAULT_TTS_URL.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            retry_attempts: 3,
            default_language: "en".to_string(),
            languages: languages::builtin(),
            max_len: 100,
            silence_marker: "\n".to_string(),
            silence_unit: DEFAULT_SILENCE_UNIT.to_string(),
            silence_count_short: 2,
            silence_count_long: 4,
            work_dir: default_work_dir(),
        }
    }
}

fn default_work_dir() -> String {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("textspeak")
        .to_string_lossy()
        .into_owned()
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Defaults, then `TextSpeak.*` in the working directory, then the user
    /// config directory, then `extra`, then `TEXTSPEAK_*` variables.
    pub fn load(extra: Option<&Path>) -> Result<Self, ConfigError> {
        let user_config = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("textspeak/TextSpeak");

        let mut builder = Config::builder()
            .set_default("tts_url", DEFAULT_TTS_URL)?
            .set_default("user_agent", DEFAULT_USER_AGENT)?
            .set_default("retry_attempts", 3)?
            .set_default("default_language", "en")?
            .set_default("max_len", 100)?
            .set_default("silence_marker", "\n")?
            .set_default("silence_unit", DEFAULT_SILENCE_UNIT)?
            .set_default("silence_count_short", 2)?
            .set_default("silence_count_long", 4)?
            .set_default("work_dir", default_work_dir())?
            .add_source(File::with_name("TextSpeak").required(false))
            .add_source(File::with_name(&user_config.to_string_lossy()).required(false));

        if let Some(path) = extra {
            builder = builder.add_source(File::from(path).required(true));
        }

        // e.g. TEXTSPEAK_MAX_LEN=80
        let settings: Settings = builder
            .add_source(Environment::with_prefix("TEXTSPEAK").try_parsing(true))
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_len < 2 {
            return Err(ConfigError::Message(format!(
                "Invalid max_len: {}. Must be at least 2",
                self.max_len
            )));
        }
        if self.silence_marker.is_empty() {
            return Err(ConfigError::Message(
                "silence_marker must not be empty".to_string(),
            ));
        }
        // Blanks are normalised and split on before markers are looked for.
        if self.silence_marker.contains([' ', '\r', '\t']) {
            return Err(ConfigError::Message(format!(
                "silence_marker {:?} must not contain spaces, tabs or carriage returns",
                self.silence_marker
            )));
        }
        if self.retry_attempts == 0 {
            return Err(ConfigError::Message(
                "retry_attempts must be greater than 0".to_string(),
            ));
        }
        if self.languages.is_empty() {
            return Err(ConfigError::Message(
                "languages must list at least one language".to_string(),
            ));
        }
        if languages::find(&self.languages, &self.default_language).is_none() {
            return Err(ConfigError::Message(format!(
                "default_language {:?} is not in the language table",
                self.default_language
            )));
        }
        self.silence_provider()?;
        Ok(())
    }

    pub fn silence_provider(&self) -> Result<SilenceProvider, ConfigError> {
        SilenceProvider::from_base64(&self.silence_unit)
            .map_err(|e| ConfigError::Message(format!("Invalid silence_unit: {}", e)))
    }

    pub fn work_dir(&self) -> PathBuf {
        PathBuf::from(&self.work_dir)
    }
}
