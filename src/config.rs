use crate::audio::{AudioConfig, VadConfig};
use crate::error::{DubError, Result};
use crate::matcher::MatchConfig;
use crate::timing::TimingConfig;
use crate::video::VideoConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TtsProvider {
    #[default]
    OpenAi,
    ElevenLabs,
}

impl std::fmt::Display for TtsProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TtsProvider::OpenAi => write!(f, "openai"),
            TtsProvider::ElevenLabs => write!(f, "elevenlabs"),
        }
    }
}

impl std::str::FromStr for TtsProvider {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(TtsProvider::OpenAi),
            "elevenlabs" => Ok(TtsProvider::ElevenLabs),
            _ => Err(format!(
                "Unknown TTS provider: {}. Use 'openai' or 'elevenlabs'",
                s
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RewriteProvider {
    #[default]
    OpenAi,
    Gemini,
}

impl std::fmt::Display for RewriteProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RewriteProvider::OpenAi => write!(f, "openai"),
            RewriteProvider::Gemini => write!(f, "gemini"),
        }
    }
}

impl std::str::FromStr for RewriteProvider {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(RewriteProvider::OpenAi),
            "gemini" => Ok(RewriteProvider::Gemini),
            _ => Err(format!("Unknown rewriter: {}. Use 'openai' or 'gemini'", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub openai_api_key: Option<String>,
    pub gemini_api_key: Option<String>,
    pub elevenlabs_api_key: Option<String>,
    pub tts_provider: TtsProvider,
    pub rewriter: RewriteProvider,
    pub openai_voice: String,
    pub elevenlabs_voice_id: String,
    pub concurrency: usize,
    /// Names and terms passed to Whisper as a spelling prompt.
    pub transcription_keywords: Option<String>,
    pub timing: TimingConfig,
    pub matching: MatchConfig,
    pub audio: AudioConfig,
    pub vad: VadConfig,
    pub video: VideoConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            gemini_api_key: None,
            elevenlabs_api_key: None,
            tts_provider: TtsProvider::default(),
            rewriter: RewriteProvider::default(),
            openai_voice: "onyx".to_string(),
            elevenlabs_voice_id: "ksNuhhaBnNLdMLz6SavZ".to_string(),
            concurrency: 4,
            transcription_keywords: None,
            timing: TimingConfig::default(),
            matching: MatchConfig::default(),
            audio: AudioConfig::default(),
            vad: VadConfig::default(),
            video: VideoConfig::default(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let mut config = Self::default();

        if let Some(config_path) = Self::config_file_path() {
            if config_path.exists() {
                let contents = std::fs::read_to_string(&config_path)?;
                config = toml::from_str::<Config>(&contents).map_err(|e| {
                    DubError::Config(format!("{}: {}", config_path.display(), e))
                })?;
            }
        }

        config.apply_env();
        Ok(config)
    }

    /// Override file values with environment variables.
    pub fn apply_env(&mut self) {
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            self.openai_api_key = Some(key);
        }
        if let Ok(key) = std::env::var("GEMINI_API_KEY") {
            self.gemini_api_key = Some(key);
        }
        if let Ok(key) = std::env::var("ELEVENLABS_API_KEY") {
            self.elevenlabs_api_key = Some(key);
        }
        if let Ok(provider) = std::env::var("DUBSYNC_TTS_PROVIDER") {
            if let Ok(p) = provider.parse() {
                self.tts_provider = p;
            }
        }
        if let Ok(rewriter) = std::env::var("DUBSYNC_REWRITER") {
            if let Ok(r) = rewriter.parse() {
                self.rewriter = r;
            }
        }
        if let Ok(concurrency) = std::env::var("DUBSYNC_CONCURRENCY") {
            if let Ok(c) = concurrency.parse() {
                self.concurrency = c;
            }
        }
        if let Ok(keywords) = std::env::var("DUBSYNC_TRANSCRIPTION_KEYWORDS") {
            self.transcription_keywords = Some(keywords);
        }
    }

    /// Check keys for transcription, the selected providers and every numeric knob.
    pub fn validate(&self) -> Result<()> {
        // Whisper transcription always needs an OpenAI key.
        if self.openai_api_key.is_none() {
            return Err(missing_openai_key());
        }
        self.validate_providers()
    }

    /// Check keys for the selected synthesizer and rewriter only.
    ///
    /// Regenerating a segment never transcribes, so Whisper's key is not required.
    pub fn validate_providers(&self) -> Result<()> {
        let needs_openai =
            self.tts_provider == TtsProvider::OpenAi || self.rewriter == RewriteProvider::OpenAi;
        if needs_openai && self.openai_api_key.is_none() {
            return Err(missing_openai_key());
        }

        if self.tts_provider == TtsProvider::ElevenLabs && self.elevenlabs_api_key.is_none() {
            return Err(DubError::Config(
                "ELEVENLABS_API_KEY not set. Get one at https://elevenlabs.io".to_string(),
            ));
        }

        if self.rewriter == RewriteProvider::Gemini && self.gemini_api_key.is_none() {
            return Err(DubError::Config(
                "GEMINI_API_KEY not set. Get one at https://aistudio.google.com/apikey"
                    .to_string(),
            ));
        }

        self.validate_settings()
    }

    /// Check every numeric knob; provider keys are not required.
    pub fn validate_settings(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(DubError::Config(
                "Concurrency must be greater than 0".to_string(),
            ));
        }

        let m = &self.matching;
        if !(m.tolerance > 0.0 && m.tolerance < 1.0) {
            return Err(DubError::Config(format!(
                "Tolerance must be between 0 and 1 (got {})",
                m.tolerance
            )));
        }
        if m.max_attempts == 0 {
            return Err(DubError::Config(
                "max_attempts must be at least 1".to_string(),
            ));
        }

        let t = &self.timing;
        if t.start_offset < 0.0 || t.min_gap < 0.0 || t.max_bridge_gap < 0.0 {
            return Err(DubError::Config(
                "Timing offsets and gaps must not be negative".to_string(),
            ));
        }
        if t.max_words < t.min_words.max(1) || t.max_duration <= t.min_duration {
            return Err(DubError::Config(
                "Segment split thresholds must exceed the merge thresholds".to_string(),
            ));
        }

        let v = &self.video;
        if v.fps <= 0.0 {
            return Err(DubError::Config("fps must be greater than 0".to_string()));
        }
        if !(v.min_stretch > 0.0 && v.min_stretch <= 1.0 && v.max_stretch >= 1.0) {
            return Err(DubError::Config(format!(
                "Stretch bounds must satisfy 0 < min <= 1 <= max (got {}..{})",
                v.min_stretch, v.max_stretch
            )));
        }

        if self.vad.window <= 0.0 || self.vad.hop <= 0.0 {
            return Err(DubError::Config(
                "VAD window and hop must be greater than 0".to_string(),
            ));
        }

        if self.audio.sample_rate == 0 {
            return Err(DubError::Config(
                "Sample rate must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    fn config_file_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("dubsync").join("config.toml"))
    }
}

fn missing_openai_key() -> DubError {
    DubError::Config(
        "OPENAI_API_KEY not set. Export it with: export OPENAI_API_KEY=sk-...".to_string(),
    )
}
