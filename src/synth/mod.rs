pub mod elevenlabs;
pub mod openai;

pub use elevenlabs::ElevenLabsSynthesizer;
pub use openai::OpenAiSynthesizer;

use crate::config::{Config, TtsProvider};
use crate::error::{DubError, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Sample rate of the raw PCM both providers return.
pub const PCM_SAMPLE_RATE: u32 = 24_000;

#[derive(Debug, Clone)]
pub struct SynthesisRequest {
    pub text: String,
    /// Text spoken right before this line, for prosody.
    pub context_before: Option<String>,
    /// Text spoken right after this line.
    pub context_after: Option<String>,
    /// Where the WAV file is written.
    pub output: PathBuf,
}

impl SynthesisRequest {
    pub fn new(text: impl Into<String>, output: impl Into<PathBuf>) -> Self {
        Self {
            text: text.into(),
            context_before: None,
            context_after: None,
            output: output.into(),
        }
    }

    pub fn with_context(mut self, before: Option<String>, after: Option<String>) -> Self {
        self.context_before = before;
        self.context_after = after;
        self
    }
}

/// A synthesized clip on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct Synthesis {
    pub path: PathBuf,
    /// Exact duration in seconds (samples / rate).
    pub duration: f64,
    pub sample_rate: u32,
}

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<Synthesis>;
    fn name(&self) -> &'static str;
}

/// Write provider PCM to `path` and describe the result.
pub(crate) fn store_pcm(provider: &str, path: &Path, pcm: &[u8]) -> Result<Synthesis> {
    if pcm.len() < 2 {
        return Err(DubError::ProviderFailure(format!(
            "{provider} returned no audio"
        )));
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let samples = crate::audio::wav::write_pcm16(path, pcm, PCM_SAMPLE_RATE)?;
    Ok(Synthesis {
        path: path.to_path_buf(),
        duration: samples as f64 / PCM_SAMPLE_RATE as f64,
        sample_rate: PCM_SAMPLE_RATE,
    })
}

pub(crate) fn ensure_text(request: &SynthesisRequest) -> Result<()> {
    if request.text.trim().is_empty() {
        return Err(DubError::ProviderFailure(
            "Cannot synthesize empty text".to_string(),
        ));
    }
    Ok(())
}

/// Build the synthesizer selected in the configuration.
pub fn create_synthesizer(config: &Config) -> Result<Box<dyn SpeechSynthesizer>> {
    match config.tts_provider {
        TtsProvider::OpenAi => {
            let api_key = config.openai_api_key.as_ref().ok_or_else(|| {
                DubError::Config(
                    "OpenAI API key not set. Set OPENAI_API_KEY environment variable.".to_string(),
                )
            })?;
            Ok(Box::new(
                OpenAiSynthesizer::new(api_key.clone()).with_voice(config.openai_voice.clone()),
            ))
        }
        TtsProvider::ElevenLabs => {
            let api_key = config.elevenlabs_api_key.as_ref().ok_or_else(|| {
                DubError::Config(
                    "ElevenLabs API key not set. Set ELEVENLABS_API_KEY environment variable."
                        .to_string(),
                )
            })?;
            Ok(Box::new(
                ElevenLabsSynthesizer::new(api_key.clone())
                    .with_voice(config.elevenlabs_voice_id.clone()),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_store_pcm_duration_is_sample_accurate() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("clip.wav");
        let pcm = vec![0u8; 2 * 36_000];

        let synthesis = store_pcm("Test", &path, &pcm).unwrap();
        assert_eq!(synthesis.duration, 1.5);
        assert_eq!(synthesis.sample_rate, PCM_SAMPLE_RATE);
        assert!(path.exists());
    }

    #[test]
    fn test_store_pcm_rejects_empty_audio() {
        let dir = TempDir::new().unwrap();
        let result = store_pcm("Test", &dir.path().join("x.wav"), &[]);
        assert!(matches!(result, Err(DubError::ProviderFailure(_))));
    }

    #[test]
    fn test_create_synthesizer_requires_key() {
        let mut config = Config::default();
        config.tts_provider = TtsProvider::ElevenLabs;
        assert!(create_synthesizer(&config).is_err());

        config.elevenlabs_api_key = Some("el-key".to_string());
        assert_eq!(create_synthesizer(&config).unwrap().name(), "elevenlabs");
    }
}
