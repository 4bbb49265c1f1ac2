use crate::error::{DubError, Result};
use crate::retry::RetryPolicy;
use crate::synth::{ensure_text, store_pcm, SpeechSynthesizer, Synthesis, SynthesisRequest};
use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

const ELEVENLABS_API_BASE: &str = "https://api.elevenlabs.io";

/// ElevenLabs text-to-speech client.
///
/// Neighbouring lines are sent as `previous_text`/`next_text` so the voice
/// keeps a continuous intonation, and the seed is derived from the text so
/// the same line always renders the same way.
pub struct ElevenLabsSynthesizer {
    client: reqwest::Client,
    api_key: String,
    voice_id: String,
    model_id: String,
    base_url: String,
    retry: RetryPolicy,
}

impl ElevenLabsSynthesizer {
    pub fn new(api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            voice_id: "ksNuhhaBnNLdMLz6SavZ".to_string(),
            model_id: "eleven_multilingual_v2".to_string(),
            base_url: ELEVENLABS_API_BASE.to_string(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_voice(mut self, voice_id: impl Into<String>) -> Self {
        self.voice_id = voice_id.into();
        self
    }

    pub fn with_model(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = model_id.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn build_body<'a>(&'a self, request: &'a SynthesisRequest) -> SpeechRequest<'a> {
        SpeechRequest {
            text: &request.text,
            model_id: &self.model_id,
            voice_settings: VoiceSettings {
                stability: 0.75,
                similarity_boost: 1.0,
                speed: 1.0,
                use_speaker_boost: false,
            },
            previous_text: request.context_before.as_deref(),
            next_text: request.context_after.as_deref(),
            seed: text_seed(&request.text),
        }
    }

    async fn call_api(&self, body: &SpeechRequest<'_>) -> Result<Vec<u8>> {
        let url = format!(
            "{}/v1/text-to-speech/{}?output_format=pcm_24000",
            self.base_url, self.voice_id
        );

        let response = self
            .client
            .post(&url)
            .header("xi-api-key", &self.api_key)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        debug!("ElevenLabs response status: {}", status);

        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(DubError::from_status("ElevenLabs", status, &text));
        }

        Ok(response.bytes().await?.to_vec())
    }
}

/// FNV-1a over the text, stable across runs and platforms.
fn text_seed(text: &str) -> u32 {
    text.bytes().fold(0x811c_9dc5u32, |hash, byte| {
        (hash ^ byte as u32).wrapping_mul(0x0100_0193)
    })
}

#[derive(Debug, Serialize)]
struct SpeechRequest<'a> {
    text: &'a str,
    model_id: &'a str,
    voice_settings: VoiceSettings,
    #[serde(skip_serializing_if = "Option::is_none")]
    previous_text: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    next_text: Option<&'a str>,
    seed: u32,
}

#[derive(Debug, Serialize)]
struct VoiceSettings {
    stability: f32,
    similarity_boost: f32,
    speed: f32,
    use_speaker_boost: bool,
}

#[async_trait]
impl SpeechSynthesizer for ElevenLabsSynthesizer {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<Synthesis> {
        ensure_text(request)?;

        let body = self.build_body(request);
        let pcm = self
            .retry
            .run("ElevenLabs speech", || self.call_api(&body))
            .await?;
        let synthesis = store_pcm("ElevenLabs", &request.output, &pcm)?;

        debug!(
            "ElevenLabs synthesized {:.3}s into {:?}",
            synthesis.duration, synthesis.path
        );
        Ok(synthesis)
    }

    fn name(&self) -> &'static str {
        "elevenlabs"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seed_is_deterministic() {
        assert_eq!(text_seed("Hola mundo"), text_seed("Hola mundo"));
        assert_ne!(text_seed("Hola mundo"), text_seed("Hola mundo."));
        assert_eq!(text_seed(""), 0x811c_9dc5);
    }

    #[test]
    fn test_body_carries_context() {
        let synth = ElevenLabsSynthesizer::new("key".to_string());
        let request = SynthesisRequest::new("Segunda frase", "/tmp/x.wav")
            .with_context(Some("Primera frase".to_string()), None);

        let json = serde_json::to_value(synth.build_body(&request)).unwrap();
        assert_eq!(json["previous_text"], "Primera frase");
        assert!(json.get("next_text").is_none());
        assert_eq!(json["model_id"], "eleven_multilingual_v2");
        assert_eq!(json["voice_settings"]["stability"], 0.75);
    }
}
