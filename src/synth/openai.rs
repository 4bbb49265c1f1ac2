use crate::error::{DubError, Result};
use crate::retry::RetryPolicy;
use crate::synth::{ensure_text, store_pcm, SpeechSynthesizer, Synthesis, SynthesisRequest};
use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

const OPENAI_API_BASE: &str = "https://api.openai.com";

/// OpenAI text-to-speech client returning raw 24 kHz PCM.
pub struct OpenAiSynthesizer {
    client: reqwest::Client,
    api_key: String,
    model: String,
    voice: String,
    base_url: String,
    retry: RetryPolicy,
}

impl OpenAiSynthesizer {
    pub fn new(api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            model: "tts-1".to_string(),
            voice: "onyx".to_string(),
            base_url: OPENAI_API_BASE.to_string(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = voice.into();
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

    async fn call_api(&self, body: &SpeechRequest<'_>) -> Result<Vec<u8>> {
        let response = self
            .client
            .post(format!("{}/v1/audio/speech", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(body)
            .send()
            .await?;

        let status = response.status();
        debug!("OpenAI speech response status: {}", status);

        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(DubError::from_status("OpenAI", status, &text));
        }

        Ok(response.bytes().await?.to_vec())
    }
}

#[derive(Debug, Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    voice: &'a str,
    input: &'a str,
    response_format: &'static str,
}

#[async_trait]
impl SpeechSynthesizer for OpenAiSynthesizer {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<Synthesis> {
        ensure_text(request)?;

        let body = SpeechRequest {
            model: &self.model,
            voice: &self.voice,
            input: &request.text,
            response_format: "pcm",
        };

        let pcm = self.retry.run("OpenAI speech", || self.call_api(&body)).await?;
        let synthesis = store_pcm("OpenAI", &request.output, &pcm)?;

        debug!(
            "OpenAI synthesized {:.3}s into {:?}",
            synthesis.duration, synthesis.path
        );
        Ok(synthesis)
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}
