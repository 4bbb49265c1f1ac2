use crate::error::{DubError, Result};
use crate::retry::RetryPolicy;
use crate::segment::WordTimestamp;
use crate::transcribe::{AudioChunk, Transcript, TranscriptSegment, Transcriber, WHISPER_MAX_FILE_SIZE};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::path::Path;
use tokio::fs;
use tracing::debug;

const OPENAI_API_BASE: &str = "https://api.openai.com";

/// OpenAI Whisper API client.
pub struct WhisperClient {
    client: reqwest::Client,
    api_key: String,
    model: String,
    language: Option<String>,
    prompt: Option<String>,
    base_url: String,
    retry: RetryPolicy,
}

impl WhisperClient {
    /// Create a new Whisper client with the given API key.
    pub fn new(api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            model: "whisper-1".to_string(),
            language: None,
            prompt: None,
            base_url: OPENAI_API_BASE.to_string(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set the source language (ISO 639-1 code).
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    /// Set a prompt for vocabulary hints (max 224 tokens).
    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
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

    /// Build the multipart form for the API request.
    async fn build_form(&self, audio_path: &Path) -> Result<Form> {
        let file_bytes = fs::read(audio_path).await?;
        let file_name = audio_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("audio.mp3")
            .to_string();

        let mime_type = match audio_path.extension().and_then(|e| e.to_str()) {
            Some("wav") => "audio/wav",
            Some("mp3") => "audio/mpeg",
            Some("m4a") => "audio/mp4",
            Some("flac") => "audio/flac",
            Some("ogg") => "audio/ogg",
            Some("webm") => "audio/webm",
            _ => "application/octet-stream",
        };

        let file_part = Part::bytes(file_bytes)
            .file_name(file_name)
            .mime_str(mime_type)?;

        let mut form = Form::new()
            .part("file", file_part)
            .text("model", self.model.clone())
            .text("response_format", "verbose_json")
            .text("timestamp_granularities[]", "segment")
            .text("timestamp_granularities[]", "word");

        if let Some(ref lang) = self.language {
            form = form.text("language", lang.clone());
        }

        if let Some(ref prompt) = self.prompt {
            form = form.text("prompt", prompt.clone());
        }

        Ok(form)
    }

    /// Make the API request (the form is consumed, so it is rebuilt per attempt).
    async fn call_api(&self, form: Form) -> Result<WhisperResponse> {
        let response = self
            .client
            .post(format!("{}/v1/audio/transcriptions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        debug!("Whisper API response status: {}", status);

        let body = response.text().await?;
        if !status.is_success() {
            let message = serde_json::from_str::<ApiErrorResponse>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            return Err(DubError::from_status("Whisper", status, &message));
        }

        debug!("Whisper API response: {}", &body[..body.len().min(500)]);
        Ok(serde_json::from_str(&body)?)
    }

    /// Convert the API response to source-timeline segments with their words.
    fn parse_response(&self, response: WhisperResponse, chunk: &AudioChunk) -> Transcript {
        let offset = chunk.offset;
        let mut segments: Vec<TranscriptSegment> = match response.segments {
            Some(api_segments) if !api_segments.is_empty() => api_segments
                .into_iter()
                .map(|seg| TranscriptSegment {
                    start: offset + seg.start,
                    end: offset + seg.end,
                    text: seg.text.trim().to_string(),
                    words: Vec::new(),
                })
                .collect(),
            _ => vec![TranscriptSegment {
                start: offset,
                end: offset + response.duration.unwrap_or(chunk.duration),
                text: response.text.trim().to_string(),
                words: Vec::new(),
            }],
        };

        let words = response.words.unwrap_or_default().into_iter().map(|w| WordTimestamp {
            word: w.word.trim().to_string(),
            start: offset + w.start,
            end: offset + w.end,
        });
        assign_words(&mut segments, words);

        Transcript {
            segments,
            language: response.language,
        }
    }
}

/// Give each word to the segment its midpoint falls in (or the nearest one before it).
fn assign_words(segments: &mut [TranscriptSegment], words: impl Iterator<Item = WordTimestamp>) {
    if segments.is_empty() {
        return;
    }
    let mut index = 0;
    for word in words {
        let mid = (word.start + word.end) / 2.0;
        while index + 1 < segments.len() && mid >= segments[index + 1].start {
            index += 1;
        }
        segments[index].words.push(word);
    }
}

#[async_trait]
impl Transcriber for WhisperClient {
    async fn transcribe(&self, chunk: &AudioChunk) -> Result<Transcript> {
        debug!(
            "Transcribing chunk {} with Whisper: {:?}",
            chunk.index, chunk.path
        );

        let metadata = fs::metadata(&chunk.path).await?;
        if metadata.len() > WHISPER_MAX_FILE_SIZE {
            return Err(DubError::ProviderFailure(format!(
                "File too large for Whisper API: {} bytes (max {} bytes)",
                metadata.len(),
                WHISPER_MAX_FILE_SIZE
            )));
        }

        let this = self;
        let path = chunk.path.as_path();
        let response = self
            .retry
            .run("Whisper transcription", || async move {
                let form = this.build_form(path).await?;
                this.call_api(form).await
            })
            .await?;
        let transcript = self.parse_response(response, chunk);

        debug!(
            "Whisper returned {} segments for chunk {}",
            transcript.segments.len(),
            chunk.index
        );

        Ok(transcript)
    }

    fn name(&self) -> &'static str {
        "OpenAI Whisper"
    }

    fn max_file_size(&self) -> u64 {
        WHISPER_MAX_FILE_SIZE
    }
}

// API response types

#[derive(Debug, Deserialize)]
struct WhisperResponse {
    text: String,
    #[serde(default)]
    segments: Option<Vec<WhisperSegment>>,
    #[serde(default)]
    words: Option<Vec<WhisperWord>>,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    duration: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct WhisperSegment {
    start: f64,
    end: f64,
    text: String,
}

#[derive(Debug, Deserialize)]
struct WhisperWord {
    word: String,
    start: f64,
    end: f64,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}
