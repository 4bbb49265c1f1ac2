//! Gemini-based rewriting using the Generative AI API.

use crate::error::{DubError, Result};
use crate::retry::RetryPolicy;
use crate::rewrite::{clean_response, system_prompt, user_prompt, RewriteRequest, TextRewriter};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com";

/// Rewriter using Google Gemini API.
pub struct GeminiRewriter {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
    retry: RetryPolicy,
}

impl GeminiRewriter {
    /// Create a new Gemini rewriter with the given API key.
    pub fn new(api_key: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            model: "gemini-2.0-flash".to_string(),
            base_url: GEMINI_API_BASE.to_string(),
            retry: RetryPolicy::default(),
        }
    }

    /// Set a different model (e.g., "gemini-1.5-pro").
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
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

    fn build_request(&self, request: &RewriteRequest) -> GeminiRequest {
        GeminiRequest {
            system_instruction: GeminiContent {
                parts: vec![GeminiPart {
                    text: system_prompt(request.directive, &request.target_language),
                }],
            },
            contents: vec![GeminiContent {
                parts: vec![GeminiPart {
                    text: user_prompt(request),
                }],
            }],
            generation_config: GenerationConfig { temperature: 0.1 },
        }
    }

    async fn call_api(&self, body: &GeminiRequest) -> Result<String> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        );

        let response = self.client.post(&url).json(body).send().await?;

        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(DubError::from_status("Gemini", status, &text));
        }

        let parsed: GeminiResponse = serde_json::from_str(&text)?;

        if let Some(error) = parsed.error {
            return Err(DubError::ProviderFailure(format!(
                "Gemini error: {}",
                error.message
            )));
        }

        let rewritten = parsed
            .candidates
            .and_then(|c| c.into_iter().next())
            .and_then(|c| c.content)
            .and_then(|c| c.parts)
            .and_then(|p| p.into_iter().next())
            .and_then(|p| p.text)
            .unwrap_or_default();

        Ok(clean_response(&rewritten))
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    system_instruction: GeminiContent,
    contents: Vec<GeminiContent>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct GeminiContent {
    parts: Vec<GeminiPart>,
}

#[derive(Serialize)]
struct GeminiPart {
    text: String,
}

#[derive(Serialize)]
struct GenerationConfig {
    temperature: f32,
}

#[derive(Deserialize, Debug)]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
    error: Option<GeminiError>,
}

#[derive(Deserialize, Debug)]
struct GeminiCandidate {
    content: Option<GeminiResponseContent>,
}

#[derive(Deserialize, Debug)]
struct GeminiResponseContent {
    parts: Option<Vec<GeminiResponsePart>>,
}

#[derive(Deserialize, Debug)]
struct GeminiResponsePart {
    text: Option<String>,
}

#[derive(Deserialize, Debug)]
struct GeminiError {
    message: String,
}

#[async_trait]
impl TextRewriter for GeminiRewriter {
    async fn rewrite(&self, request: &RewriteRequest) -> Result<String> {
        debug!(
            "Gemini {} rewrite ({} chars) to {}",
            request.directive,
            request.text.len(),
            request.target_language
        );

        let body = self.build_request(request);
        let text = self.retry.run("Gemini rewrite", || self.call_api(&body)).await?;

        if text.is_empty() {
            return Err(DubError::ProviderFailure(
                "Gemini returned an empty rewrite".to_string(),
            ));
        }
        Ok(text)
    }

    fn name(&self) -> &'static str {
        "gemini"
    }
}
