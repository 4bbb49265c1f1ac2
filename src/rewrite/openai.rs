use crate::error::{DubError, Result};
use crate::retry::RetryPolicy;
use crate::rewrite::{clean_response, system_prompt, user_prompt, RewriteRequest, TextRewriter};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// OpenAI API base URL.
const OPENAI_API_BASE: &str = "https://api.openai.com";

/// Default chat model for translation and length correction.
const DEFAULT_MODEL: &str = "gpt-4o";

/// OpenAI chat completions client.
pub struct OpenAiRewriter {
    client: reqwest::Client,
    api_key: String,
    model: String,
    temperature: f32,
    base_url: String,
    retry: RetryPolicy,
}

impl OpenAiRewriter {
    pub fn new(api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            model: DEFAULT_MODEL.to_string(),
            temperature: 0.1,
            base_url: OPENAI_API_BASE.to_string(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Point the client at another server (used by tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn build_request(&self, request: &RewriteRequest) -> ChatRequest {
        ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system_prompt(request.directive, &request.target_language),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: user_prompt(request),
                },
            ],
            temperature: self.temperature,
        }
    }

    async fn call_api(&self, body: &ChatRequest) -> Result<String> {
        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(body)
            .send()
            .await?;

        let status = response.status();
        debug!("OpenAI chat response status: {}", status);

        let text = response.text().await?;
        if !status.is_success() {
            let message = serde_json::from_str::<ApiErrorResponse>(&text)
                .map(|e| e.error.message)
                .unwrap_or(text);
            return Err(DubError::from_status("OpenAI", status, &message));
        }

        let parsed: ChatResponse = serde_json::from_str(&text)?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        Ok(clean_response(&content))
    }
}

#[async_trait]
impl TextRewriter for OpenAiRewriter {
    async fn rewrite(&self, request: &RewriteRequest) -> Result<String> {
        debug!(
            "OpenAI {} rewrite ({} chars) to {}",
            request.directive,
            request.text.len(),
            request.target_language
        );

        let body = self.build_request(request);
        let text = self.retry.run("OpenAI rewrite", || self.call_api(&body)).await?;

        if text.is_empty() {
            return Err(DubError::ProviderFailure(
                "OpenAI returned an empty rewrite".to_string(),
            ));
        }
        Ok(text)
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}

// API request/response types

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}
