//! Translation and length rewriting through chat-style language models.

pub mod gemini;
pub mod openai;

pub use gemini::GeminiRewriter;
pub use openai::OpenAiRewriter;

use crate::config::{Config, RewriteProvider};
use crate::error::{DubError, Result};
use async_trait::async_trait;

/// What the model is asked to do with the text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    /// Translate source text into the target language.
    Initial,
    /// Make the translation longer to speak.
    Expand,
    /// Make the translation shorter to speak.
    Reduce,
}

impl std::fmt::Display for Directive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Directive::Initial => write!(f, "initial"),
            Directive::Expand => write!(f, "expand"),
            Directive::Reduce => write!(f, "reduce"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RewriteRequest {
    pub directive: Directive,
    /// Source text for `Initial`, the current translation otherwise.
    pub text: String,
    pub target_language: String,
    pub context_before: Option<String>,
    pub context_after: Option<String>,
    /// Duration of the source window (seconds).
    pub target_duration: f64,
    /// Duration of the last synthesis (seconds).
    pub synthesized_duration: Option<f64>,
}

impl RewriteRequest {
    pub fn initial(text: impl Into<String>, target_language: impl Into<String>, target_duration: f64) -> Self {
        Self {
            directive: Directive::Initial,
            text: text.into(),
            target_language: target_language.into(),
            context_before: None,
            context_after: None,
            target_duration,
            synthesized_duration: None,
        }
    }

    /// A length correction of `text`, choosing expand or reduce from the durations.
    pub fn correction(
        text: impl Into<String>,
        target_language: impl Into<String>,
        target_duration: f64,
        synthesized_duration: f64,
    ) -> Self {
        let directive = if synthesized_duration > target_duration {
            Directive::Reduce
        } else {
            Directive::Expand
        };
        Self {
            directive,
            text: text.into(),
            target_language: target_language.into(),
            context_before: None,
            context_after: None,
            target_duration,
            synthesized_duration: Some(synthesized_duration),
        }
    }

    pub fn with_context(mut self, before: Option<String>, after: Option<String>) -> Self {
        self.context_before = before;
        self.context_after = after;
        self
    }

    /// Relative overshoot of the synthesis in percent (negative when too short).
    pub fn overshoot_percent(&self) -> Option<f64> {
        let actual = self.synthesized_duration?;
        if self.target_duration <= 0.0 {
            return None;
        }
        Some((actual - self.target_duration) / self.target_duration * 100.0)
    }
}

/// Instructions sent as the system message.
pub fn system_prompt(directive: Directive, target_language: &str) -> String {
    let lang_name = language_code_to_name(target_language);
    match directive {
        Directive::Initial => format!(
            "You are a professional dubbing translator. Translate the current segment into {lang_name} \
so that it sounds natural when spoken aloud and takes about as long to say as the original. \
Neighbouring segments are provided for context only; do not translate them. \
Return ONLY the translated text."
        ),
        Directive::Expand => format!(
            "You adjust {lang_name} dubbing lines so that their spoken duration matches the original. \
The current line is spoken too quickly. Make it slightly longer without changing its meaning: \
add natural filler words or discourse markers, or use a more verbose phrasing. \
Do not add new facts. Return ONLY the rewritten line."
        ),
        Directive::Reduce => format!(
            "You adjust {lang_name} dubbing lines so that their spoken duration matches the original. \
The current line takes too long to speak. Make it shorter without changing its meaning: \
drop filler words or discourse markers, or use a more concise phrasing. \
Do not remove information. Return ONLY the rewritten line."
        ),
    }
}

/// The user message: context, current text and the timing mismatch.
pub fn user_prompt(request: &RewriteRequest) -> String {
    let mut lines = Vec::new();

    if let Some(ref before) = request.context_before {
        lines.push(format!("Previous segment text (for context): {before}"));
    }
    if let Some(ref after) = request.context_after {
        lines.push(format!("Next segment text (for context): {after}"));
    }

    match request.directive {
        Directive::Initial => {
            lines.push(format!("Current segment to translate: {}", request.text));
            lines.push(format!("Original duration: {:.3} seconds", request.target_duration));
        }
        Directive::Expand | Directive::Reduce => {
            lines.push(format!("Current segment text to correct: {}", request.text));
            lines.push(format!("Original duration: {:.3} seconds", request.target_duration));
            if let Some(actual) = request.synthesized_duration {
                lines.push(format!("TTS duration: {:.3} seconds", actual));
            }
            if let Some(percent) = request.overshoot_percent() {
                lines.push(format!("Difference: {:+.1}%", percent));
            }
        }
    }

    lines.join("\n")
}

/// Strip wrapping quotes and whitespace that models like to add.
pub fn clean_response(text: &str) -> String {
    let trimmed = text.trim();
    let unquoted = trimmed
        .strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .unwrap_or(trimmed);
    unquoted.trim().to_string()
}

#[async_trait]
pub trait TextRewriter: Send + Sync {
    async fn rewrite(&self, request: &RewriteRequest) -> Result<String>;
    fn name(&self) -> &'static str;
}

/// Build the rewriter selected in the configuration.
pub fn create_rewriter(config: &Config) -> Result<Box<dyn TextRewriter>> {
    match config.rewriter {
        RewriteProvider::OpenAi => {
            let api_key = config.openai_api_key.as_ref().ok_or_else(|| {
                DubError::Config(
                    "OpenAI API key not set. Set OPENAI_API_KEY environment variable.".to_string(),
                )
            })?;
            Ok(Box::new(OpenAiRewriter::new(api_key.clone())))
        }
        RewriteProvider::Gemini => {
            let api_key = config.gemini_api_key.as_ref().ok_or_else(|| {
                DubError::Config(
                    "Gemini API key not set. Set GEMINI_API_KEY environment variable.".to_string(),
                )
            })?;
            Ok(Box::new(GeminiRewriter::new(api_key.clone())))
        }
    }
}

/// Map an ISO 639-1 code to a language name for prompts.
pub fn language_code_to_name(code: &str) -> &str {
    match code.to_lowercase().as_str() {
        "en" => "English",
        "es" => "Spanish",
        "fr" => "French",
        "de" => "German",
        "it" => "Italian",
        "pt" => "Portuguese",
        "ru" => "Russian",
        "uk" => "Ukrainian",
        "pl" => "Polish",
        "ja" => "Japanese",
        "ko" => "Korean",
        "zh" => "Chinese",
        "ar" => "Arabic",
        "hi" => "Hindi",
        "nl" => "Dutch",
        "sv" => "Swedish",
        "tr" => "Turkish",
        "cs" => "Czech",
        "id" => "Indonesian",
        _ => code,
    }
}
