use thiserror::Error;

#[derive(Error, Debug)]
pub enum DubError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Provider temporarily unavailable: {0}")]
    ProviderTransient(String),

    #[error("Provider failed: {0}")]
    ProviderFailure(String),

    #[error("Media toolkit error: {0}")]
    Media(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Segment {0} not found")]
    SegmentNotFound(u32),

    #[error("No generation stored for stage '{0}'")]
    StageNotFound(String),

    #[error("Pipeline cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),
}

impl DubError {
    /// Whether the error is worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        match self {
            DubError::ProviderTransient(_) => true,
            DubError::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }

    /// Classify a non-success HTTP status returned by a provider.
    pub fn from_status(provider: &str, status: reqwest::StatusCode, body: &str) -> Self {
        let snippet: String = body.chars().take(300).collect();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS
            || status == reqwest::StatusCode::REQUEST_TIMEOUT
            || status.is_server_error()
        {
            DubError::ProviderTransient(format!("{provider} API error ({status}): {snippet}"))
        } else {
            DubError::ProviderFailure(format!("{provider} API error ({status}): {snippet}"))
        }
    }
}

pub type Result<T> = std::result::Result<T, DubError>;

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn test_rate_limit_is_transient() {
        let err = DubError::from_status("OpenAI", StatusCode::TOO_MANY_REQUESTS, "slow down");
        assert!(err.is_transient());
        assert!(err.to_string().contains("429"));
    }

    #[test]
    fn test_server_error_is_transient() {
        let err = DubError::from_status("ElevenLabs", StatusCode::BAD_GATEWAY, "");
        assert!(err.is_transient());
    }

    #[test]
    fn test_client_error_is_not_transient() {
        let err = DubError::from_status("OpenAI", StatusCode::BAD_REQUEST, "bad input");
        assert!(!err.is_transient());
        assert!(matches!(err, DubError::ProviderFailure(_)));
    }

    #[test]
    fn test_config_error_is_not_transient() {
        assert!(!DubError::Config("x".to_string()).is_transient());
    }
}
