//! Provider adapter tests against local mock HTTP servers.

use dubsync::error::DubError;
use dubsync::retry::RetryPolicy;
use dubsync::rewrite::{GeminiRewriter, OpenAiRewriter, RewriteRequest, TextRewriter};
use dubsync::synth::{ElevenLabsSynthesizer, OpenAiSynthesizer, SpeechSynthesizer, SynthesisRequest};
use dubsync::transcribe::{AudioChunk, Transcriber, WhisperClient};
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// `seconds` of 24 kHz 16-bit silence.
fn pcm(seconds: f64) -> Vec<u8> {
    vec![0u8; (seconds * 24_000.0) as usize * 2]
}

// ============================================================================
// Speech synthesis
// ============================================================================

mod synthesis_tests {
    use super::*;

    #[tokio::test]
    async fn test_openai_speech_writes_wav() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/audio/speech"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(pcm(1.5)))
            .expect(1)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let synth = OpenAiSynthesizer::new("sk-test".to_string()).with_base_url(server.uri());
        let request = SynthesisRequest::new("Hola a todos", dir.path().join("a.wav"));

        let synthesis = synth.synthesize(&request).await.unwrap();
        assert_eq!(synthesis.duration, 1.5);
        assert!(synthesis.path.exists());
    }

    #[tokio::test]
    async fn test_rate_limit_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/audio/speech"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/audio/speech"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(pcm(0.5)))
            .expect(1)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let synth = OpenAiSynthesizer::new("sk-test".to_string())
            .with_base_url(server.uri())
            .with_retry(RetryPolicy::immediate(3));

        let synthesis = synth
            .synthesize(&SynthesisRequest::new("Hola", dir.path().join("b.wav")))
            .await
            .unwrap();
        assert_eq!(synthesis.duration, 0.5);
    }

    #[tokio::test]
    async fn test_bad_request_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/audio/speech"))
            .respond_with(ResponseTemplate::new(400).set_body_string("invalid voice"))
            .expect(1)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let synth = OpenAiSynthesizer::new("sk-test".to_string())
            .with_base_url(server.uri())
            .with_retry(RetryPolicy::immediate(3));

        let result = synth
            .synthesize(&SynthesisRequest::new("Hola", dir.path().join("c.wav")))
            .await;
        match result {
            Err(DubError::ProviderFailure(message)) => assert!(message.contains("400")),
            other => panic!("Expected ProviderFailure, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_persistent_server_error_escalates() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/audio/speech"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let synth = OpenAiSynthesizer::new("sk-test".to_string())
            .with_base_url(server.uri())
            .with_retry(RetryPolicy::immediate(2));

        let result = synth
            .synthesize(&SynthesisRequest::new("Hola", dir.path().join("d.wav")))
            .await;
        assert!(matches!(result, Err(DubError::ProviderFailure(_))));
    }

    #[tokio::test]
    async fn test_elevenlabs_request_shape() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/text-to-speech/voice-1"))
            .and(query_param("output_format", "pcm_24000"))
            .and(header("xi-api-key", "el-test"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(pcm(2.0)))
            .expect(1)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let synth = ElevenLabsSynthesizer::new("el-test".to_string())
            .with_voice("voice-1")
            .with_base_url(server.uri());
        let request = SynthesisRequest::new("Segunda frase", dir.path().join("e.wav"))
            .with_context(Some("Primera frase".to_string()), None);

        let synthesis = synth.synthesize(&request).await.unwrap();
        assert_eq!(synthesis.duration, 2.0);

        let received = server.received_requests().await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&received[0].body).unwrap();
        assert_eq!(body["previous_text"], "Primera frase");
        assert_eq!(body["model_id"], "eleven_multilingual_v2");
    }

    #[tokio::test]
    async fn test_empty_audio_is_a_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let synth = OpenAiSynthesizer::new("sk-test".to_string()).with_base_url(server.uri());
        let result = synth
            .synthesize(&SynthesisRequest::new("Hola", dir.path().join("f.wav")))
            .await;
        assert!(matches!(result, Err(DubError::ProviderFailure(_))));
    }
}

// ============================================================================
// Rewriting
// ============================================================================

mod rewrite_tests {
    use super::*;

    fn reduce_request() -> RewriteRequest {
        RewriteRequest::correction("Bueno, pues, en realidad creo que sí", "es", 2.0, 3.0)
            .with_context(Some("Hola.".to_string()), None)
    }

    #[tokio::test]
    async fn test_openai_rewrite() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"content": "\"Creo que sí\""}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let rewriter = OpenAiRewriter::new("sk-test".to_string()).with_base_url(server.uri());
        let text = rewriter.rewrite(&reduce_request()).await.unwrap();
        assert_eq!(text, "Creo que sí");

        let received = server.received_requests().await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&received[0].body).unwrap();
        assert_eq!(body["model"], "gpt-4o");
        let user = body["messages"][1]["content"].as_str().unwrap();
        assert!(user.contains("Hola."));
    }

    #[tokio::test]
    async fn test_openai_rewrite_rate_limit_then_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(429).set_body_json(json!({
                "error": {"message": "Rate limit reached"}
            })))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"content": "Creo que sí"}}]
            })))
            .mount(&server)
            .await;

        let rewriter = OpenAiRewriter::new("sk-test".to_string())
            .with_base_url(server.uri())
            .with_retry(RetryPolicy::immediate(3));
        assert_eq!(rewriter.rewrite(&reduce_request()).await.unwrap(), "Creo que sí");
        assert_eq!(server.received_requests().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_openai_rewrite_client_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "error": {"message": "Incorrect API key provided"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let rewriter = OpenAiRewriter::new("bad".to_string())
            .with_base_url(server.uri())
            .with_retry(RetryPolicy::immediate(3));
        match rewriter.rewrite(&reduce_request()).await {
            Err(DubError::ProviderFailure(message)) => {
                assert!(message.contains("Incorrect API key"))
            }
            other => panic!("Expected ProviderFailure, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_gemini_rewrite() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-2.0-flash:generateContent"))
            .and(query_param("key", "gm-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{"content": {"parts": [{"text": "Creo que sí\n"}]}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let rewriter = GeminiRewriter::new("gm-test".to_string()).with_base_url(server.uri());
        assert_eq!(rewriter.rewrite(&reduce_request()).await.unwrap(), "Creo que sí");

        let received = server.received_requests().await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&received[0].body).unwrap();
        assert!(body["systemInstruction"]["parts"][0]["text"].is_string());
        let temperature = body["generationConfig"]["temperature"].as_f64().unwrap();
        assert!((temperature - 0.1).abs() < 1e-6);
    }
}

// ============================================================================
// Transcription
// ============================================================================

mod whisper_tests {
    use super::*;

    #[tokio::test]
    async fn test_whisper_offsets_chunk_timestamps() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/audio/transcriptions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "text": "Hello world.",
                "language": "english",
                "duration": 2.0,
                "segments": [{"start": 0.0, "end": 2.0, "text": " Hello world."}],
                "words": [
                    {"word": "Hello", "start": 0.0, "end": 0.6},
                    {"word": "world.", "start": 0.7, "end": 1.9}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let audio = dir.path().join("chunk_0001.mp3");
        std::fs::write(&audio, b"fake mp3 bytes").unwrap();
        let chunk = AudioChunk {
            index: 1,
            path: audio,
            offset: 30.0,
            duration: 30.0,
        };

        let client = WhisperClient::new("sk-test".to_string()).with_base_url(server.uri());
        let transcript = client.transcribe(&chunk).await.unwrap();

        assert_eq!(transcript.segments.len(), 1);
        assert_eq!(transcript.segments[0].start, 30.0);
        assert_eq!(transcript.segments[0].end, 32.0);
        assert_eq!(transcript.segments[0].words.len(), 2);
        assert_eq!(transcript.language.as_deref(), Some("english"));
    }

    #[tokio::test]
    async fn test_whisper_sends_keyword_prompt() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/audio/transcriptions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "text": "Kubernetes.",
                "segments": [{"start": 0.0, "end": 1.0, "text": "Kubernetes."}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let audio = dir.path().join("chunk_0000.mp3");
        std::fs::write(&audio, b"fake mp3 bytes").unwrap();
        let chunk = AudioChunk {
            index: 0,
            path: audio,
            offset: 0.0,
            duration: 1.0,
        };

        let client = WhisperClient::new("sk-test".to_string())
            .with_base_url(server.uri())
            .with_prompt("Kubernetes, Xóchitl".to_string());
        client.transcribe(&chunk).await.unwrap();

        let received = server.received_requests().await.unwrap();
        let body = String::from_utf8_lossy(&received[0].body);
        assert!(body.contains("name=\"prompt\""));
        assert!(body.contains("Kubernetes, Xóchitl"));
    }

    #[tokio::test]
    async fn test_whisper_handles_missing_file() {
        let client = WhisperClient::new("sk-test".to_string());
        let chunk = AudioChunk {
            index: 0,
            path: "/tmp/nonexistent_dubsync_test.mp3".into(),
            offset: 0.0,
            duration: 5.0,
        };
        assert!(client.transcribe(&chunk).await.is_err());
    }
}
