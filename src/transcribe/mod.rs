pub mod chunk;
pub mod whisper;

pub use chunk::{create_chunks, plan_chunks, AudioChunk, WHISPER_MAX_FILE_SIZE};
pub use whisper::WhisperClient;

use crate::error::Result;
use crate::segment::{Segment, SegmentStore, WordTimestamp};
use async_trait::async_trait;
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptSegment {
    /// Seconds in the source timeline.
    pub start: f64,
    pub end: f64,
    pub text: String,
    pub words: Vec<WordTimestamp>,
}

#[derive(Debug, Clone)]
pub struct Transcript {
    pub segments: Vec<TranscriptSegment>,
    pub language: Option<String>,
}

#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe one chunk; timestamps come back in the source timeline.
    async fn transcribe(&self, chunk: &AudioChunk) -> Result<Transcript>;
    fn name(&self) -> &'static str;
    fn max_file_size(&self) -> u64;
}

/// Transcribe a speech track of `duration` seconds into the first store generation.
pub async fn transcribe_audio(
    transcriber: &dyn Transcriber,
    audio: &Path,
    duration: f64,
    work_dir: &Path,
) -> Result<SegmentStore> {
    let file_size = std::fs::metadata(audio)?.len();
    let windows = plan_chunks(duration, file_size, transcriber.max_file_size());
    let chunks = create_chunks(audio, &windows, &work_dir.join("chunks"))?;

    info!(
        "Transcribing {:.1}s of audio in {} chunk(s) with {}",
        duration,
        chunks.len(),
        transcriber.name()
    );

    let mut segments = Vec::new();
    let mut language = None;
    for chunk in &chunks {
        let transcript = transcriber.transcribe(chunk).await?;
        if language.is_none() {
            language = transcript.language;
        }
        segments.extend(transcript.segments);
    }

    Ok(into_store(segments, language, duration))
}

/// Number the segments in order and wrap them in a store.
pub fn into_store(segments: Vec<TranscriptSegment>, language: Option<String>, duration: f64) -> SegmentStore {
    let segments = segments
        .into_iter()
        .filter(|s| !s.text.trim().is_empty())
        .enumerate()
        .map(|(id, s)| Segment::new(id as u32, s.start, s.end, s.text.trim()).with_words(s.words))
        .collect();

    let mut store = SegmentStore::new(segments).with_source_duration(duration);
    store.language = language;
    store
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_store_drops_empty_text() {
        let segments = vec![
            TranscriptSegment {
                start: 0.0,
                end: 1.0,
                text: " Hello ".to_string(),
                words: Vec::new(),
            },
            TranscriptSegment {
                start: 1.0,
                end: 1.5,
                text: "  ".to_string(),
                words: Vec::new(),
            },
            TranscriptSegment {
                start: 1.5,
                end: 3.0,
                text: "world".to_string(),
                words: Vec::new(),
            },
        ];

        let store = into_store(segments, Some("english".to_string()), 3.5);
        assert_eq!(store.len(), 2);
        assert_eq!(store.segments[0].original_text, "Hello");
        assert_eq!(store.segments[1].id, 1);
        assert_eq!(store.source_duration, Some(3.5));
        assert_eq!(store.language.as_deref(), Some("english"));
    }
}
