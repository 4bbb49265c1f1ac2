pub mod archive;

pub use archive::GenerationArchive;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A single word with its position in the source audio (seconds).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordTimestamp {
    pub word: String,
    pub start: f64,
    pub end: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentStatus {
    #[default]
    Pending,
    Matched,
    Exhausted,
    Failed,
}

impl SegmentStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SegmentStatus::Pending)
    }
}

impl std::fmt::Display for SegmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SegmentStatus::Pending => write!(f, "pending"),
            SegmentStatus::Matched => write!(f, "matched"),
            SegmentStatus::Exhausted => write!(f, "exhausted"),
            SegmentStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Pipeline stage that produced a store generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Transcribed,
    Corrected,
    Cleaned,
    Adjusted,
    Translated,
    Matched,
    Assembled,
    Aligned,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Transcribed => "transcribed",
            Stage::Corrected => "corrected",
            Stage::Cleaned => "cleaned",
            Stage::Adjusted => "adjusted",
            Stage::Translated => "translated",
            Stage::Matched => "matched",
            Stage::Assembled => "assembled",
            Stage::Aligned => "aligned",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "transcribed" => Ok(Stage::Transcribed),
            "corrected" => Ok(Stage::Corrected),
            "cleaned" => Ok(Stage::Cleaned),
            "adjusted" => Ok(Stage::Adjusted),
            "translated" => Ok(Stage::Translated),
            "matched" => Ok(Stage::Matched),
            "assembled" => Ok(Stage::Assembled),
            "aligned" => Ok(Stage::Aligned),
            _ => Err(format!("Unknown stage: {}", s)),
        }
    }
}

/// One window of source speech and everything derived from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub id: u32,
    pub start_time: f64,
    pub end_time: f64,
    pub original_text: String,
    #[serde(default)]
    pub words: Vec<WordTimestamp>,
    #[serde(default)]
    pub translated_text: String,
    #[serde(default)]
    pub original_duration: f64,
    #[serde(default)]
    pub tts_duration: Option<f64>,
    #[serde(default)]
    pub tts_audio_path: Option<PathBuf>,
    #[serde(default)]
    pub correction_attempts: u32,
    #[serde(default)]
    pub status: SegmentStatus,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub needs_merge: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub removed: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub merged_from: Vec<u32>,
    #[serde(default)]
    pub final_duration: Option<f64>,
    #[serde(default)]
    pub stretch_factor: Option<f64>,
    #[serde(default)]
    pub last_error: Option<String>,
}

impl Segment {
    pub fn new(id: u32, start_time: f64, end_time: f64, original_text: impl Into<String>) -> Self {
        Self {
            id,
            start_time,
            end_time,
            original_text: original_text.into(),
            words: Vec::new(),
            translated_text: String::new(),
            original_duration: (end_time - start_time).max(0.0),
            tts_duration: None,
            tts_audio_path: None,
            correction_attempts: 0,
            status: SegmentStatus::Pending,
            needs_merge: false,
            removed: false,
            merged_from: Vec::new(),
            final_duration: None,
            stretch_factor: None,
            last_error: None,
        }
    }

    pub fn with_words(mut self, words: Vec<WordTimestamp>) -> Self {
        self.words = words;
        self
    }

    pub fn with_translation(mut self, text: impl Into<String>) -> Self {
        self.translated_text = text.into();
        self
    }

    /// Length of the window described by the current boundaries.
    pub fn span(&self) -> f64 {
        (self.end_time - self.start_time).max(0.0)
    }

    /// Recompute `original_duration` from the boundaries.
    pub fn refresh_duration(&mut self) {
        self.original_duration = self.span();
    }

    /// Relative deviation of the synthesized audio from the target window.
    pub fn deviation(&self) -> Option<f64> {
        let tts = self.tts_duration?;
        if self.original_duration <= 0.0 {
            return None;
        }
        Some((tts - self.original_duration) / self.original_duration)
    }

    /// Forget everything produced by synthesis and matching.
    pub fn reset_synthesis(&mut self) {
        self.tts_duration = None;
        self.tts_audio_path = None;
        self.correction_attempts = 0;
        self.status = SegmentStatus::Pending;
        self.final_duration = None;
        self.stretch_factor = None;
        self.last_error = None;
    }
}

/// One generation of the ordered segment sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentStore {
    pub generation: u32,
    pub stage: Stage,
    /// Length of the source media, when known.
    #[serde(default)]
    pub source_duration: Option<f64>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub target_language: Option<String>,
    pub segments: Vec<Segment>,
}

impl SegmentStore {
    /// First generation, as produced by transcription.
    pub fn new(segments: Vec<Segment>) -> Self {
        Self {
            generation: 0,
            stage: Stage::Transcribed,
            source_duration: None,
            language: None,
            target_language: None,
            segments,
        }
    }

    pub fn with_source_duration(mut self, duration: f64) -> Self {
        self.source_duration = Some(duration);
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    /// Turn this store into the next generation, tagged with `stage`.
    pub fn advance(mut self, stage: Stage) -> Self {
        self.generation += 1;
        self.stage = stage;
        self
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn position(&self, id: u32) -> Option<usize> {
        self.segments.iter().position(|s| s.id == id)
    }

    pub fn get(&self, id: u32) -> Option<&Segment> {
        self.segments.iter().find(|s| s.id == id)
    }

    /// Translated text of the neighbours of the segment at `index`.
    pub fn context_at(&self, index: usize) -> (Option<String>, Option<String>) {
        let text_of = |s: &Segment| {
            let t = s.translated_text.trim();
            (!t.is_empty()).then(|| t.to_string())
        };
        let before = index
            .checked_sub(1)
            .and_then(|i| self.segments.get(i))
            .and_then(text_of);
        let after = self.segments.get(index + 1).and_then(text_of);
        (before, after)
    }

    pub fn count_status(&self, status: SegmentStatus) -> usize {
        self.segments.iter().filter(|s| s.status == status).count()
    }

    /// Ids of segments that did not converge.
    pub fn unconverged(&self) -> Vec<u32> {
        self.segments
            .iter()
            .filter(|s| matches!(s.status, SegmentStatus::Exhausted | SegmentStatus::Failed))
            .map(|s| s.id)
            .collect()
    }
}
