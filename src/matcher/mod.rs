//! Iterative rewrite/synthesize loop that fits translated speech into the
//! original segment windows.

pub mod orchestrator;

pub use orchestrator::{MatchOrchestrator, MatchStats, TranslationStats};

use crate::error::{DubError, Result};
use crate::rewrite::{RewriteRequest, TextRewriter};
use crate::segment::{Segment, SegmentStatus, SegmentStore, Stage};
use crate::synth::{SpeechSynthesizer, SynthesisRequest};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Neighbouring text given to providers as context.
pub type Context = (Option<String>, Option<String>);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    /// Accepted relative deviation between synthesized and original duration.
    pub tolerance: f64,
    /// Synthesis calls per segment.
    pub max_attempts: u32,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            tolerance: 0.10,
            max_attempts: 3,
        }
    }
}

impl MatchConfig {
    /// Accepted `[low, high]` synthesized duration for a window of `target` seconds.
    pub fn bounds(&self, target: f64) -> (f64, f64) {
        (target * (1.0 - self.tolerance), target * (1.0 + self.tolerance))
    }

    pub fn accepts(&self, target: f64, actual: f64) -> bool {
        let (low, high) = self.bounds(target);
        actual >= low && actual <= high
    }
}

/// One synthesized variant of a segment's text.
#[derive(Debug, Clone)]
struct Candidate {
    text: String,
    duration: f64,
    path: PathBuf,
}

impl Candidate {
    fn error(&self, target: f64) -> f64 {
        (self.duration - target).abs()
    }
}

/// Path of the promoted clip for segment `id`.
pub fn segment_audio_path(audio_dir: &Path, id: u32) -> PathBuf {
    audio_dir.join(format!("segment_{:04}.wav", id))
}

fn attempt_audio_path(audio_dir: &Path, id: u32, attempt: u32) -> PathBuf {
    audio_dir.join(format!("segment_{:04}.attempt{}.wav", id, attempt))
}

pub struct DurationMatcher {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    rewriter: Arc<dyn TextRewriter>,
    config: MatchConfig,
    audio_dir: PathBuf,
    target_language: String,
}

impl DurationMatcher {
    pub fn new(
        synthesizer: Arc<dyn SpeechSynthesizer>,
        rewriter: Arc<dyn TextRewriter>,
        config: MatchConfig,
        audio_dir: impl Into<PathBuf>,
        target_language: impl Into<String>,
    ) -> Self {
        Self {
            synthesizer,
            rewriter,
            config,
            audio_dir: audio_dir.into(),
            target_language: target_language.into(),
        }
    }

    pub fn config(&self) -> &MatchConfig {
        &self.config
    }

    pub fn audio_dir(&self) -> &Path {
        &self.audio_dir
    }

    pub fn target_language(&self) -> &str {
        &self.target_language
    }

    pub fn synthesizer_name(&self) -> &'static str {
        self.synthesizer.name()
    }

    /// Produce the first translation of a segment from its source text.
    ///
    /// `context` holds the neighbours' source text.
    pub async fn translate_segment(&self, mut segment: Segment, context: Context) -> Segment {
        if segment.original_text.trim().is_empty() {
            segment.translated_text.clear();
            return segment;
        }

        let request = RewriteRequest::initial(
            segment.original_text.clone(),
            self.target_language.clone(),
            segment.original_duration,
        )
        .with_context(context.0, context.1);

        match self.rewriter.rewrite(&request).await {
            Ok(text) => {
                debug!("Segment {} translated: {}", segment.id, text);
                segment.translated_text = text;
                segment.last_error = None;
            }
            Err(e) => {
                warn!("Segment {} translation failed: {}", segment.id, e);
                segment.translated_text.clear();
                segment.status = SegmentStatus::Failed;
                segment.last_error = Some(e.to_string());
            }
        }
        segment
    }

    /// Run the convergence protocol on one segment.
    ///
    /// `context` holds the neighbours' translated text. Never fails: provider
    /// errors end up in `status` and `last_error`.
    pub async fn match_segment(&self, mut segment: Segment, context: Context) -> Segment {
        let prior_error = segment.last_error.take();
        segment.reset_synthesis();

        let target = segment.original_duration;
        let mut text = segment.translated_text.trim().to_string();

        if text.is_empty() {
            warn!("Segment {} has no translation to synthesize", segment.id);
            segment.status = SegmentStatus::Failed;
            segment.last_error = Some(prior_error.unwrap_or_else(|| "Empty translation".to_string()));
            return segment;
        }

        let (before, after) = context;
        let mut candidates: Vec<Candidate> = Vec::new();
        let mut matched = false;
        let mut failure: Option<DubError> = None;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let request = SynthesisRequest::new(
                text.clone(),
                attempt_audio_path(&self.audio_dir, segment.id, attempt),
            )
            .with_context(before.clone(), after.clone());

            let synthesis = match self.synthesizer.synthesize(&request).await {
                Ok(s) => s,
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            };

            debug!(
                "Segment {} attempt {}: {:.3}s synthesized for a {:.3}s window",
                segment.id, attempt, synthesis.duration, target
            );

            let candidate = Candidate {
                text: text.clone(),
                duration: synthesis.duration,
                path: synthesis.path,
            };
            candidates.push(candidate);

            if self.config.accepts(target, synthesis.duration) {
                matched = true;
                break;
            }
            if attempt >= self.config.max_attempts {
                break;
            }

            let request = RewriteRequest::correction(
                text.clone(),
                self.target_language.clone(),
                target,
                synthesis.duration,
            )
            .with_context(before.clone(), after.clone());

            segment.correction_attempts += 1;
            debug!("Segment {}: requesting {} rewrite", segment.id, request.directive);

            match self.rewriter.rewrite(&request).await {
                Ok(rewritten) => text = rewritten,
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        let best = if matched {
            candidates.last().cloned()
        } else {
            candidates
                .iter()
                .min_by(|a, b| a.error(target).total_cmp(&b.error(target)))
                .cloned()
        };

        if let Some(best) = best {
            match self.promote(&segment, &best, &candidates) {
                Ok(path) => {
                    segment.translated_text = best.text;
                    segment.tts_duration = Some(best.duration);
                    segment.tts_audio_path = Some(path);
                }
                Err(e) => failure = Some(e),
            }
        } else {
            self.discard(&candidates, None);
        }

        segment.status = match (&failure, matched) {
            (Some(_), _) => SegmentStatus::Failed,
            (None, true) => SegmentStatus::Matched,
            (None, false) => SegmentStatus::Exhausted,
        };
        segment.last_error = failure.map(|e| e.to_string());

        match segment.status {
            SegmentStatus::Matched => debug!(
                "Segment {} matched after {} rewrite(s)",
                segment.id, segment.correction_attempts
            ),
            SegmentStatus::Exhausted => warn!(
                "Segment {} did not converge after {} attempts; keeping {:.3}s for {:.3}s",
                segment.id,
                attempt,
                segment.tts_duration.unwrap_or_default(),
                target
            ),
            _ => warn!(
                "Segment {} failed: {}",
                segment.id,
                segment.last_error.as_deref().unwrap_or("unknown error")
            ),
        }

        segment
    }

    /// Move the chosen candidate to the segment's canonical path and delete the rest.
    fn promote(&self, segment: &Segment, best: &Candidate, all: &[Candidate]) -> Result<PathBuf> {
        let target = segment_audio_path(&self.audio_dir, segment.id);
        if best.path != target {
            std::fs::rename(&best.path, &target)?;
        }
        self.discard(all, Some(&best.path));
        Ok(target)
    }

    fn discard(&self, candidates: &[Candidate], keep: Option<&Path>) {
        for candidate in candidates {
            if Some(candidate.path.as_path()) == keep {
                continue;
            }
            if let Err(e) = std::fs::remove_file(&candidate.path) {
                debug!("Could not remove {:?}: {}", candidate.path, e);
            }
        }
    }

    /// Regenerate a single segment out of band, with a fresh attempt budget.
    pub async fn rematch(&self, store: SegmentStore, id: u32) -> Result<SegmentStore> {
        let index = store.position(id).ok_or(DubError::SegmentNotFound(id))?;
        let context = store.context_at(index);

        info!("Regenerating segment {}", id);
        let previous = store.segments[index].clone();
        let mut segment = self.match_segment(previous.clone(), context).await;

        let kept_audio = previous.tts_audio_path.as_ref().is_some_and(|p| p.exists());
        if segment.status == SegmentStatus::Failed && segment.tts_audio_path.is_none() && kept_audio {
            warn!(
                "Segment {} regeneration failed, keeping its previous audio: {}",
                id,
                segment.last_error.as_deref().unwrap_or("unknown error")
            );
            let error = segment.last_error.take();
            segment = previous;
            segment.last_error = error;
        }
        info!(
            "Segment {} is now {} ({:.3}s for {:.3}s)",
            id,
            segment.status,
            segment.tts_duration.unwrap_or_default(),
            segment.original_duration
        );

        let mut store = store;
        store.segments[index] = segment;
        Ok(store.advance(Stage::Matched))
    }
}
