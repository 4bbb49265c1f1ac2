//! Non-fatal outcomes of a run, collected for the operator.

use std::path::{Path, PathBuf};

use console::style;
use serde::{Deserialize, Serialize};

use crate::error::{DubError, Result};
use crate::segment::{SegmentStatus, SegmentStore, Stage};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Issue {
    /// The attempt budget ran out; the closest candidate was kept.
    ConvergenceExhausted {
        segment_id: u32,
        target: f64,
        achieved: f64,
    },
    /// A provider gave up on this segment.
    ProviderFailure { segment_id: u32, message: String },
    /// The video stretch factor fell outside the configured bounds.
    AlignmentBoundExceeded {
        segment_id: u32,
        stretch_factor: f64,
        min: f64,
        max: f64,
    },
    /// The rendered video was re-stretched to match the audio length.
    DurationDriftCorrected {
        video_duration: f64,
        audio_duration: f64,
        factor: f64,
    },
}

impl Issue {
    pub fn segment_id(&self) -> Option<u32> {
        match self {
            Issue::ConvergenceExhausted { segment_id, .. }
            | Issue::ProviderFailure { segment_id, .. }
            | Issue::AlignmentBoundExceeded { segment_id, .. } => Some(*segment_id),
            Issue::DurationDriftCorrected { .. } => None,
        }
    }
}

impl std::fmt::Display for Issue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Issue::ConvergenceExhausted {
                segment_id,
                target,
                achieved,
            } => {
                let deviation = if *target > 0.0 {
                    (achieved - target) / target * 100.0
                } else {
                    0.0
                };
                write!(
                    f,
                    "segment {}: did not converge ({:.2}s for a {:.2}s window, {:+.1}%)",
                    segment_id, achieved, target, deviation
                )
            }
            Issue::ProviderFailure {
                segment_id,
                message,
            } => write!(f, "segment {}: provider failure: {}", segment_id, message),
            Issue::AlignmentBoundExceeded {
                segment_id,
                stretch_factor,
                min,
                max,
            } => write!(
                f,
                "segment {}: stretch factor {:.3} outside [{:.2}, {:.2}]",
                segment_id, stretch_factor, min, max
            ),
            Issue::DurationDriftCorrected {
                video_duration,
                audio_duration,
                factor,
            } => write!(
                f,
                "video was {:.3}s for {:.3}s of audio, re-stretched by {:.5}",
                video_duration, audio_duration, factor
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DubReport {
    pub generation: u32,
    pub stage: Stage,
    pub total_segments: usize,
    pub matched: usize,
    pub exhausted: usize,
    pub failed: usize,
    pub pending: usize,
    #[serde(default)]
    pub audio_duration: Option<f64>,
    #[serde(default)]
    pub output: Option<PathBuf>,
    pub issues: Vec<Issue>,
}

impl DubReport {
    /// Summarize a generation, turning unconverged segments into issues.
    pub fn from_store(store: &SegmentStore) -> Self {
        let issues = store
            .segments
            .iter()
            .filter_map(|segment| match segment.status {
                SegmentStatus::Exhausted => Some(Issue::ConvergenceExhausted {
                    segment_id: segment.id,
                    target: segment.original_duration,
                    achieved: segment.tts_duration.unwrap_or_default(),
                }),
                SegmentStatus::Failed => Some(Issue::ProviderFailure {
                    segment_id: segment.id,
                    message: segment
                        .last_error
                        .clone()
                        .unwrap_or_else(|| "unknown error".to_string()),
                }),
                _ => None,
            })
            .collect();

        Self {
            generation: store.generation,
            stage: store.stage,
            total_segments: store.len(),
            matched: store.count_status(SegmentStatus::Matched),
            exhausted: store.count_status(SegmentStatus::Exhausted),
            failed: store.count_status(SegmentStatus::Failed),
            pending: store.count_status(SegmentStatus::Pending),
            audio_duration: None,
            output: None,
            issues,
        }
    }

    pub fn with_audio_duration(mut self, duration: f64) -> Self {
        self.audio_duration = Some(duration);
        self
    }

    pub fn with_output(mut self, output: impl Into<PathBuf>) -> Self {
        self.output = Some(output.into());
        self
    }

    pub fn extend(&mut self, issues: impl IntoIterator<Item = Issue>) {
        self.issues.extend(issues);
    }

    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(DubError::FileNotFound(path.display().to_string()));
        }
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Print the report to stdout.
    pub fn print(&self) {
        println!();
        println!("═══════════════════════════════════════════════════════════════");
        println!("                         Dubbing Report                         ");
        println!("═══════════════════════════════════════════════════════════════");
        println!();
        println!(
            "  Generation: {} ({})",
            self.generation, self.stage
        );
        if let Some(ref output) = self.output {
            println!("  Output:     {}", output.display());
        }
        if let Some(duration) = self.audio_duration {
            println!("  Duration:   {:.1}s audio", duration);
        }
        println!();
        println!("  Segments:   {}", self.total_segments);
        println!("    Matched:    {}", style(self.matched).green());
        println!("    Exhausted:  {}", style(self.exhausted).yellow());
        println!("    Failed:     {}", style(self.failed).red());
        if self.pending > 0 {
            println!("    Pending:    {}", style(self.pending).dim());
        }

        if !self.issues.is_empty() {
            println!();
            println!("  Issues:");
            for issue in &self.issues {
                let line = match issue {
                    Issue::ProviderFailure { .. } => style(issue.to_string()).red(),
                    _ => style(issue.to_string()).yellow(),
                };
                println!("    - {}", line);
            }
        }
        println!();
        println!("═══════════════════════════════════════════════════════════════");
    }
}
