use std::path::{Path, PathBuf};

use indicatif::{ProgressBar, ProgressStyle};
use tempfile::TempDir;
use tracing::{debug, info, warn};

use crate::audio::{AssembledAudio, SlotKind, Timeline};
use crate::error::Result;
use crate::media::{self, VideoInfo};
use crate::report::Issue;
use crate::segment::{SegmentStore, Stage};

use super::VideoConfig;

/// One piece of the output video, mapped from a timeline slot.
#[derive(Debug, Clone, PartialEq)]
pub struct Piece {
    pub kind: SlotKind,
    pub source_start: f64,
    pub source_end: f64,
    /// Output length over source length.
    pub stretch_factor: f64,
    pub frames: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AlignmentPlan {
    pub fps: f64,
    pub pieces: Vec<Piece>,
    pub issues: Vec<Issue>,
    /// Length of the audio the video has to cover.
    pub audio_duration: f64,
}

impl AlignmentPlan {
    pub fn total_frames(&self) -> u64 {
        self.pieces.iter().map(|p| p.frames).sum()
    }

    pub fn duration(&self) -> f64 {
        self.total_frames() as f64 / self.fps
    }
}

/// Map every timeline slot to a video piece on the cumulative frame grid.
///
/// Segment slots are cut at their original boundaries and stretched to the
/// slot length; gaps play at normal speed.
pub fn plan_alignment(timeline: &Timeline, config: &VideoConfig) -> AlignmentPlan {
    let fps = config.fps;
    let min_source = 1.0 / fps;
    let mut pieces = Vec::with_capacity(timeline.slots.len());
    let mut issues = Vec::new();
    let mut frame_cursor = 0u64;

    for slot in &timeline.slots {
        let end_frame = (timeline.seconds(slot.end_sample) * fps).round() as u64;
        let frames = end_frame.saturating_sub(frame_cursor);
        frame_cursor = frame_cursor.max(end_frame);

        let output = timeline.slot_duration(slot);
        let source_end = slot.source_end.max(slot.source_start + min_source);
        let stretch_factor = match slot.kind {
            SlotKind::Segment(id) => {
                let factor = output / (source_end - slot.source_start);
                if factor < config.min_stretch || factor > config.max_stretch {
                    issues.push(Issue::AlignmentBoundExceeded {
                        segment_id: id,
                        stretch_factor: factor,
                        min: config.min_stretch,
                        max: config.max_stretch,
                    });
                }
                factor
            }
            _ => 1.0,
        };

        pieces.push(Piece {
            kind: slot.kind,
            source_start: slot.source_start,
            source_end,
            stretch_factor,
            frames,
        });
    }

    AlignmentPlan {
        fps,
        pieces,
        issues,
        audio_duration: timeline.duration(),
    }
}

#[derive(Debug, Clone)]
pub struct AlignedVideo {
    pub output: PathBuf,
    pub frames: u64,
    pub duration: f64,
    pub issues: Vec<Issue>,
}

/// Time-warps the source video onto the assembled audio timeline.
pub struct VideoAligner {
    config: VideoConfig,
    intro: Option<PathBuf>,
    outro: Option<PathBuf>,
    show_progress: bool,
}

impl VideoAligner {
    pub fn new(config: VideoConfig) -> Self {
        Self {
            config,
            intro: None,
            outro: None,
            show_progress: true,
        }
    }

    pub fn with_intro(mut self, intro: Option<PathBuf>) -> Self {
        self.intro = intro;
        self
    }

    pub fn with_outro(mut self, outro: Option<PathBuf>) -> Self {
        self.outro = outro;
        self
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn align(
        &self,
        store: SegmentStore,
        source: &Path,
        audio: &AssembledAudio,
        output: &Path,
    ) -> Result<(SegmentStore, AlignedVideo)> {
        media::check_ffmpeg()?;
        media::check_ffprobe()?;

        let info = media::video_info(source)?;
        let fps = self.config.fps;
        let plan = plan_alignment(&audio.timeline, &self.config);
        let mut issues = plan.issues.clone();

        for issue in &plan.issues {
            warn!("{}", issue);
        }
        info!(
            "Rendering {} video pieces ({} frames at {} fps, source {}x{} @ {:.3})",
            plan.pieces.len(),
            plan.total_frames(),
            fps,
            info.width,
            info.height,
            info.fps
        );

        let work_dir = TempDir::new()?;
        let progress_bar = if self.show_progress {
            let pb = ProgressBar::new(plan.pieces.len() as u64);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} pieces ({eta})")
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("#>-"),
            );
            Some(pb)
        } else {
            None
        };

        let mut parts = Vec::with_capacity(plan.pieces.len());
        for (index, piece) in plan.pieces.iter().enumerate() {
            if let Some(ref pb) = progress_bar {
                pb.inc(1);
            }
            if piece.frames == 0 {
                debug!("Skipping empty piece {:?}", piece.kind);
                continue;
            }

            let part = work_dir.path().join(format!("piece_{:05}.mp4", index));
            match piece.kind {
                SlotKind::Intro => self.render_bumper(self.intro.as_deref(), &part, &info, piece.frames)?,
                SlotKind::Outro => self.render_bumper(self.outro.as_deref(), &part, &info, piece.frames)?,
                SlotKind::Gap | SlotKind::Segment(_) => media::retime_slice(
                    source,
                    &part,
                    piece.source_start,
                    piece.source_end,
                    piece.stretch_factor,
                    piece.frames,
                    fps,
                    self.config.resampler,
                )?,
            }
            parts.push(part);
        }

        if let Some(pb) = progress_bar {
            pb.finish_and_clear();
        }

        let joined = work_dir.path().join("joined.mp4");
        media::concat_videos(&parts, &joined, fps, work_dir.path())?;

        let (video, frames) = self.correct_drift(&joined, &plan, work_dir.path(), &mut issues)?;

        media::mux(&video, &audio.stereo, output)?;
        info!("Aligned video written to {}", output.display());

        let mut store = store;
        for piece in &plan.pieces {
            if let SlotKind::Segment(id) = piece.kind {
                if let Some(index) = store.position(id) {
                    store.segments[index].stretch_factor = Some(piece.stretch_factor);
                }
            }
        }

        Ok((
            store.advance(Stage::Aligned),
            AlignedVideo {
                output: output.to_path_buf(),
                frames,
                duration: frames as f64 / fps,
                issues,
            },
        ))
    }

    /// Compare the rendered length with the audio and re-stretch once if they differ by more than a frame.
    fn correct_drift(
        &self,
        joined: &Path,
        plan: &AlignmentPlan,
        work_dir: &Path,
        issues: &mut Vec<Issue>,
    ) -> Result<(PathBuf, u64)> {
        let fps = self.config.fps;
        let frames = media::count_frames(joined)?;
        let video_duration = frames as f64 / fps;
        let drift = video_duration - plan.audio_duration;

        debug!(
            "Rendered {} frames ({:.3}s) for {:.3}s of audio",
            frames, video_duration, plan.audio_duration
        );

        if drift.abs() <= 1.0 / fps || video_duration <= 0.0 {
            return Ok((joined.to_path_buf(), frames));
        }

        let factor = plan.audio_duration / video_duration;
        warn!(
            "Video drifted {:+.3}s from the audio, re-stretching by {:.5}",
            drift, factor
        );

        let corrected = work_dir.join("corrected.mp4");
        media::retime_whole(joined, &corrected, factor, plan.total_frames(), fps)?;
        issues.push(Issue::DurationDriftCorrected {
            video_duration,
            audio_duration: plan.audio_duration,
            factor,
        });

        let frames = media::count_frames(&corrected)?;
        Ok((corrected, frames))
    }

    fn render_bumper(&self, clip: Option<&Path>, part: &Path, info: &VideoInfo, frames: u64) -> Result<()> {
        let fps = self.config.fps;
        let has_video = match clip {
            Some(path) => media::has_video_stream(path)?,
            None => false,
        };
        match clip {
            Some(path) if has_video => media::fit_clip(path, part, info, frames, fps),
            _ => media::black_clip(part, info, frames, fps),
        }
    }
}
