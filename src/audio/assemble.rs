use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use tracing::{debug, info, warn};

use crate::error::{DubError, Result};
use crate::media;
use crate::segment::{SegmentStore, Stage};

use super::wav::{normalize_loudness, read_mono, write_wav};
use super::AudioConfig;

/// Source gaps shorter than this are treated as contiguous.
const EDGE_EPSILON: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotKind {
    Intro,
    Gap,
    Segment(u32),
    Outro,
}

/// One contiguous piece of the output timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Slot {
    pub kind: SlotKind,
    /// Window of the source media this slot replaces (empty for intro/outro).
    pub source_start: f64,
    pub source_end: f64,
    pub start_sample: u64,
    pub end_sample: u64,
}

impl Slot {
    pub fn samples(&self) -> u64 {
        self.end_sample - self.start_sample
    }

    pub fn source_duration(&self) -> f64 {
        (self.source_end - self.source_start).max(0.0)
    }
}

/// Output layout on a sample grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timeline {
    pub sample_rate: u32,
    pub slots: Vec<Slot>,
}

impl Timeline {
    pub fn total_samples(&self) -> u64 {
        self.slots.last().map_or(0, |s| s.end_sample)
    }

    /// Length of the assembled track in seconds.
    pub fn duration(&self) -> f64 {
        self.seconds(self.total_samples())
    }

    pub fn seconds(&self, samples: u64) -> f64 {
        samples as f64 / self.sample_rate as f64
    }

    pub fn slot_duration(&self, slot: &Slot) -> f64 {
        self.seconds(slot.samples())
    }

    pub fn segment_slot(&self, id: u32) -> Option<&Slot> {
        self.slots.iter().find(|s| s.kind == SlotKind::Segment(id))
    }
}

/// Running position on the cumulative sample grid.
struct GridCursor {
    sample_rate: f64,
    seconds: f64,
    sample: u64,
}

impl GridCursor {
    fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate: sample_rate as f64,
            seconds: 0.0,
            sample: 0,
        }
    }

    fn push(&mut self, kind: SlotKind, source_start: f64, source_end: f64, duration: f64) -> Slot {
        let start_sample = self.sample;
        self.seconds += duration.max(0.0);
        let end_sample = ((self.seconds * self.sample_rate).round() as u64).max(start_sample);
        self.sample = end_sample;
        Slot {
            kind,
            source_start,
            source_end,
            start_sample,
            end_sample,
        }
    }
}

/// Lay out intro, gaps, segments and outro on the output grid.
///
/// A segment's slot is `max(original_duration, tts_duration)` long, so audio
/// that overflows its window pushes every later slot forward. Gaps between
/// segments (and before the first or after the last one, when the source
/// extends there) are kept at their source length.
pub fn plan_timeline(store: &SegmentStore, sample_rate: u32, intro: f64, outro: f64) -> Timeline {
    let mut cursor = GridCursor::new(sample_rate);
    let mut slots = Vec::new();

    if intro > 0.0 {
        slots.push(cursor.push(SlotKind::Intro, 0.0, 0.0, intro));
    }

    let mut source_pos = 0.0;
    for segment in store.segments.iter().filter(|s| !s.removed) {
        if segment.start_time > source_pos + EDGE_EPSILON {
            slots.push(cursor.push(
                SlotKind::Gap,
                source_pos,
                segment.start_time,
                segment.start_time - source_pos,
            ));
        }

        let window = segment.original_duration;
        let duration = segment.tts_duration.map_or(window, |tts| tts.max(window));
        slots.push(cursor.push(
            SlotKind::Segment(segment.id),
            segment.start_time,
            segment.end_time,
            duration,
        ));
        source_pos = f64::max(source_pos, segment.end_time);
    }

    if let Some(source_duration) = store.source_duration {
        if source_duration > source_pos + EDGE_EPSILON {
            slots.push(cursor.push(
                SlotKind::Gap,
                source_pos,
                source_duration,
                source_duration - source_pos,
            ));
        }
    }

    if outro > 0.0 {
        slots.push(cursor.push(SlotKind::Outro, 0.0, 0.0, outro));
    }

    Timeline { sample_rate, slots }
}

#[derive(Debug, Clone)]
pub struct AssembledAudio {
    pub mono: PathBuf,
    pub stereo: PathBuf,
    pub timeline: Timeline,
}

/// Places synthesized clips on the planned timeline and writes the dubbed track.
pub struct AudioAssembler {
    config: AudioConfig,
    intro: Option<PathBuf>,
    outro: Option<PathBuf>,
}

impl AudioAssembler {
    pub fn new(config: AudioConfig) -> Self {
        Self {
            config,
            intro: None,
            outro: None,
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

    pub fn assemble(&self, store: SegmentStore, out_dir: &Path) -> Result<(SegmentStore, AssembledAudio)> {
        std::fs::create_dir_all(out_dir)?;
        let work_dir = TempDir::new()?;
        let rate = self.config.sample_rate;

        let intro = match &self.intro {
            Some(path) => self.load_bumper(path, work_dir.path())?,
            None => Vec::new(),
        };
        let outro = match &self.outro {
            Some(path) => self.load_bumper(path, work_dir.path())?,
            None => Vec::new(),
        };

        let timeline = plan_timeline(
            &store,
            rate,
            intro.len() as f64 / rate as f64,
            outro.len() as f64 / rate as f64,
        );
        info!(
            "Assembling {} slots into {:.3}s of audio",
            timeline.slots.len(),
            timeline.duration()
        );

        let mut track = vec![0.0f32; timeline.total_samples() as usize];
        let mut store = store;

        for slot in &timeline.slots {
            let window = &mut track[slot.start_sample as usize..slot.end_sample as usize];
            match slot.kind {
                SlotKind::Intro => place(window, &intro),
                SlotKind::Outro => place(window, &outro),
                SlotKind::Gap => {}
                SlotKind::Segment(id) => {
                    let Some(index) = store.position(id) else {
                        continue;
                    };
                    let segment = &mut store.segments[index];
                    segment.final_duration = Some(timeline.slot_duration(slot));

                    let Some(path) = segment.tts_audio_path.clone() else {
                        debug!("Segment {} has no audio, leaving silence", id);
                        continue;
                    };
                    match self.load_clip(&path, work_dir.path()) {
                        Ok(clip) => {
                            let overflow = clip.len().saturating_sub(window.len());
                            if overflow > 1 {
                                warn!("Segment {} audio truncated by {} samples", id, overflow);
                            }
                            place(window, &clip);
                        }
                        Err(e) => warn!("Segment {} audio unusable, leaving silence: {}", id, e),
                    }
                }
            }
        }

        let mono = out_dir.join("dubbed_mono.wav");
        let stereo = out_dir.join("dubbed_stereo.wav");
        write_wav(&mono, &track, rate, 1)?;
        write_wav(&stereo, &track, rate, 2)?;

        info!("Dubbed audio written to {}", stereo.display());

        Ok((
            store.advance(Stage::Assembled),
            AssembledAudio {
                mono,
                stereo,
                timeline,
            },
        ))
    }

    /// Read a clip at the track rate, converting through ffmpeg when needed, and normalize it.
    fn load_clip(&self, path: &Path, work_dir: &Path) -> Result<Vec<f32>> {
        let rate = self.config.sample_rate;
        let clip = match read_mono(path) {
            Ok(clip) if clip.sample_rate == rate && clip.source_channels == 1 => clip,
            Ok(_) | Err(DubError::Wav(_)) => {
                let stem = path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "clip".to_string());
                let converted = work_dir.join(format!("{stem}.converted.wav"));
                media::convert_to_wav(path, &converted, rate)?;
                read_mono(&converted)?
            }
            Err(e) => return Err(e),
        };

        let mut samples = clip.samples;
        normalize_loudness(&mut samples, self.config.target_dbfs);
        Ok(samples)
    }

    /// Intro/outro audio. A clip without an audio stream contributes silence of its length.
    fn load_bumper(&self, path: &Path, work_dir: &Path) -> Result<Vec<f32>> {
        if !path.exists() {
            return Err(DubError::FileNotFound(path.display().to_string()));
        }
        if let Ok(false) = media::has_audio_stream(path) {
            let duration = media::media_duration(path)?;
            let len = (duration * self.config.sample_rate as f64).round() as usize;
            debug!("{} has no audio, using {:.3}s of silence", path.display(), duration);
            return Ok(vec![0.0; len]);
        }
        self.load_clip(path, work_dir)
    }
}

/// Copy as much of `clip` as fits; the rest of `window` stays silent.
fn place(window: &mut [f32], clip: &[f32]) {
    let len = window.len().min(clip.len());
    window[..len].copy_from_slice(&clip[..len]);
}
