use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::Result;

use super::wav::read_mono;

/// Energy-based voice activity detection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VadConfig {
    /// Anchor the first segment to the detected speech start.
    pub enabled: bool,
    /// RMS energy threshold (0.0 to 1.0). Lower is more sensitive.
    pub energy_threshold: f32,
    /// Shortest run of speech kept as a region, in seconds.
    pub min_speech: f64,
    /// Shortest silence that splits two regions, in seconds.
    pub min_silence: f64,
    /// Analysis window, in seconds.
    pub window: f64,
    /// Hop between windows, in seconds.
    pub hop: f64,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            energy_threshold: 0.01,
            min_speech: 0.25,
            min_silence: 0.5,
            window: 0.1,
            hop: 0.05,
        }
    }
}

/// A span of detected speech, in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeechRegion {
    pub start: f64,
    pub end: f64,
}

impl SpeechRegion {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

fn calculate_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum_squares / samples.len() as f64).sqrt() as f32
}

/// Detect speech regions in a WAV file.
pub fn detect_speech_regions(path: &Path, config: &VadConfig) -> Result<Vec<SpeechRegion>> {
    let clip = read_mono(path)?;
    if clip.samples.is_empty() || clip.sample_rate == 0 {
        return Ok(vec![]);
    }

    let rate = clip.sample_rate as f64;
    let window = ((config.window * rate).round() as usize).max(1);
    let hop = ((config.hop * rate).round() as usize).max(1);

    let energy = compute_energy_profile(&clip.samples, window, hop);
    let frames = detect_speech_frames(&energy, config.energy_threshold);
    let frame_duration = hop as f64 / rate;
    let regions = frames_to_regions(&frames, frame_duration, config.min_speech, config.min_silence);

    info!(
        "Detected {} speech regions in {:.2}s of audio",
        regions.len(),
        clip.duration()
    );
    Ok(regions)
}

/// Start of the first speech region, if any speech is present.
pub fn detect_speech_start(path: &Path, config: &VadConfig) -> Result<Option<f64>> {
    let start = detect_speech_regions(path, config)?
        .first()
        .map(|region| region.start);
    debug!("Speech starts at {:?}", start);
    Ok(start)
}

fn compute_energy_profile(samples: &[f32], window: usize, hop: usize) -> Vec<f32> {
    if samples.len() < window {
        return vec![calculate_rms(samples)];
    }

    let mut energy = Vec::new();
    let mut pos = 0;
    while pos + window <= samples.len() {
        energy.push(calculate_rms(&samples[pos..pos + window]));
        pos += hop;
    }
    energy
}

fn detect_speech_frames(energy: &[f32], threshold: f32) -> Vec<bool> {
    energy.iter().map(|&e| e >= threshold).collect()
}

/// Group speech frames into regions, bridging short silences and dropping short bursts.
fn frames_to_regions(
    frames: &[bool],
    frame_duration: f64,
    min_speech: f64,
    min_silence: f64,
) -> Vec<SpeechRegion> {
    if frames.is_empty() || frame_duration <= 0.0 {
        return vec![];
    }

    let min_speech_frames = (min_speech / frame_duration).ceil() as usize;
    let min_silence_frames = (min_silence / frame_duration).ceil() as usize;

    let mut raw: Vec<(usize, usize)> = Vec::new();
    let mut open: Option<usize> = None;
    for (i, &speech) in frames.iter().enumerate() {
        match (speech, open) {
            (true, None) => open = Some(i),
            (false, Some(start)) => {
                raw.push((start, i));
                open = None;
            }
            _ => {}
        }
    }
    if let Some(start) = open {
        raw.push((start, frames.len()));
    }

    let mut merged: Vec<(usize, usize)> = Vec::new();
    for (start, end) in raw {
        match merged.last_mut() {
            Some(last) if start - last.1 < min_silence_frames => last.1 = end,
            _ => merged.push((start, end)),
        }
    }

    merged
        .into_iter()
        .filter(|(start, end)| end - start >= min_speech_frames)
        .map(|(start, end)| SpeechRegion {
            start: start as f64 * frame_duration,
            end: end as f64 * frame_duration,
        })
        .collect()
}

/// Total seconds of speech across regions.
pub fn total_speech_duration(regions: &[SpeechRegion]) -> f64 {
    regions.iter().map(SpeechRegion::duration).sum()
}
