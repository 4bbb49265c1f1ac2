use std::path::Path;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use tracing::debug;

use crate::error::{DubError, Result};

/// Decoded audio, downmixed to mono and scaled to [-1, 1].
#[derive(Debug, Clone)]
pub struct MonoClip {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    /// Channel count of the file the clip was read from.
    pub source_channels: u16,
}

impl MonoClip {
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Read a WAV file and downmix it to mono.
pub fn read_mono(path: &Path) -> Result<MonoClip> {
    if !path.exists() {
        return Err(DubError::FileNotFound(path.display().to_string()));
    }

    let reader = WavReader::open(path)?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let interleaved: Vec<f32> = match spec.sample_format {
        SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<Vec<f32>, hound::Error>>()?
        }
        SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<std::result::Result<Vec<f32>, hound::Error>>()?,
    };

    let samples = if channels == 1 {
        interleaved
    } else {
        interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect()
    };

    debug!(
        "Read {} samples at {} Hz from {:?}",
        samples.len(),
        spec.sample_rate,
        path
    );

    Ok(MonoClip {
        samples,
        sample_rate: spec.sample_rate,
        source_channels: spec.channels,
    })
}

/// Write mono samples as 16-bit PCM, duplicating them across `channels`.
pub fn write_wav(path: &Path, samples: &[f32], sample_rate: u32, channels: u16) -> Result<()> {
    let spec = WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec)?;
    for &sample in samples {
        let value = to_i16(sample);
        for _ in 0..channels {
            writer.write_sample(value)?;
        }
    }
    writer.finalize()?;
    Ok(())
}

/// Write raw little-endian 16-bit mono PCM into a WAV file. Returns the sample count.
pub fn write_pcm16(path: &Path, pcm: &[u8], sample_rate: u32) -> Result<usize> {
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec)?;
    let mut count = 0;
    for pair in pcm.chunks_exact(2) {
        writer.write_sample(i16::from_le_bytes([pair[0], pair[1]]))?;
        count += 1;
    }
    writer.finalize()?;
    Ok(count)
}

/// Exact duration of a WAV file from its header.
pub fn wav_duration(path: &Path) -> Result<f64> {
    let reader = WavReader::open(path)?;
    let spec = reader.spec();
    Ok(reader.duration() as f64 / spec.sample_rate as f64)
}

fn to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16
}

/// Calculate RMS (Root Mean Square) level of samples in [-1, 1].
fn calculate_rms(samples: &[f32]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum_squares / samples.len() as f64).sqrt()
}

/// Loudness relative to full scale. `None` for digital silence.
pub fn dbfs(samples: &[f32]) -> Option<f64> {
    let rms = calculate_rms(samples);
    (rms > 0.0).then(|| 20.0 * rms.log10())
}

/// Apply a constant gain so the clip's RMS level lands on `target_dbfs`.
pub fn normalize_loudness(samples: &mut [f32], target_dbfs: f64) {
    let Some(current) = dbfs(samples) else {
        return;
    };
    let gain = 10f64.powf((target_dbfs - current) / 20.0) as f32;
    for sample in samples.iter_mut() {
        *sample = (*sample * gain).clamp(-1.0, 1.0);
    }
}
