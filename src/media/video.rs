use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{DubError, Result};

use super::{ffmpeg, run, secs, VideoInfo};

/// How frames are produced when a slice is slowed down or sped up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resampler {
    /// Duplicate or drop whole frames.
    Drop,
    /// Blend neighbouring frames.
    #[default]
    Blend,
    /// Motion-compensated interpolation (slow).
    #[serde(rename = "minterpolate")]
    MotionInterpolate,
}

impl Resampler {
    /// The ffmpeg filter that resamples to `fps`.
    pub fn filter(&self, fps: f64) -> String {
        match self {
            Resampler::Drop => format!("fps={fps}"),
            Resampler::Blend => format!("framerate=fps={fps}"),
            Resampler::MotionInterpolate => format!("minterpolate=fps={fps}:mi_mode=mci"),
        }
    }
}

impl std::fmt::Display for Resampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Resampler::Drop => write!(f, "drop"),
            Resampler::Blend => write!(f, "blend"),
            Resampler::MotionInterpolate => write!(f, "minterpolate"),
        }
    }
}

impl std::str::FromStr for Resampler {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "drop" => Ok(Resampler::Drop),
            "blend" => Ok(Resampler::Blend),
            "minterpolate" | "motion" => Ok(Resampler::MotionInterpolate),
            _ => Err(format!(
                "Unknown resampler: {}. Use 'drop', 'blend', or 'minterpolate'",
                s
            )),
        }
    }
}

/// Clone the last frame long enough to cover `frames`, so `-frames:v` can cap exactly.
fn pad_filter(frames: u64, fps: f64) -> String {
    format!("tpad=stop_mode=clone:stop_duration={:.3}", frames as f64 / fps + 1.0)
}

fn slice_filter(factor: f64, frames: u64, fps: f64, resampler: Resampler) -> String {
    format!(
        "setpts={factor:.6}*(PTS-STARTPTS),{},setsar=1,{}",
        resampler.filter(fps),
        pad_filter(frames, fps)
    )
}

fn fit_filter(info: &VideoInfo, frames: u64, fps: f64) -> String {
    format!(
        "scale={w}:{h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2,setsar=1,fps={fps},{}",
        pad_filter(frames, fps),
        w = info.width,
        h = info.height,
    )
}

fn encode_args(command: &mut std::process::Command, frames: u64) {
    command
        .arg("-frames:v")
        .arg(frames.to_string())
        .args(["-an", "-c:v", "libx264", "-preset", "veryfast", "-crf", "18", "-pix_fmt", "yuv420p"]);
}

/// Cut `[start, end)` from the source, time-warp it by `factor` and emit exactly `frames` frames.
#[allow(clippy::too_many_arguments)]
pub fn retime_slice(
    input: &Path,
    output: &Path,
    start: f64,
    end: f64,
    factor: f64,
    frames: u64,
    fps: f64,
    resampler: Resampler,
) -> Result<()> {
    if end <= start {
        return Err(DubError::Media(format!(
            "Empty video slice {:.3}s..{:.3}s",
            start, end
        )));
    }

    debug!(
        "Retiming slice {:.3}s..{:.3}s by {:.4} into {} frames",
        start, end, factor, frames
    );

    let mut command = ffmpeg();
    command
        .arg("-ss")
        .arg(secs(start))
        .arg("-t")
        .arg(secs(end - start))
        .arg("-i")
        .arg(input)
        .arg("-vf")
        .arg(slice_filter(factor, frames, fps, resampler));
    encode_args(&mut command, frames);
    command.arg(output);
    run(command, "FFmpeg slice retime")?;
    Ok(())
}

/// Scale an intro/outro clip to the source geometry and fit it to `frames`.
pub fn fit_clip(input: &Path, output: &Path, info: &VideoInfo, frames: u64, fps: f64) -> Result<()> {
    let mut command = ffmpeg();
    command
        .arg("-i")
        .arg(input)
        .arg("-vf")
        .arg(fit_filter(info, frames, fps));
    encode_args(&mut command, frames);
    command.arg(output);
    run(command, "FFmpeg clip fit")?;
    Ok(())
}

/// Black frames of the given geometry.
pub fn black_clip(output: &Path, info: &VideoInfo, frames: u64, fps: f64) -> Result<()> {
    let mut command = ffmpeg();
    command
        .args(["-f", "lavfi", "-i"])
        .arg(format!(
            "color=c=black:s={}x{}:r={}",
            info.width, info.height, fps
        ))
        .args(["-vf", "setsar=1"]);
    encode_args(&mut command, frames);
    command.arg(output);
    run(command, "FFmpeg black clip")?;
    Ok(())
}

fn concat_list(parts: &[PathBuf]) -> String {
    let mut list = String::new();
    for part in parts {
        let escaped = part.display().to_string().replace('\'', "'\\''");
        let _ = writeln!(list, "file '{escaped}'");
    }
    list
}

/// Join clips in order and normalize the result to `fps`.
pub fn concat_videos(parts: &[PathBuf], output: &Path, fps: f64, work_dir: &Path) -> Result<()> {
    if parts.is_empty() {
        return Err(DubError::Media("Nothing to concatenate".to_string()));
    }

    let list_path = work_dir.join("concat.txt");
    std::fs::write(&list_path, concat_list(parts))?;

    let mut command = ffmpeg();
    command
        .args(["-f", "concat", "-safe", "0", "-i"])
        .arg(&list_path)
        .arg("-vf")
        .arg(format!("fps={fps}"))
        .args(["-an", "-c:v", "libx264", "-preset", "veryfast", "-crf", "18", "-pix_fmt", "yuv420p"])
        .arg(output);
    run(command, "FFmpeg concat")?;
    Ok(())
}

/// Stretch a whole video by `factor`, emitting exactly `frames` frames.
pub fn retime_whole(input: &Path, output: &Path, factor: f64, frames: u64, fps: f64) -> Result<()> {
    let mut command = ffmpeg();
    command
        .arg("-i")
        .arg(input)
        .arg("-vf")
        .arg(format!(
            "setpts={factor:.6}*PTS,fps={fps},{}",
            pad_filter(frames, fps)
        ));
    encode_args(&mut command, frames);
    command.arg(output);
    run(command, "FFmpeg whole-video retime")?;
    Ok(())
}

/// Replace the audio of `video` with `audio`.
pub fn mux(video: &Path, audio: &Path, output: &Path) -> Result<()> {
    let mut command = ffmpeg();
    command
        .arg("-i")
        .arg(video)
        .arg("-i")
        .arg(audio)
        .args([
            "-map", "0:v:0", "-map", "1:a:0", "-c:v", "copy", "-c:a", "aac", "-b:a", "192k",
        ])
        .arg(output);
    run(command, "FFmpeg mux")?;
    Ok(())
}
