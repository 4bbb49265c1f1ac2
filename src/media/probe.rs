use std::path::Path;
use std::process::Command;

use tracing::debug;

use crate::error::{DubError, Result};

use super::run;

/// Check if FFmpeg is installed and accessible.
pub fn check_ffmpeg() -> Result<()> {
    let output = Command::new("ffmpeg")
        .arg("-version")
        .output()
        .map_err(|e| {
            DubError::Media(format!(
                "FFmpeg not found. Please install FFmpeg and ensure it's in your PATH. Error: {e}"
            ))
        })?;

    if !output.status.success() {
        return Err(DubError::Media("FFmpeg check failed".to_string()));
    }

    debug!("FFmpeg is available");
    Ok(())
}

/// Check if FFprobe is installed and accessible.
pub fn check_ffprobe() -> Result<()> {
    let output = Command::new("ffprobe")
        .arg("-version")
        .output()
        .map_err(|e| {
            DubError::Media(format!(
                "FFprobe not found. Please install FFmpeg (includes FFprobe). Error: {e}"
            ))
        })?;

    if !output.status.success() {
        return Err(DubError::Media("FFprobe check failed".to_string()));
    }

    debug!("FFprobe is available");
    Ok(())
}

/// Both tools present.
pub fn is_available() -> bool {
    check_ffmpeg().is_ok() && check_ffprobe().is_ok()
}

fn ffprobe(input: &Path, args: &[&str]) -> Result<String> {
    if !input.exists() {
        return Err(DubError::FileNotFound(input.display().to_string()));
    }
    let mut command = Command::new("ffprobe");
    command.args(["-v", "error"]).args(args).arg(input);
    let stdout = run(command, "FFprobe")?;
    Ok(String::from_utf8_lossy(&stdout).trim().to_string())
}

/// Container duration in seconds.
pub fn media_duration(input: &Path) -> Result<f64> {
    let out = ffprobe(
        input,
        &[
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ],
    )?;

    out.parse::<f64>()
        .map_err(|e| DubError::Media(format!("Failed to parse duration '{out}': {e}")))
}

/// Geometry and frame rate of the first video stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoInfo {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
}

pub fn video_info(input: &Path) -> Result<VideoInfo> {
    let out = ffprobe(
        input,
        &[
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=width,height,r_frame_rate",
            "-of",
            "csv=s=,:p=0",
        ],
    )?;
    parse_video_info(&out)
}

fn parse_video_info(out: &str) -> Result<VideoInfo> {
    let parts: Vec<&str> = out.lines().next().unwrap_or("").split(',').collect();
    if parts.len() < 3 {
        return Err(DubError::Media(format!(
            "Failed to parse video info: {out}"
        )));
    }

    let width: u32 = parts[0]
        .trim()
        .parse()
        .map_err(|e| DubError::Media(format!("Failed to parse width: {e}")))?;
    let height: u32 = parts[1]
        .trim()
        .parse()
        .map_err(|e| DubError::Media(format!("Failed to parse height: {e}")))?;
    let fps = parse_frame_rate(parts[2].trim())
        .ok_or_else(|| DubError::Media(format!("Failed to parse frame rate '{}'", parts[2])))?;

    Ok(VideoInfo { width, height, fps })
}

/// Parse an ffprobe rate such as `30000/1001` or `25`.
pub fn parse_frame_rate(rate: &str) -> Option<f64> {
    let value = match rate.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => rate.trim().parse().ok()?,
    };
    (value > 0.0 && value.is_finite()).then_some(value)
}

fn has_stream(input: &Path, selector: &str) -> Result<bool> {
    let out = ffprobe(
        input,
        &[
            "-select_streams",
            selector,
            "-show_entries",
            "stream=index",
            "-of",
            "csv=p=0",
        ],
    )?;
    Ok(!out.is_empty())
}

pub fn has_video_stream(input: &Path) -> Result<bool> {
    has_stream(input, "v")
}

pub fn has_audio_stream(input: &Path) -> Result<bool> {
    has_stream(input, "a")
}

/// Exact number of video frames, by counting packets.
pub fn count_frames(input: &Path) -> Result<u64> {
    let out = ffprobe(
        input,
        &[
            "-select_streams",
            "v:0",
            "-count_packets",
            "-show_entries",
            "stream=nb_read_packets",
            "-of",
            "csv=p=0",
        ],
    )?;
    let first = out.lines().next().unwrap_or("").trim().trim_end_matches(',');
    first
        .parse()
        .map_err(|e| DubError::Media(format!("Failed to parse frame count '{out}': {e}")))
}
