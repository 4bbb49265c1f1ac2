//! Thin wrappers around the ffmpeg and ffprobe command-line tools.

pub mod convert;
pub mod probe;
pub mod video;

pub use convert::{convert_to_wav, cut_audio, extract_speech_audio};
pub use probe::{
    check_ffmpeg, check_ffprobe, count_frames, has_audio_stream, has_video_stream, is_available,
    media_duration, parse_frame_rate, video_info, VideoInfo,
};
pub use video::{black_clip, concat_videos, fit_clip, mux, retime_slice, retime_whole, Resampler};

use std::process::Command;

use tracing::debug;

use crate::error::{DubError, Result};

/// Run a prepared ffmpeg/ffprobe command and return its stdout.
pub(crate) fn run(mut command: Command, what: &str) -> Result<Vec<u8>> {
    debug!("Running {:?}", command);

    let output = command
        .output()
        .map_err(|e| DubError::Media(format!("Failed to run {what}: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let tail: String = stderr
            .lines()
            .rev()
            .take(5)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect::<Vec<_>>()
            .join("\n");
        return Err(DubError::Media(format!("{what} failed: {tail}")));
    }

    Ok(output.stdout)
}

/// An ffmpeg command with the flags every invocation shares.
pub(crate) fn ffmpeg() -> Command {
    let mut command = Command::new("ffmpeg");
    command.args(["-y", "-hide_banner", "-loglevel", "error"]);
    command
}

/// Format seconds for ffmpeg arguments.
pub(crate) fn secs(value: f64) -> String {
    format!("{:.6}", value.max(0.0))
}
