use std::path::Path;

use tracing::{debug, info};

use crate::error::{DubError, Result};

use super::{check_ffmpeg, ffmpeg, media_duration, run, secs};

/// Extract the speech track as 16 kHz mono MP3 for transcription.
///
/// Returns the duration of the input.
pub fn extract_speech_audio(input: &Path, output: &Path) -> Result<f64> {
    check_ffmpeg()?;

    if !input.exists() {
        return Err(DubError::FileNotFound(input.display().to_string()));
    }

    info!("Extracting audio from {}", input.display());

    let duration = media_duration(input)?;
    debug!("Input duration: {:.3}s", duration);

    let mut command = ffmpeg();
    command
        .arg("-i")
        .arg(input)
        .args(["-vn", "-ac", "1", "-ar", "16000", "-b:a", "64k", "-f", "mp3"])
        .arg(output);
    run(command, "FFmpeg audio extraction")?;

    if !output.exists() {
        return Err(DubError::Media("Output file was not created".to_string()));
    }

    info!("Audio extracted to {}", output.display());
    Ok(duration)
}

/// Cut `[start, end)` out of an audio file without re-sampling.
pub fn cut_audio(input: &Path, output: &Path, start: f64, end: f64) -> Result<()> {
    if !input.exists() {
        return Err(DubError::FileNotFound(input.display().to_string()));
    }
    if end <= start {
        return Err(DubError::Media("Segment duration is zero".to_string()));
    }

    debug!("Cutting audio: start={:.3}, end={:.3}", start, end);

    let mut command = ffmpeg();
    command
        .arg("-ss")
        .arg(secs(start))
        .arg("-t")
        .arg(secs(end - start))
        .arg("-i")
        .arg(input)
        .args(["-vn", "-ac", "1", "-ar", "16000", "-b:a", "64k", "-f", "mp3"])
        .arg(output);
    run(command, "FFmpeg audio cut")?;
    Ok(())
}

/// Decode any audio (or the audio of a video) into 16-bit mono WAV at `sample_rate`.
pub fn convert_to_wav(input: &Path, output: &Path, sample_rate: u32) -> Result<()> {
    if !input.exists() {
        return Err(DubError::FileNotFound(input.display().to_string()));
    }

    let mut command = ffmpeg();
    command
        .arg("-i")
        .arg(input)
        .args(["-vn", "-acodec", "pcm_s16le", "-ac", "1", "-ar"])
        .arg(sample_rate.to_string())
        .arg(output);
    run(command, "FFmpeg WAV conversion")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::is_available;

    #[test]
    fn test_extract_file_not_found() {
        if !is_available() {
            eprintln!("Skipping test: FFmpeg not available");
            return;
        }

        let result = extract_speech_audio(Path::new("/nonexistent/file.mp4"), Path::new("/tmp/out.mp3"));
        match result {
            Err(DubError::FileNotFound(path)) => assert!(path.contains("nonexistent")),
            other => panic!("Expected FileNotFound error, got: {other:?}"),
        }
    }

    #[test]
    fn test_cut_rejects_empty_range() {
        let dir = tempfile::TempDir::new().unwrap();
        let input = dir.path().join("in.mp3");
        std::fs::write(&input, b"not really audio").unwrap();

        let result = cut_audio(&input, &dir.path().join("out.mp3"), 5.0, 5.0);
        assert!(matches!(result, Err(DubError::Media(_))));
    }

    #[test]
    fn test_convert_missing_input() {
        let result = convert_to_wav(Path::new("/nonexistent/a.mp3"), Path::new("/tmp/a.wav"), 24_000);
        assert!(matches!(result, Err(DubError::FileNotFound(_))));
    }
}
