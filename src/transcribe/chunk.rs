use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{DubError, Result};
use crate::media::cut_audio;

/// Maximum upload size for the Whisper API (25 MB).
pub const WHISPER_MAX_FILE_SIZE: u64 = 25 * 1024 * 1024;

/// Share of the size limit a chunk is planned to use.
const SIZE_HEADROOM: f64 = 0.9;

/// A piece of the speech track ready for upload.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    pub index: usize,
    pub path: PathBuf,
    /// Position of the chunk in the source timeline, in seconds.
    pub offset: f64,
    pub duration: f64,
}

/// Split `[0, total_duration)` into equal windows so each one fits under `max_file_size`.
///
/// Returns `(start, end)` pairs in seconds.
pub fn plan_chunks(total_duration: f64, file_size: u64, max_file_size: u64) -> Vec<(f64, f64)> {
    if total_duration <= 0.0 {
        return Vec::new();
    }
    if file_size <= max_file_size {
        return vec![(0.0, total_duration)];
    }

    let budget = max_file_size as f64 * SIZE_HEADROOM;
    let count = (file_size as f64 / budget).ceil().max(1.0) as usize;
    let length = total_duration / count as f64;

    (0..count)
        .map(|i| {
            let start = i as f64 * length;
            let end = if i + 1 == count {
                total_duration
            } else {
                (i + 1) as f64 * length
            };
            (start, end)
        })
        .collect()
}

/// Cut the planned windows out of `source`. A single window reuses the source file.
pub fn create_chunks(source: &Path, windows: &[(f64, f64)], output_dir: &Path) -> Result<Vec<AudioChunk>> {
    if !source.exists() {
        return Err(DubError::FileNotFound(source.display().to_string()));
    }

    if let [(start, end)] = windows {
        return Ok(vec![AudioChunk {
            index: 0,
            path: source.to_path_buf(),
            offset: *start,
            duration: end - start,
        }]);
    }

    std::fs::create_dir_all(output_dir)?;
    info!("Creating {} audio chunks in {}", windows.len(), output_dir.display());

    let mut chunks = Vec::with_capacity(windows.len());
    for (index, &(start, end)) in windows.iter().enumerate() {
        let path = output_dir.join(format!("chunk_{:04}.mp3", index));
        debug!("Creating chunk {}: {:.3}s to {:.3}s", index, start, end);
        cut_audio(source, &path, start, end)?;
        chunks.push(AudioChunk {
            index,
            path,
            offset: start,
            duration: end - start,
        });
    }

    Ok(chunks)
}
