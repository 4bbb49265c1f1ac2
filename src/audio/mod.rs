pub mod assemble;
pub mod vad;
pub mod wav;

pub use assemble::{plan_timeline, AssembledAudio, AudioAssembler, Slot, SlotKind, Timeline};
pub use vad::{detect_speech_regions, detect_speech_start, SpeechRegion, VadConfig};
pub use wav::{dbfs, normalize_loudness, read_mono, wav_duration, write_pcm16, write_wav, MonoClip};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Rate of the assembled track, in Hz.
    pub sample_rate: u32,
    /// Loudness every synthesized clip is normalized to.
    pub target_dbfs: f64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 24_000,
            target_dbfs: -16.0,
        }
    }
}
