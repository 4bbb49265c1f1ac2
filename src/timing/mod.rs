pub mod adjust;
pub mod clean;
pub mod correct;

pub use adjust::adjust_timing;
pub use clean::{clean_segments, normalize_text, word_count};
pub use correct::correct_timestamps;

use serde::{Deserialize, Serialize};

/// Thresholds shared by the corrector, cleaner and adjuster. All values in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Where the first segment is anchored. Zero lets the detected speech start decide.
    pub start_offset: f64,
    /// Gap kept between neighbouring segments.
    pub min_gap: f64,
    /// Gaps shorter than this are closed; longer ones are pauses and kept.
    pub max_bridge_gap: f64,
    /// Segments at or under this length are merged into a neighbour.
    pub min_duration: f64,
    /// Segments with fewer words are merged into a neighbour.
    pub min_words: usize,
    /// Segments with more words are split.
    pub max_words: usize,
    /// Segments longer than this are split.
    pub max_duration: f64,
    /// Accepted rounding residue when reconciling the total span.
    pub span_tolerance: f64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            start_offset: 0.0,
            min_gap: 0.0,
            max_bridge_gap: 1.5,
            min_duration: 0.5,
            min_words: 2,
            max_words: 40,
            max_duration: 15.0,
            span_tolerance: 0.001,
        }
    }
}

/// Round to the microsecond, the precision stored in generations.
pub(crate) fn round_us(value: f64) -> f64 {
    (value * 1_000_000.0).round() / 1_000_000.0
}
