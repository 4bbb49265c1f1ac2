pub mod align;

pub use align::{plan_alignment, AlignedVideo, AlignmentPlan, Piece, VideoAligner};

use crate::media::Resampler;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    /// Frame rate every output piece is normalized to.
    pub fps: f64,
    /// Stretch factors below this are reported.
    pub min_stretch: f64,
    /// Stretch factors above this are reported.
    pub max_stretch: f64,
    pub resampler: Resampler,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            fps: 25.0,
            min_stretch: 0.5,
            max_stretch: 2.0,
            resampler: Resampler::default(),
        }
    }
}
