pub mod audio;
pub mod config;
pub mod error;
pub mod matcher;
pub mod media;
pub mod pipeline;
pub mod report;
pub mod retry;
pub mod rewrite;
pub mod segment;
pub mod synth;
pub mod timing;
pub mod transcribe;
pub mod video;

pub use config::Config;
pub use error::{DubError, Result};
pub use pipeline::{print_summary, PipelineConfig, PipelineResult, PipelineStats};
pub use report::{DubReport, Issue};
pub use segment::{Segment, SegmentStatus, SegmentStore, Stage};
