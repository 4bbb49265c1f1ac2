use super::{round_us, TimingConfig};
use crate::error::{DubError, Result};
use crate::segment::{SegmentStore, Stage};
use tracing::{debug, info, warn};

/// Repair boundary gaps and overlaps and anchor the first segment.
///
/// Malformed or unordered input is a configuration error. Segments that end
/// up too short are flagged with `needs_merge` for the cleaner.
pub fn correct_timestamps(store: SegmentStore, config: &TimingConfig) -> Result<SegmentStore> {
    validate_input(&store)?;

    let mut store = store;
    let offset = config.start_offset.max(0.0);
    let gap = config.min_gap.max(0.0);

    if let Some(first) = store.segments.first_mut() {
        if first.start_time != offset {
            debug!(
                "Anchoring first segment start from {:.3}s to {:.3}s",
                first.start_time, offset
            );
        }
        first.start_time = offset;
        if let Some(word) = first.words.first_mut() {
            word.start = word.start.max(offset);
        }
    }

    for seg in store.segments.iter_mut() {
        seg.start_time = seg.start_time.max(offset);
        seg.end_time = seg.end_time.max(seg.start_time);
    }

    let mut overlaps = 0;
    let mut bridged = 0;
    for i in 0..store.segments.len().saturating_sub(1) {
        let next_start = store.segments[i + 1].start_time;
        let seg = &mut store.segments[i];
        let limit = (next_start - gap).max(seg.start_time);

        if seg.end_time > limit {
            seg.end_time = limit;
            overlaps += 1;
        } else if next_start - seg.end_time < config.max_bridge_gap {
            seg.end_time = limit;
            bridged += 1;
        }
    }

    let mut flagged = 0;
    for seg in store.segments.iter_mut() {
        seg.start_time = round_us(seg.start_time);
        seg.end_time = round_us(seg.end_time);
        seg.refresh_duration();
        seg.needs_merge = seg.original_duration <= config.min_duration;
        if seg.needs_merge {
            flagged += 1;
            warn!(
                "Segment {} is only {:.3}s long, flagged for merging",
                seg.id, seg.original_duration
            );
        }
    }

    info!(
        "Corrected {} segments: {} overlaps cut, {} gaps bridged, {} flagged",
        store.len(),
        overlaps,
        bridged,
        flagged
    );

    Ok(store.advance(Stage::Corrected))
}

fn validate_input(store: &SegmentStore) -> Result<()> {
    let mut previous_start = f64::NEG_INFINITY;
    for seg in &store.segments {
        if !seg.start_time.is_finite() || !seg.end_time.is_finite() {
            return Err(DubError::Config(format!(
                "Segment {} has non-finite boundaries",
                seg.id
            )));
        }
        if seg.start_time < 0.0 || seg.end_time < seg.start_time {
            return Err(DubError::Config(format!(
                "Segment {} has invalid boundaries {:.3}s..{:.3}s",
                seg.id, seg.start_time, seg.end_time
            )));
        }
        if seg.start_time < previous_start {
            return Err(DubError::Config(format!(
                "Segment {} starts at {:.3}s, before its predecessor ({:.3}s)",
                seg.id, seg.start_time, previous_start
            )));
        }
        previous_start = seg.start_time;
    }
    Ok(())
}
