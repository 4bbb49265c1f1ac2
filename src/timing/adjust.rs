use super::{round_us, TimingConfig};
use crate::error::{DubError, Result};
use crate::segment::{SegmentStore, Stage};
use tracing::{debug, info};

/// Recompute target durations and reconcile them with the covered span.
///
/// Durations are rounded to the microsecond; the residue left by rounding is
/// folded into the final segment so that durations plus gaps add up to
/// `last.end - first.start` exactly.
pub fn adjust_timing(store: SegmentStore, config: &TimingConfig) -> Result<SegmentStore> {
    let mut store = store;

    for seg in store.segments.iter_mut() {
        seg.start_time = round_us(seg.start_time);
        seg.end_time = round_us(seg.end_time);
        if seg.end_time < seg.start_time {
            return Err(DubError::Config(format!(
                "Segment {} ends before it starts ({:.6}s < {:.6}s)",
                seg.id, seg.end_time, seg.start_time
            )));
        }
        seg.original_duration = round_us(seg.end_time - seg.start_time);
    }

    for pair in store.segments.windows(2) {
        if pair[0].end_time > pair[1].start_time {
            return Err(DubError::Config(format!(
                "Segment {} overlaps segment {} ({:.6}s > {:.6}s)",
                pair[0].id, pair[1].id, pair[0].end_time, pair[1].start_time
            )));
        }
    }

    if store.is_empty() {
        return Ok(store.advance(Stage::Adjusted));
    }
    let first_start = store.segments[0].start_time;
    let last_end = store.segments[store.len() - 1].end_time;
    let span = last_end - first_start;

    let durations: f64 = store.segments.iter().map(|s| s.original_duration).sum();
    let gaps: f64 = store
        .segments
        .windows(2)
        .map(|pair| pair[1].start_time - pair[0].end_time)
        .sum();
    let residual = span - (durations + gaps);

    if residual.abs() > config.span_tolerance {
        return Err(DubError::Config(format!(
            "Segment durations disagree with the covered span by {:.6}s",
            residual
        )));
    }

    if let Some(source) = store.source_duration {
        if last_end > source + config.span_tolerance {
            return Err(DubError::Config(format!(
                "Last segment ends at {:.3}s, beyond the source duration {:.3}s",
                last_end, source
            )));
        }
    }

    if let Some(last) = store.segments.last_mut() {
        if residual != 0.0 {
            debug!("Folding {:.9}s rounding residue into segment {}", residual, last.id);
        }
        last.original_duration += residual;
    }

    info!(
        "Adjusted {} segments spanning {:.3}s",
        store.len(),
        span
    );

    Ok(store.advance(Stage::Adjusted))
}
