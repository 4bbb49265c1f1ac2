use crate::error::{DubError, Result};
use crate::matcher::{Context, DurationMatcher};
use crate::segment::{Segment, SegmentStatus, SegmentStore, Stage};
use futures::stream::{FuturesUnordered, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// Statistics from the initial translation pass.
#[derive(Debug, Clone)]
pub struct TranslationStats {
    pub total: usize,
    pub translated: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub total_time: Duration,
}

/// Statistics from the duration matching pass.
#[derive(Debug, Clone)]
pub struct MatchStats {
    pub total: usize,
    pub matched: usize,
    pub exhausted: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub total_time: Duration,
    pub avg_segment_time: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pass {
    Translate,
    Match,
}

struct Outcome {
    index: usize,
    segment: Segment,
    elapsed: Option<Duration>,
}

struct PassTiming {
    cancelled: usize,
    total_time: Duration,
    avg_segment_time: Duration,
}

/// Runs the matcher over every segment on a bounded worker pool.
pub struct MatchOrchestrator {
    matcher: Arc<DurationMatcher>,
    concurrency: usize,
    show_progress: bool,
    cancel: Arc<AtomicBool>,
}

impl MatchOrchestrator {
    pub fn new(matcher: Arc<DurationMatcher>, concurrency: usize) -> Self {
        Self {
            matcher,
            concurrency: concurrency.max(1),
            show_progress: true,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Enable or disable progress bar display.
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Share a cancellation flag; once set, no new segment is started.
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    /// Translate every segment from its source text.
    pub async fn translate_all(&self, store: SegmentStore) -> Result<(SegmentStore, TranslationStats)> {
        info!(
            "Translating {} segments into {}",
            store.len(),
            self.matcher.target_language()
        );

        let (mut store, timing) = self.run_pass(store, Pass::Translate).await;
        store.target_language = Some(self.matcher.target_language().to_string());

        let failed = store.count_status(SegmentStatus::Failed);
        let translated = store
            .segments
            .iter()
            .filter(|s| !s.translated_text.is_empty())
            .count();
        let stats = TranslationStats {
            total: store.len(),
            translated,
            failed,
            cancelled: timing.cancelled,
            total_time: timing.total_time,
        };

        info!(
            "Translation complete: {}/{} segments in {:.2}s",
            translated,
            stats.total,
            stats.total_time.as_secs_f64()
        );

        if translated == 0 && failed > 0 {
            let errors: Vec<String> = store
                .segments
                .iter()
                .filter_map(|s| s.last_error.clone())
                .take(3)
                .collect();
            return Err(DubError::ProviderFailure(format!(
                "All {} segments failed to translate. Errors: {}",
                failed,
                errors.join("; ")
            )));
        }

        Ok((store.advance(Stage::Translated), stats))
    }

    /// Converge every segment's synthesized duration onto its window.
    pub async fn match_all(&self, store: SegmentStore) -> Result<(SegmentStore, MatchStats)> {
        info!(
            "Matching {} segments with {} concurrent workers using {}",
            store.len(),
            self.concurrency,
            self.matcher.synthesizer_name()
        );

        let (store, timing) = self.run_pass(store, Pass::Match).await;

        let stats = MatchStats {
            total: store.len(),
            matched: store.count_status(SegmentStatus::Matched),
            exhausted: store.count_status(SegmentStatus::Exhausted),
            failed: store.count_status(SegmentStatus::Failed),
            cancelled: timing.cancelled,
            total_time: timing.total_time,
            avg_segment_time: timing.avg_segment_time,
        };

        info!(
            "Matching complete: {} matched, {} exhausted, {} failed in {:.2}s (avg {:.2}s/segment)",
            stats.matched,
            stats.exhausted,
            stats.failed,
            stats.total_time.as_secs_f64(),
            stats.avg_segment_time.as_secs_f64()
        );

        if stats.total > 0 && stats.failed == stats.total {
            let errors: Vec<String> = store
                .segments
                .iter()
                .filter_map(|s| s.last_error.clone())
                .take(3)
                .collect();
            return Err(DubError::ProviderFailure(format!(
                "All {} segments failed. Errors: {}",
                stats.total,
                errors.join("; ")
            )));
        }

        Ok((store.advance(Stage::Matched), stats))
    }

    async fn run_pass(&self, store: SegmentStore, pass: Pass) -> (SegmentStore, PassTiming) {
        let total = store.len();
        let start_time = Instant::now();

        let contexts: Vec<Context> = (0..total)
            .map(|index| match pass {
                Pass::Translate => source_context(&store, index),
                Pass::Match => store.context_at(index),
            })
            .collect();

        let progress_bar = if self.show_progress && total > 0 {
            let pb = ProgressBar::new(total as u64);
            let unit = match pass {
                Pass::Translate => "translated",
                Pass::Match => "matched",
            };
            pb.set_style(
                ProgressStyle::default_bar()
                    .template(&format!(
                        "{{spinner:.green}} [{{elapsed_precise}}] [{{bar:40.cyan/blue}}] {{pos}}/{{len}} {unit} ({{eta}})"
                    ))
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("#>-"),
            );
            Some(pb)
        } else {
            None
        };

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut futures = FuturesUnordered::new();

        for (index, (segment, context)) in store.segments.iter().cloned().zip(contexts).enumerate() {
            let sem = semaphore.clone();
            let matcher = self.matcher.clone();
            let cancel = self.cancel.clone();
            let pb = progress_bar.clone();

            futures.push(async move {
                let _permit = sem.acquire().await.expect("Semaphore closed");

                if cancel.load(Ordering::SeqCst) {
                    debug!("Cancelled before segment {}", segment.id);
                    return Outcome {
                        index,
                        segment,
                        elapsed: None,
                    };
                }

                let started = Instant::now();
                let segment = match pass {
                    Pass::Translate => matcher.translate_segment(segment, context).await,
                    Pass::Match => matcher.match_segment(segment, context).await,
                };

                if let Some(ref pb) = pb {
                    pb.inc(1);
                }

                Outcome {
                    index,
                    segment,
                    elapsed: Some(started.elapsed()),
                }
            });
        }

        let mut results: Vec<Outcome> = Vec::with_capacity(total);
        while let Some(outcome) = futures.next().await {
            results.push(outcome);
        }

        if let Some(pb) = progress_bar {
            pb.finish_and_clear();
        }

        results.sort_by_key(|r| r.index);

        let mut store = store;
        let mut cancelled = 0;
        let mut busy = Duration::ZERO;
        let mut ran = 0u32;

        for outcome in results {
            match outcome.elapsed {
                Some(elapsed) => {
                    busy += elapsed;
                    ran += 1;
                }
                None => cancelled += 1,
            }
            let index = store
                .position(outcome.segment.id)
                .unwrap_or(outcome.index);
            store.segments[index] = outcome.segment;
        }

        if cancelled > 0 {
            warn!("Cancelled: {} segments were not processed", cancelled);
        }

        let timing = PassTiming {
            cancelled,
            total_time: start_time.elapsed(),
            avg_segment_time: if ran > 0 { busy / ran } else { Duration::ZERO },
        };
        (store, timing)
    }
}

/// Source text of the neighbours of the segment at `index`.
fn source_context(store: &SegmentStore, index: usize) -> Context {
    let text_of = |s: &Segment| {
        let t = s.original_text.trim();
        (!t.is_empty()).then(|| t.to_string())
    };
    let before = index
        .checked_sub(1)
        .and_then(|i| store.segments.get(i))
        .and_then(text_of);
    let after = store.segments.get(index + 1).and_then(text_of);
    (before, after)
}
