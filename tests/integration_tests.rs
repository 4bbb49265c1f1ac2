//! Integration tests for dubsync
//!
//! These tests drive the stages end to end with scripted providers, so they
//! need neither API keys nor network access. Tests that render video skip
//! themselves when ffmpeg is not installed.

use async_trait::async_trait;
use dubsync::audio::{read_mono, write_pcm16, AudioAssembler, AudioConfig, SlotKind};
use dubsync::config::Config;
use dubsync::error::{DubError, Result};
use dubsync::matcher::{segment_audio_path, DurationMatcher, MatchConfig, MatchOrchestrator};
use dubsync::rewrite::{Directive, RewriteRequest, TextRewriter};
use dubsync::segment::{GenerationArchive, Segment, SegmentStatus, SegmentStore, Stage};
use dubsync::synth::{SpeechSynthesizer, Synthesis, SynthesisRequest};
use dubsync::timing::{adjust_timing, clean_segments, correct_timestamps, TimingConfig};
use dubsync::video::{plan_alignment, VideoConfig};

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

const RATE: u32 = 24_000;

/// Synthesizes silence whose length is looked up by text.
struct ScriptedSynth {
    durations: HashMap<String, f64>,
}

impl ScriptedSynth {
    fn new(entries: &[(&str, f64)]) -> Self {
        Self {
            durations: entries.iter().map(|(t, d)| (t.to_string(), *d)).collect(),
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for ScriptedSynth {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<Synthesis> {
        let duration = *self
            .durations
            .get(&request.text)
            .ok_or_else(|| DubError::ProviderFailure(format!("unscripted text: {}", request.text)))?;
        let samples = (duration * RATE as f64).round() as usize;
        write_pcm16(&request.output, &vec![0u8; samples * 2], RATE)?;
        Ok(Synthesis {
            path: request.output.clone(),
            duration: samples as f64 / RATE as f64,
            sample_rate: RATE,
        })
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

/// Translates by uppercasing and answers corrections from a queue.
struct ScriptedRewriter {
    corrections: Mutex<Vec<String>>,
    directives: Mutex<Vec<Directive>>,
}

impl ScriptedRewriter {
    fn new(corrections: &[&str]) -> Self {
        Self {
            corrections: Mutex::new(corrections.iter().rev().map(|s| s.to_string()).collect()),
            directives: Mutex::new(Vec::new()),
        }
    }

    fn directives(&self) -> Vec<Directive> {
        self.directives.lock().unwrap().clone()
    }
}

#[async_trait]
impl TextRewriter for ScriptedRewriter {
    async fn rewrite(&self, request: &RewriteRequest) -> Result<String> {
        self.directives.lock().unwrap().push(request.directive);
        if request.directive == Directive::Initial {
            return Ok(request.text.to_uppercase());
        }
        self.corrections
            .lock()
            .unwrap()
            .pop()
            .ok_or_else(|| DubError::ProviderFailure("no more rewrites".to_string()))
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

fn orchestrator(
    dir: &TempDir,
    synth: ScriptedSynth,
    rewriter: Arc<ScriptedRewriter>,
) -> MatchOrchestrator {
    let matcher = DurationMatcher::new(
        Arc::new(synth),
        rewriter,
        MatchConfig::default(),
        dir.path(),
        "es",
    );
    MatchOrchestrator::new(Arc::new(matcher), 2).with_progress(false)
}

// ============================================================================
// Timing stages
// ============================================================================

mod timing_tests {
    use super::*;

    fn raw_transcript() -> SegmentStore {
        SegmentStore::new(vec![
            Segment::new(0, 0.35, 2.1, "  Hello everyone, and welcome back ."),
            Segment::new(1, 2.0, 2.3, "So"),
            Segment::new(2, 2.4, 5.8, "today we are looking at timing,"),
            Segment::new(3, 8.0, 10.5, "which matters more than you think."),
        ])
        .with_source_duration(12.0)
    }

    #[test]
    fn test_stage_chain_keeps_timeline_consistent() {
        let config = TimingConfig::default();
        let store = correct_timestamps(raw_transcript(), &config).unwrap();
        assert_eq!(store.stage, Stage::Corrected);
        assert_eq!(store.segments[0].start_time, 0.0);

        let store = clean_segments(store, &config);
        let store = adjust_timing(store, &config).unwrap();
        assert_eq!(store.stage, Stage::Adjusted);
        assert_eq!(store.generation, 3);

        for (index, seg) in store.segments.iter().enumerate() {
            assert_eq!(seg.id, index as u32);
            assert!(seg.end_time >= seg.start_time);
            assert!(!seg.original_text.starts_with(' '));
        }
        for pair in store.segments.windows(2) {
            assert!(pair[0].end_time <= pair[1].start_time);
        }

        // The short "So" segment was folded into a neighbour.
        assert_eq!(store.len(), 3);
        assert!(store.segments.iter().all(|s| s.original_text != "So"));

        let first = store.segments.first().unwrap().start_time;
        let last = store.segments.last().unwrap().end_time;
        let durations: f64 = store.segments.iter().map(|s| s.original_duration).sum();
        let gaps: f64 = store
            .segments
            .windows(2)
            .map(|pair| pair[1].start_time - pair[0].end_time)
            .sum();
        assert!((durations + gaps - (last - first)).abs() < 1e-9);

        // The long pause before the last segment survives.
        let pause = store.segments[2].start_time - store.segments[1].end_time;
        assert!((pause - 2.2).abs() < 1e-6);
    }

    #[test]
    fn test_cleaner_is_idempotent() {
        let config = TimingConfig::default();
        let corrected = correct_timestamps(raw_transcript(), &config).unwrap();
        let once = clean_segments(corrected, &config);
        let twice = clean_segments(once.clone(), &config);

        assert_eq!(once.segments, twice.segments);
        assert_eq!(twice.generation, once.generation + 1);
    }

    #[test]
    fn test_unordered_input_is_rejected() {
        let store = SegmentStore::new(vec![
            Segment::new(0, 3.0, 4.0, "second thing said"),
            Segment::new(1, 1.0, 2.0, "first thing said"),
        ]);
        let result = correct_timestamps(store, &TimingConfig::default());
        assert!(matches!(result, Err(DubError::Config(_))));
    }
}

// ============================================================================
// Duration matching
// ============================================================================

mod matching_tests {
    use super::*;

    fn three_segments() -> SegmentStore {
        SegmentStore::new(vec![
            Segment::new(0, 0.0, 2.0, "uno").with_translation("UNO"),
            Segment::new(1, 2.0, 5.0, "dos").with_translation("DOS"),
            Segment::new(2, 5.0, 7.0, "tres").with_translation("TRES"),
        ])
        .advance(Stage::Translated)
    }

    #[tokio::test]
    async fn test_single_reduction_converges() {
        let dir = TempDir::new().unwrap();
        let synth = ScriptedSynth::new(&[
            ("UNO", 2.0),
            ("DOS", 4.5),
            ("DOS CORTO", 3.1),
            ("TRES", 2.0),
        ]);
        let rewriter = Arc::new(ScriptedRewriter::new(&["DOS CORTO"]));
        let orchestrator = orchestrator(&dir, synth, rewriter.clone());

        let (store, stats) = orchestrator.match_all(three_segments()).await.unwrap();

        assert_eq!(store.stage, Stage::Matched);
        assert_eq!(stats.matched, 3);
        assert_eq!(rewriter.directives(), vec![Directive::Reduce]);

        let seg = store.get(1).unwrap();
        assert_eq!(seg.status, SegmentStatus::Matched);
        assert_eq!(seg.correction_attempts, 1);
        assert_eq!(seg.translated_text, "DOS CORTO");
        assert_eq!(seg.tts_duration, Some(3.1));
        assert_eq!(
            seg.tts_audio_path.as_deref(),
            Some(segment_audio_path(dir.path(), 1).as_path())
        );
        assert_eq!(store.get(0).unwrap().correction_attempts, 0);
    }

    #[tokio::test]
    async fn test_exhausted_segment_keeps_closest_attempt() {
        let dir = TempDir::new().unwrap();
        let synth = ScriptedSynth::new(&[
            ("UNO", 2.0),
            ("DOS", 4.5),
            ("DOS B", 3.4),
            ("DOS C", 3.6),
            ("TRES", 2.0),
        ]);
        let rewriter = Arc::new(ScriptedRewriter::new(&["DOS B", "DOS C"]));
        let orchestrator = orchestrator(&dir, synth, rewriter.clone());

        let (store, stats) = orchestrator.match_all(three_segments()).await.unwrap();
        assert_eq!(stats.exhausted, 1);

        let seg = store.get(1).unwrap();
        assert_eq!(seg.status, SegmentStatus::Exhausted);
        assert_eq!(seg.correction_attempts, 2);
        assert_eq!(seg.translated_text, "DOS B");
        assert_eq!(seg.tts_duration, Some(3.4));
        assert_eq!(store.unconverged(), vec![1]);

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains("attempt"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_translate_then_match() {
        let dir = TempDir::new().unwrap();
        let synth = ScriptedSynth::new(&[("HOLA", 1.0), ("ADIOS", 1.05)]);
        let rewriter = Arc::new(ScriptedRewriter::new(&[]));
        let orchestrator = orchestrator(&dir, synth, rewriter.clone());

        let store = SegmentStore::new(vec![
            Segment::new(0, 0.0, 1.0, "hola"),
            Segment::new(1, 1.5, 2.5, "adios"),
        ])
        .advance(Stage::Adjusted);

        let (store, stats) = orchestrator.translate_all(store).await.unwrap();
        assert_eq!(stats.translated, 2);
        assert_eq!(store.stage, Stage::Translated);
        assert_eq!(store.target_language.as_deref(), Some("es"));

        let (store, _) = orchestrator.match_all(store).await.unwrap();
        assert_eq!(store.count_status(SegmentStatus::Matched), 2);
        assert!(rewriter
            .directives()
            .iter()
            .all(|d| *d == Directive::Initial));
    }
}

// ============================================================================
// Assembly and alignment planning
// ============================================================================

mod render_tests {
    use super::*;

    #[tokio::test]
    async fn test_assembled_track_drives_the_frame_plan() {
        let dir = TempDir::new().unwrap();
        let tts_dir = dir.path().join("tts");
        std::fs::create_dir_all(&tts_dir).unwrap();

        let synth = ScriptedSynth::new(&[("UNO", 2.0), ("DOS", 3.25), ("TRES", 1.5)]);
        let matcher = DurationMatcher::new(
            Arc::new(synth),
            Arc::new(ScriptedRewriter::new(&[])),
            MatchConfig {
                tolerance: 0.10,
                max_attempts: 1,
            },
            &tts_dir,
            "es",
        );
        let orchestrator = MatchOrchestrator::new(Arc::new(matcher), 1).with_progress(false);

        let store = SegmentStore::new(vec![
            Segment::new(0, 0.0, 2.0, "uno").with_translation("UNO"),
            Segment::new(1, 3.0, 6.0, "dos").with_translation("DOS"),
            Segment::new(2, 6.0, 8.0, "tres").with_translation("TRES"),
        ])
        .with_source_duration(9.0)
        .advance(Stage::Translated);

        let (store, _) = orchestrator.match_all(store).await.unwrap();
        assert_eq!(store.get(2).unwrap().status, SegmentStatus::Exhausted);

        let (store, audio) = AudioAssembler::new(AudioConfig::default())
            .assemble(store, &dir.path().join("output"))
            .unwrap();
        assert_eq!(store.stage, Stage::Assembled);

        // 2.0 + 1.0 gap + 3.25 + 2.0 (short clip keeps its window) + 1.0 tail
        let expected = 9.25;
        assert!((audio.timeline.duration() - expected).abs() <= 1.0 / RATE as f64);
        let mono = read_mono(&audio.mono).unwrap();
        assert_eq!(mono.samples.len() as u64, audio.timeline.total_samples());

        for fps in [24.0, 25.0, 30.0] {
            let config = VideoConfig {
                fps,
                ..Default::default()
            };
            let plan = plan_alignment(&audio.timeline, &config);
            assert_eq!(
                plan.total_frames(),
                (audio.timeline.duration() * fps).round() as u64
            );
            let slowed = plan
                .pieces
                .iter()
                .find(|p| p.kind == SlotKind::Segment(1))
                .unwrap();
            assert!((slowed.stretch_factor - 3.25 / 3.0).abs() < 1e-9);
            assert!(plan.issues.is_empty());
        }
    }
}

// ============================================================================
// Generations and configuration
// ============================================================================

mod archive_tests {
    use super::*;

    #[test]
    fn test_generations_round_trip_through_archive() {
        let dir = TempDir::new().unwrap();
        let archive = GenerationArchive::open(dir.path().join("generations")).unwrap();

        let transcribed = SegmentStore::new(vec![
            Segment::new(0, 0.0, 1.5, "first line"),
            Segment::new(1, 2.0, 4.25, "second line"),
        ])
        .with_language("en");
        archive.save(&transcribed).unwrap();

        let corrected = correct_timestamps(transcribed.clone(), &TimingConfig::default()).unwrap();
        archive.save(&corrected).unwrap();

        let listed = archive.list().unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].1, Stage::Transcribed);

        let latest = archive.latest().unwrap();
        assert_eq!(latest.stage, Stage::Corrected);
        assert_eq!(latest.generation, 1);
        assert_eq!(latest.language.as_deref(), Some("en"));

        let first = archive.load(Stage::Transcribed).unwrap();
        assert_eq!(first.segments[1].original_text, "second line");
        assert_eq!(first.segments[1].end_time, 4.25);

        assert!(matches!(
            archive.load(Stage::Matched),
            Err(DubError::StageNotFound(_))
        ));
    }

    #[test]
    fn test_default_settings_are_valid() {
        let config = Config::default();
        assert!(config.validate_settings().is_ok());
        assert_eq!(config.matching.max_attempts, 3);
    }
}

// ============================================================================
// Video rendering (requires ffmpeg)
// ============================================================================

mod video_tests {
    use super::*;
    use dubsync::media;
    use dubsync::video::VideoAligner;
    use std::path::Path;
    use std::process::Command;

    fn make_source(path: &Path, seconds: f64) -> bool {
        Command::new("ffmpeg")
            .arg("-y")
            .arg("-loglevel")
            .arg("error")
            .arg("-f")
            .arg("lavfi")
            .arg("-i")
            .arg(format!("testsrc=size=160x120:rate=25:duration={seconds}"))
            .arg("-f")
            .arg("lavfi")
            .arg("-i")
            .arg(format!("sine=frequency=440:duration={seconds}"))
            .arg("-pix_fmt")
            .arg("yuv420p")
            .arg("-shortest")
            .arg(path)
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    #[test]
    fn test_aligned_video_matches_audio_length() {
        if !media::is_available() {
            eprintln!("Skipping test: ffmpeg not available");
            return;
        }

        let dir = TempDir::new().unwrap();
        let source = dir.path().join("source.mp4");
        if !make_source(&source, 4.0) {
            eprintln!("Skipping test: could not generate a test clip");
            return;
        }

        let clip = dir.path().join("segment_0000.wav");
        write_pcm16(&clip, &vec![0u8; RATE as usize * 3 * 2], RATE).unwrap();
        let mut first = Segment::new(0, 0.0, 2.0, "uno");
        first.tts_duration = Some(3.0);
        first.tts_audio_path = Some(clip);
        let store = SegmentStore::new(vec![first, Segment::new(1, 2.0, 4.0, "dos")])
            .with_source_duration(4.0)
            .advance(Stage::Matched);

        let (store, audio) = AudioAssembler::new(AudioConfig::default())
            .assemble(store, dir.path())
            .unwrap();

        let output = dir.path().join("dubbed.mp4");
        let (store, video) = VideoAligner::new(VideoConfig::default())
            .with_progress(false)
            .align(store, &source, &audio, &output)
            .unwrap();

        assert_eq!(store.stage, Stage::Aligned);
        assert!(output.exists());
        assert!(video.frames.abs_diff(125) <= 1);
        assert!((store.segments[0].stretch_factor.unwrap() - 1.5).abs() < 1e-9);
        assert!((media::media_duration(&output).unwrap() - 5.0).abs() < 0.1);
    }
}
