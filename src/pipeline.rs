use crate::audio::{detect_speech_start, AssembledAudio, AudioAssembler};
use crate::config::Config;
use crate::error::{DubError, Result};
use crate::matcher::{segment_audio_path, DurationMatcher, MatchOrchestrator};
use crate::media;
use crate::report::DubReport;
use crate::rewrite::create_rewriter;
use crate::segment::{GenerationArchive, SegmentStore, Stage};
use crate::synth::create_synthesizer;
use crate::timing::{adjust_timing, clean_segments, correct_timestamps, TimingConfig};
use crate::transcribe::{transcribe_audio, WhisperClient};
use crate::video::{AlignedVideo, VideoAligner};
use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tracing::{debug, info, warn};

const TOTAL_STAGES: usize = 8;

/// Per-run options that do not belong in the persistent configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Target language code (e.g. "es").
    pub target_language: String,
    /// Source language hint for transcription.
    pub source_language: Option<String>,
    /// Clip played before the dubbed body.
    pub intro: Option<PathBuf>,
    /// Clip played after the dubbed body.
    pub outro: Option<PathBuf>,
    /// Final video path; defaults to `<work_dir>/output/<stem>_dubbed.mp4`.
    pub output: Option<PathBuf>,
    /// Show progress bars.
    pub show_progress: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            target_language: "es".to_string(),
            source_language: None,
            intro: None,
            outro: None,
            output: None,
            show_progress: true,
        }
    }
}

/// Layout of a run's working directory.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn generations_dir(&self) -> PathBuf {
        self.root.join("generations")
    }

    /// Where promoted per-segment clips live.
    pub fn audio_dir(&self) -> PathBuf {
        self.root.join("tts")
    }

    pub fn output_dir(&self) -> PathBuf {
        self.root.join("output")
    }

    pub fn report_path(&self) -> PathBuf {
        self.root.join("report.json")
    }

    pub fn default_output(&self, input: &Path) -> PathBuf {
        let stem = input.file_stem().unwrap_or_default().to_string_lossy();
        self.output_dir().join(format!("{}_dubbed.mp4", stem))
    }

    pub fn archive(&self) -> Result<GenerationArchive> {
        GenerationArchive::open(self.generations_dir())
    }
}

/// Statistics from a pipeline run.
#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    pub total_time: Duration,
    pub transcription_time: Duration,
    pub matching_time: Duration,
    pub render_time: Duration,
    pub segments: usize,
    pub source_duration: Option<f64>,
    pub synthesizer: String,
}

#[derive(Debug)]
pub struct PipelineResult {
    pub output_path: PathBuf,
    pub audio: AssembledAudio,
    pub report: DubReport,
    pub stats: PipelineStats,
}

fn spinner(multi_progress: Option<&MultiProgress>, message: &str) -> Option<ProgressBar> {
    multi_progress.map(|mp| {
        let pb = mp.add(ProgressBar::new_spinner());
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.set_message(message.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    })
}

fn finish(pb: Option<ProgressBar>, message: String) {
    if let Some(pb) = pb {
        pb.finish_with_message(format!("✓ {}", message));
    }
}

fn check_cancelled(cancelled: &AtomicBool) -> Result<()> {
    if cancelled.load(Ordering::Relaxed) {
        return Err(DubError::Cancelled);
    }
    Ok(())
}

fn save(archive: &GenerationArchive, store: &SegmentStore) -> Result<()> {
    let path = archive.save(store)?;
    debug!("Generation {} ({}) saved to {:?}", store.generation, store.stage, path);
    Ok(())
}

fn build_matcher(config: &Config, workspace: &Workspace, target_language: &str) -> Result<DurationMatcher> {
    let synthesizer = create_synthesizer(config)?;
    let rewriter = create_rewriter(config)?;
    Ok(DurationMatcher::new(
        Arc::from(synthesizer),
        Arc::from(rewriter),
        config.matching.clone(),
        workspace.audio_dir(),
        target_language,
    ))
}

/// Find where speech begins in the extracted track. Detection problems are not fatal.
fn find_speech_start(config: &Config, speech: &Path, temp_dir: &Path) -> Option<f64> {
    if !config.vad.enabled {
        return None;
    }

    let wav = temp_dir.join("speech.wav");
    let detected = media::convert_to_wav(speech, &wav, 16_000)
        .and_then(|_| detect_speech_start(&wav, &config.vad));
    match detected {
        Ok(start) => start,
        Err(e) => {
            warn!("Speech start detection failed: {}", e);
            None
        }
    }
}

/// Timing settings anchored at the detected speech start, unless an offset is configured.
fn anchored_timing(timing: &TimingConfig, speech_start: Option<f64>) -> TimingConfig {
    let mut timing = timing.clone();
    match speech_start {
        Some(start) if timing.start_offset <= 0.0 && start > 0.0 => {
            info!("Speech starts at {:.3}s; anchoring the first segment there", start);
            timing.start_offset = start;
        }
        _ => {}
    }
    timing
}

/// Dub `input` end to end, persisting every generation under `work_dir`.
pub async fn run(
    input: &Path,
    work_dir: &Path,
    config: &Config,
    pipeline_config: &PipelineConfig,
    cancelled: Arc<AtomicBool>,
) -> Result<PipelineResult> {
    let start_time = Instant::now();

    if !input.exists() {
        return Err(DubError::FileNotFound(input.display().to_string()));
    }

    media::check_ffmpeg().map_err(|_| {
        DubError::Media(
            "FFmpeg not found. Install it with: brew install ffmpeg (macOS) or apt install ffmpeg (Linux)".to_string(),
        )
    })?;

    let workspace = Workspace::new(work_dir);
    let archive = workspace.archive()?;
    std::fs::create_dir_all(workspace.audio_dir())?;

    let temp_dir = TempDir::new()?;
    debug!("Using temp directory: {:?}", temp_dir.path());

    let multi_progress = pipeline_config.show_progress.then(MultiProgress::new);

    // Stage 1: transcription
    info!("Stage 1/{}: Transcribing {:?}", TOTAL_STAGES, input);
    let transcription_start = Instant::now();
    let pb = spinner(multi_progress.as_ref(), "Extracting and transcribing speech...");

    let speech = temp_dir.path().join("speech.mp3");
    let duration = media::extract_speech_audio(input, &speech)?;

    let api_key = config.openai_api_key.clone().ok_or_else(|| {
        DubError::Config("OpenAI API key not set. Set OPENAI_API_KEY environment variable.".to_string())
    })?;
    let mut whisper = WhisperClient::new(api_key);
    if let Some(ref language) = pipeline_config.source_language {
        whisper = whisper.with_language(language.clone());
    }
    if let Some(ref keywords) = config.transcription_keywords {
        whisper = whisper.with_prompt(keywords.clone());
    }
    let store = transcribe_audio(&whisper, &speech, duration, temp_dir.path()).await?;
    let timing = anchored_timing(
        &config.timing,
        find_speech_start(config, &speech, temp_dir.path()),
    );
    save(&archive, &store)?;

    finish(pb, format!("Transcribed {} segments ({:.1}s)", store.len(), duration));
    let transcription_time = transcription_start.elapsed();
    check_cancelled(&cancelled)?;

    // Stages 2-4: timing repair
    info!("Stage 2/{}: Correcting timestamps", TOTAL_STAGES);
    let store = correct_timestamps(store, &timing)?;
    save(&archive, &store)?;

    info!("Stage 3/{}: Cleaning segments", TOTAL_STAGES);
    let store = clean_segments(store, &config.timing);
    save(&archive, &store)?;

    info!("Stage 4/{}: Adjusting timing", TOTAL_STAGES);
    let store = adjust_timing(store, &config.timing)?;
    save(&archive, &store)?;
    check_cancelled(&cancelled)?;

    if store.is_empty() {
        return Err(DubError::Media("No speech found in the input".to_string()));
    }

    // Stages 5-6: translation and duration matching
    let matcher = Arc::new(build_matcher(config, &workspace, &pipeline_config.target_language)?);
    let orchestrator = MatchOrchestrator::new(matcher, config.concurrency)
        .with_progress(pipeline_config.show_progress)
        .with_cancel_flag(cancelled.clone());

    info!(
        "Stage 5/{}: Translating into {}",
        TOTAL_STAGES, pipeline_config.target_language
    );
    let matching_start = Instant::now();
    let (store, _) = orchestrator.translate_all(store).await?;
    save(&archive, &store)?;
    check_cancelled(&cancelled)?;

    info!(
        "Stage 6/{}: Matching durations with {} (concurrency: {})",
        TOTAL_STAGES, config.tts_provider, config.concurrency
    );
    let (store, match_stats) = orchestrator.match_all(store).await?;
    save(&archive, &store)?;
    let matching_time = matching_start.elapsed();
    check_cancelled(&cancelled)?;

    debug!(
        "{} matched, {} exhausted, {} failed",
        match_stats.matched, match_stats.exhausted, match_stats.failed
    );

    // Stages 7-8: rendering
    let render_start = Instant::now();
    let output = pipeline_config
        .output
        .clone()
        .unwrap_or_else(|| workspace.default_output(input));
    let (store, audio, video) = render(
        store,
        input,
        &workspace,
        &archive,
        config,
        pipeline_config,
        multi_progress.as_ref(),
        &output,
        7,
    )?;
    let render_time = render_start.elapsed();

    let report = write_report(&workspace, &store, &audio, &video)?;

    Ok(PipelineResult {
        output_path: output,
        report,
        stats: PipelineStats {
            total_time: start_time.elapsed(),
            transcription_time,
            matching_time,
            render_time,
            segments: store.len(),
            source_duration: Some(duration),
            synthesizer: config.tts_provider.to_string(),
        },
        audio,
    })
}

/// Assemble the audio and align the video, saving both generations.
#[allow(clippy::too_many_arguments)]
fn render(
    store: SegmentStore,
    input: &Path,
    workspace: &Workspace,
    archive: &GenerationArchive,
    config: &Config,
    pipeline_config: &PipelineConfig,
    multi_progress: Option<&MultiProgress>,
    output: &Path,
    first_stage: usize,
) -> Result<(SegmentStore, AssembledAudio, AlignedVideo)> {
    info!("Stage {}/{}: Assembling audio", first_stage, TOTAL_STAGES);
    let pb = spinner(multi_progress, "Assembling dubbed audio...");
    let (store, audio) = AudioAssembler::new(config.audio.clone())
        .with_intro(pipeline_config.intro.clone())
        .with_outro(pipeline_config.outro.clone())
        .assemble(store, &workspace.output_dir())?;
    save(archive, &store)?;
    finish(pb, format!("Audio assembled ({:.1}s)", audio.timeline.duration()));

    info!("Stage {}/{}: Aligning video", first_stage + 1, TOTAL_STAGES);
    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let (store, video) = VideoAligner::new(config.video.clone())
        .with_intro(pipeline_config.intro.clone())
        .with_outro(pipeline_config.outro.clone())
        .with_progress(pipeline_config.show_progress)
        .align(store, input, &audio, output)?;
    save(archive, &store)?;

    Ok((store, audio, video))
}

fn write_report(
    workspace: &Workspace,
    store: &SegmentStore,
    audio: &AssembledAudio,
    video: &AlignedVideo,
) -> Result<DubReport> {
    let mut report = DubReport::from_store(store)
        .with_audio_duration(audio.timeline.duration())
        .with_output(&video.output);
    report.extend(video.issues.iter().cloned());
    report.save(&workspace.report_path())?;
    Ok(report)
}

/// Regenerate one segment of the latest matched (or later) generation.
pub async fn rematch(
    work_dir: &Path,
    id: u32,
    config: &Config,
    target_language: Option<&str>,
) -> Result<SegmentStore> {
    let workspace = Workspace::new(work_dir);
    let archive = workspace.archive()?;
    let store = archive.latest()?;

    if store.stage < Stage::Matched {
        return Err(DubError::StageNotFound(Stage::Matched.to_string()));
    }

    let language = target_language
        .map(str::to_string)
        .or_else(|| store.target_language.clone())
        .ok_or_else(|| DubError::Config("Target language unknown; pass --target-language".to_string()))?;

    let matcher = build_matcher(config, &workspace, &language)?;
    let store = matcher.rematch(store, id).await?;
    save(&archive, &store)?;

    if let Some(segment) = store.get(id) {
        info!(
            "Segment {} audio at {:?}",
            id,
            segment
                .tts_audio_path
                .clone()
                .unwrap_or_else(|| segment_audio_path(&workspace.audio_dir(), id))
        );
    }
    Ok(store)
}

/// Rebuild the audio and video from the latest matched (or later) generation.
pub fn reassemble(
    input: &Path,
    work_dir: &Path,
    config: &Config,
    pipeline_config: &PipelineConfig,
) -> Result<PipelineResult> {
    let start_time = Instant::now();
    if !input.exists() {
        return Err(DubError::FileNotFound(input.display().to_string()));
    }

    let workspace = Workspace::new(work_dir);
    let archive = workspace.archive()?;
    let store = archive.latest()?;
    if store.stage < Stage::Matched {
        return Err(DubError::StageNotFound(Stage::Matched.to_string()));
    }

    let multi_progress = pipeline_config.show_progress.then(MultiProgress::new);
    let output = pipeline_config
        .output
        .clone()
        .unwrap_or_else(|| workspace.default_output(input));
    let source_duration = store.source_duration;

    let (store, audio, video) = render(
        store,
        input,
        &workspace,
        &archive,
        config,
        pipeline_config,
        multi_progress.as_ref(),
        &output,
        7,
    )?;
    let report = write_report(&workspace, &store, &audio, &video)?;
    let elapsed = start_time.elapsed();

    Ok(PipelineResult {
        output_path: output,
        report,
        stats: PipelineStats {
            total_time: elapsed,
            render_time: elapsed,
            segments: store.len(),
            source_duration,
            synthesizer: config.tts_provider.to_string(),
            ..Default::default()
        },
        audio,
    })
}

/// The saved report, or one derived from the latest generation.
pub fn load_report(work_dir: &Path) -> Result<DubReport> {
    let workspace = Workspace::new(work_dir);
    let path = workspace.report_path();
    if path.exists() {
        return DubReport::load(&path);
    }

    warn!("No report.json in {}, summarizing the latest generation", work_dir.display());
    let store = workspace.archive()?.latest()?;
    Ok(DubReport::from_store(&store))
}

/// Print a summary of the pipeline results.
pub fn print_summary(result: &PipelineResult) {
    println!();
    println!("═══════════════════════════════════════════════════════════════");
    println!("                       Dubbing Complete                         ");
    println!("═══════════════════════════════════════════════════════════════");
    println!();
    println!("  Output:     {}", style(result.output_path.display()).bold());
    println!("  Audio:      {}", result.audio.stereo.display());
    println!("  Segments:   {}", result.stats.segments);
    println!("  Voice:      {}", result.stats.synthesizer);
    if let Some(duration) = result.stats.source_duration {
        println!(
            "  Duration:   {:.1}s source, {:.1}s dubbed",
            duration,
            result.audio.timeline.duration()
        );
    }
    println!();
    println!("  Timing:");
    if !result.stats.transcription_time.is_zero() {
        println!(
            "    Transcribe:  {:.2}s",
            result.stats.transcription_time.as_secs_f64()
        );
        println!(
            "    Match:       {:.2}s",
            result.stats.matching_time.as_secs_f64()
        );
    }
    println!(
        "    Render:      {:.2}s",
        result.stats.render_time.as_secs_f64()
    );
    println!(
        "    Total:       {:.2}s",
        result.stats.total_time.as_secs_f64()
    );

    result.report.print();
}
