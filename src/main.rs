use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use console::style;
use dubsync::config::Config;
use dubsync::media::Resampler;
use dubsync::pipeline::{self, PipelineConfig};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "dubsync")]
#[command(version, about = "Re-dub a video into another language, keeping it in sync")]
#[command(
    long_about = "Transcribe a video, translate it, fit the synthesized speech to the original segment timing and time-warp the video onto the new audio."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Dub a video end to end
    Run {
        /// Input video file
        input: PathBuf,

        /// Working directory for generations and intermediate audio
        #[arg(short, long)]
        work_dir: Option<PathBuf>,

        /// Target language code (e.g., es, fr, de)
        #[arg(short, long)]
        target_language: String,

        /// Source language code, when known
        #[arg(short = 'l', long)]
        source_language: Option<String>,

        /// Names and terms to help transcription spell them (comma-separated)
        #[arg(short, long)]
        keywords: Option<String>,

        /// Keep the configured start offset instead of detecting where speech begins
        #[arg(long)]
        no_vad: bool,

        #[command(flatten)]
        providers: ProviderArgs,

        #[command(flatten)]
        render: RenderArgs,
    },

    /// Regenerate a single segment from the latest generation
    Rematch {
        /// Segment id
        id: u32,

        #[arg(short, long)]
        work_dir: PathBuf,

        /// Target language code (defaults to the one stored in the generation)
        #[arg(short, long)]
        target_language: Option<String>,

        #[command(flatten)]
        providers: ProviderArgs,
    },

    /// Rebuild the dubbed audio and video from the latest generation
    Reassemble {
        /// The original input video
        input: PathBuf,

        #[arg(short, long)]
        work_dir: PathBuf,

        #[command(flatten)]
        render: RenderArgs,
    },

    /// Print the report of a run
    Report {
        #[arg(short, long)]
        work_dir: PathBuf,
    },
}

#[derive(Args)]
struct ProviderArgs {
    /// Speech synthesizer: openai, elevenlabs
    #[arg(long)]
    tts: Option<String>,

    /// Text rewriter: openai, gemini
    #[arg(long)]
    rewriter: Option<String>,

    /// Number of segments processed concurrently
    #[arg(short, long)]
    concurrency: Option<usize>,

    /// Accepted relative duration deviation (e.g., 0.1)
    #[arg(long)]
    tolerance: Option<f64>,

    /// Synthesis attempts per segment
    #[arg(long)]
    max_attempts: Option<u32>,
}

#[derive(Args)]
struct RenderArgs {
    /// Clip to play before the dubbed video
    #[arg(long)]
    intro: Option<PathBuf>,

    /// Clip to play after the dubbed video
    #[arg(long)]
    outro: Option<PathBuf>,

    /// Output frame rate
    #[arg(long)]
    fps: Option<f64>,

    /// Frame resampler: drop, blend, minterpolate
    #[arg(long)]
    resampler: Option<String>,

    /// Output video file
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn init_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };

    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();
}

fn apply_provider_args(config: &mut Config, args: &ProviderArgs) -> Result<()> {
    if let Some(ref tts) = args.tts {
        config.tts_provider = tts.parse().map_err(|e: String| anyhow::anyhow!(e))?;
    }
    if let Some(ref rewriter) = args.rewriter {
        config.rewriter = rewriter.parse().map_err(|e: String| anyhow::anyhow!(e))?;
    }
    if let Some(concurrency) = args.concurrency {
        config.concurrency = concurrency;
    }
    if let Some(tolerance) = args.tolerance {
        config.matching.tolerance = tolerance;
    }
    if let Some(max_attempts) = args.max_attempts {
        config.matching.max_attempts = max_attempts;
    }
    Ok(())
}

fn apply_render_args(config: &mut Config, args: &RenderArgs) -> Result<()> {
    if let Some(fps) = args.fps {
        config.video.fps = fps;
    }
    if let Some(ref resampler) = args.resampler {
        config.video.resampler = resampler
            .parse::<Resampler>()
            .map_err(|e: String| anyhow::anyhow!(e))?;
    }
    Ok(())
}

fn derive_work_dir(input: &Path) -> PathBuf {
    let stem = input.file_stem().unwrap_or_default();
    let mut work_dir = input.to_path_buf();
    work_dir.set_file_name(format!("{}_dub", stem.to_string_lossy()));
    work_dir
}

fn install_cancel_handler() -> Result<Arc<AtomicBool>> {
    let cancelled = Arc::new(AtomicBool::new(false));
    let flag = cancelled.clone();
    ctrlc::set_handler(move || {
        if flag.swap(true, Ordering::SeqCst) {
            std::process::exit(130);
        }
        eprintln!(
            "\n{} Finishing in-flight segments, press Ctrl+C again to abort",
            style("!").yellow()
        );
    })
    .context("Failed to install Ctrl+C handler")?;
    Ok(cancelled)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let mut config = Config::load().context("Failed to load configuration")?;

    match cli.command {
        Command::Run {
            input,
            work_dir,
            target_language,
            source_language,
            keywords,
            no_vad,
            providers,
            render,
        } => {
            if !input.exists() {
                anyhow::bail!("Input file not found: {}", input.display());
            }

            if keywords.is_some() {
                config.transcription_keywords = keywords;
            }
            if no_vad {
                config.vad.enabled = false;
            }

            apply_provider_args(&mut config, &providers)?;
            apply_render_args(&mut config, &render)?;
            config
                .validate()
                .context("Configuration validation failed")?;

            let work_dir = work_dir.unwrap_or_else(|| derive_work_dir(&input));
            info!("Input:    {}", input.display());
            info!("Work dir: {}", work_dir.display());
            info!("Target:   {}", target_language);
            info!("Voice:    {}", config.tts_provider);
            info!("Rewriter: {}", config.rewriter);

            let pipeline_config = PipelineConfig {
                target_language,
                source_language,
                intro: render.intro,
                outro: render.outro,
                output: render.output,
                show_progress: true,
            };

            let cancelled = install_cancel_handler()?;
            let result = pipeline::run(&input, &work_dir, &config, &pipeline_config, cancelled)
                .await
                .context("Dubbing failed")?;
            pipeline::print_summary(&result);
        }

        Command::Rematch {
            id,
            work_dir,
            target_language,
            providers,
        } => {
            apply_provider_args(&mut config, &providers)?;
            config
                .validate_providers()
                .context("Configuration validation failed")?;

            let store = pipeline::rematch(&work_dir, id, &config, target_language.as_deref())
                .await
                .with_context(|| format!("Failed to regenerate segment {}", id))?;

            if let Some(segment) = store.get(id) {
                println!();
                println!("  Segment {}: {}", id, style(segment.status).bold());
                println!("  Text:     {}", segment.translated_text);
                println!(
                    "  Duration: {:.3}s for a {:.3}s window ({} rewrites)",
                    segment.tts_duration.unwrap_or_default(),
                    segment.original_duration,
                    segment.correction_attempts
                );
                println!();
                println!(
                    "  Run {} to rebuild the video.",
                    style("dubsync reassemble").cyan()
                );
            }
        }

        Command::Reassemble {
            input,
            work_dir,
            render,
        } => {
            apply_render_args(&mut config, &render)?;
            config
                .validate_settings()
                .context("Configuration validation failed")?;

            let pipeline_config = PipelineConfig {
                intro: render.intro,
                outro: render.outro,
                output: render.output,
                ..Default::default()
            };
            let result = pipeline::reassemble(&input, &work_dir, &config, &pipeline_config)
                .context("Reassembly failed")?;
            pipeline::print_summary(&result);
        }

        Command::Report { work_dir } => {
            let report = pipeline::load_report(&work_dir).context("Failed to load report")?;
            report.print();
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_work_dir() {
        let input = PathBuf::from("/path/to/video.mp4");
        assert_eq!(derive_work_dir(&input), PathBuf::from("/path/to/video_dub"));
    }

    #[test]
    fn test_cli_parses_run() {
        let cli = Cli::try_parse_from([
            "dubsync",
            "run",
            "talk.mp4",
            "--target-language",
            "fr",
            "--tts",
            "elevenlabs",
            "--tolerance",
            "0.05",
            "--intro",
            "intro.mp4",
        ])
        .unwrap();

        match cli.command {
            Command::Run {
                target_language,
                providers,
                render,
                ..
            } => {
                assert_eq!(target_language, "fr");
                assert_eq!(providers.tts.as_deref(), Some("elevenlabs"));
                assert_eq!(providers.tolerance, Some(0.05));
                assert_eq!(render.intro, Some(PathBuf::from("intro.mp4")));
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_cli_parses_transcription_options() {
        let cli = Cli::try_parse_from([
            "dubsync",
            "run",
            "talk.mp4",
            "-t",
            "es",
            "--keywords",
            "Kubernetes, Xóchitl",
            "--no-vad",
        ])
        .unwrap();

        match cli.command {
            Command::Run {
                keywords, no_vad, ..
            } => {
                assert_eq!(keywords.as_deref(), Some("Kubernetes, Xóchitl"));
                assert!(no_vad);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_provider_args_override_config() {
        let mut config = Config::default();
        let args = ProviderArgs {
            tts: Some("elevenlabs".to_string()),
            rewriter: None,
            concurrency: Some(8),
            tolerance: None,
            max_attempts: Some(5),
        };
        apply_provider_args(&mut config, &args).unwrap();
        assert_eq!(config.concurrency, 8);
        assert_eq!(config.matching.max_attempts, 5);
        assert_eq!(config.tts_provider.to_string(), "elevenlabs");

        let bad = ProviderArgs {
            tts: Some("polly".to_string()),
            rewriter: None,
            concurrency: None,
            tolerance: None,
            max_attempts: None,
        };
        assert!(apply_provider_args(&mut config, &bad).is_err());
    }
}
