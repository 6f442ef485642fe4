use std::path::{Path, PathBuf};

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use colored::Colorize;
use image::imageops::{self, FilterType};
use serde_json::json;
use sharpframe::sharpness;

#[cfg(feature = "ffmpeg")]
use std::{sync::Arc, time::Duration};

#[cfg(feature = "ffmpeg")]
use indicatif::{ProgressBar, ProgressStyle};
#[cfg(feature = "ffmpeg")]
use sharpframe::{
    AnalysisOptions, Analyzer, FfmpegLogLevel, FfmpegResource, FrameScore, LocalFocus,
    SharpframeError,
};
#[cfg(feature = "ffmpeg")]
use tokio_stream::StreamExt;

const CLI_AFTER_HELP: &str = "Examples:\n  sharpframe score shot1.jpg shot2.jpg --width 160\n  sharpframe scan input.mp4 --budget 300 --progress\n  sharpframe focus input.mp4 --center 1200 --radius 15 --json\n  sharpframe completions zsh > _sharpframe";

#[derive(Debug, Parser)]
#[command(
    name = "sharpframe",
    version,
    about = "Find the sharpest frames of a video or a set of images",
    after_help = CLI_AFTER_HELP
)]
struct Cli {
    #[command(flatten)]
    global: GlobalOptions,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Parser, Clone, Default)]
struct GlobalOptions {
    /// Show debug logging output.
    #[arg(long, global = true)]
    verbose: bool,

    /// Show a progress bar where supported.
    #[arg(long, global = true)]
    #[cfg_attr(not(feature = "ffmpeg"), allow(dead_code))]
    progress: bool,

    /// FFmpeg log level (quiet, panic, fatal, error, warning, info, verbose, debug, trace).
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Number of concurrent scoring workers.
    #[arg(long, global = true)]
    workers: Option<usize>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Score still images and rank them by sharpness.
    #[command(
        about = "Score still images",
        after_help = "Examples:\n  sharpframe score a.png b.png\n  sharpframe score burst/*.jpg --width 160 --json"
    )]
    Score {
        /// Image files to score.
        #[arg(required = true)]
        images: Vec<PathBuf>,

        /// Downscale to this width before scoring (keeps aspect ratio).
        #[arg(long)]
        width: Option<u32>,

        /// Output results as machine-readable JSON.
        #[arg(long)]
        json: bool,
    },

    /// Explore a whole video and report its sharpest frame.
    #[cfg(feature = "ffmpeg")]
    #[command(
        about = "Find the sharpest frame of a video",
        after_help = "Examples:\n  sharpframe scan input.mp4\n  sharpframe scan input.mp4 --budget 200 --json"
    )]
    Scan {
        /// Input video path.
        input: PathBuf,

        /// Stop after this many frames were analysed.
        #[arg(long)]
        budget: Option<u64>,

        /// Output results as machine-readable JSON.
        #[arg(long)]
        json: bool,
    },

    /// Analyse the frames around one frame and report the local best.
    #[cfg(feature = "ffmpeg")]
    #[command(
        about = "Score the neighbourhood of a frame",
        after_help = "Examples:\n  sharpframe focus input.mp4 --center 450\n  sharpframe focus input.mp4 --center 450 --radius 5 --json"
    )]
    Focus {
        /// Input video path.
        input: PathBuf,

        /// Frame to centre the window on (1-based).
        #[arg(long)]
        center: u64,

        /// Frames on each side of the centre.
        #[arg(long, default_value_t = 10)]
        radius: u64,

        /// Output results as machine-readable JSON.
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Target shell.
        shell: Shell,
    },
}

fn init_logging(global: &GlobalOptions) {
    let default_filter = if global.verbose { "debug" } else { "warn" };
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp(None)
        .try_init();
}

#[cfg(feature = "ffmpeg")]
fn parse_log_level(value: &str) -> Option<FfmpegLogLevel> {
    match value.to_ascii_lowercase().as_str() {
        "quiet" => Some(FfmpegLogLevel::Quiet),
        "panic" => Some(FfmpegLogLevel::Panic),
        "fatal" => Some(FfmpegLogLevel::Fatal),
        "error" => Some(FfmpegLogLevel::Error),
        "warning" | "warn" => Some(FfmpegLogLevel::Warning),
        "info" => Some(FfmpegLogLevel::Info),
        "verbose" => Some(FfmpegLogLevel::Verbose),
        "debug" => Some(FfmpegLogLevel::Debug),
        "trace" => Some(FfmpegLogLevel::Trace),
        _ => None,
    }
}

fn apply_global_options(global: &GlobalOptions) -> Result<(), Box<dyn std::error::Error>> {
    init_logging(global);

    #[cfg(feature = "ffmpeg")]
    if let Some(level) = &global.log_level {
        let parsed = parse_log_level(level).ok_or(format!("unsupported --log-level: {level}"))?;
        sharpframe::set_ffmpeg_log_level(parsed);
    }

    #[cfg(not(feature = "ffmpeg"))]
    if global.log_level.is_some() {
        eprintln!(
            "{} {}",
            "warning:".yellow().bold(),
            "--log-level requires building with the `ffmpeg` feature".yellow()
        );
    }

    if global.workers == Some(0) {
        return Err("--workers must be at least 1".into());
    }

    Ok(())
}

/// Load `path` and score it, downscaled to `width` when given.
fn score_path(path: &Path, width: Option<u32>) -> Result<(f64, u32, u32), Box<dyn std::error::Error>> {
    let mut image = image::open(path)?.to_rgba8();
    if let Some(target) = width.filter(|&target| target > 0 && target < image.width()) {
        let height = ((target as f64 * image.height() as f64 / image.width() as f64).floor() as u32).max(1);
        image = imageops::resize(&image, target, height, FilterType::Triangle);
    }
    let score = sharpness::try_score(image.as_raw(), image.width(), image.height())?;
    Ok((score, image.width(), image.height()))
}

fn score_images(
    images: &[PathBuf],
    width: Option<u32>,
    json: bool,
    verbose: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut results = Vec::with_capacity(images.len());
    for path in images {
        let (score, scored_width, scored_height) = score_path(path, width)?;
        if verbose {
            eprintln!("scored {} at {scored_width}x{scored_height}", path.display());
        }
        results.push((path, score, scored_width, scored_height));
    }
    results.sort_by(|a, b| b.1.total_cmp(&a.1));

    if json {
        let payload = json!({
            "images": results.iter().map(|(path, score, w, h)| json!({
                "path": path.display().to_string(),
                "score": score,
                "width": w,
                "height": h,
            })).collect::<Vec<_>>(),
            "sharpest": results.first().map(|(path, ..)| path.display().to_string()),
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(());
    }

    for (rank, (path, score, ..)) in results.iter().enumerate() {
        let line = format!("{score:>8.4}  {}", path.display());
        if rank == 0 {
            println!("{} {}", line.green().bold(), "(sharpest)".green());
        } else {
            println!("{line}");
        }
    }
    Ok(())
}

#[cfg(feature = "ffmpeg")]
fn analysis_options(global: &GlobalOptions) -> AnalysisOptions {
    let mut options = AnalysisOptions::new();
    if let Some(workers) = global.workers {
        options = options.with_workers(workers);
    }
    options
}

#[cfg(feature = "ffmpeg")]
fn progress_bar(total: u64, enabled: bool) -> Result<Option<ProgressBar>, Box<dyn std::error::Error>> {
    if !enabled {
        return Ok(None);
    }
    let bar = ProgressBar::new(total);
    let style = ProgressStyle::with_template("{spinner:.green} {bar:40.cyan/blue} {pos}/{len} {msg}")?;
    bar.set_style(style.progress_chars("##-"));
    Ok(Some(bar))
}

#[cfg(feature = "ffmpeg")]
fn frame_json(score: &FrameScore) -> serde_json::Value {
    json!({
        "frame": score.frame,
        "time_seconds": score.time,
        "score": score.score,
        "error": score.error,
    })
}

#[cfg(feature = "ffmpeg")]
async fn scan(
    input: &Path,
    budget: Option<u64>,
    json: bool,
    global: &GlobalOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let (resource, info) = FfmpegResource::open(input)?;
    if info.total_frames == 0 {
        return Err(format!("{} has no frames to analyse", input.display()).into());
    }
    let target = budget.map_or(info.total_frames, |budget| budget.min(info.total_frames));

    let analyzer = Analyzer::new(Arc::new(resource), info, analysis_options(global));
    let bar = progress_bar(target, global.progress)?;

    let mut updates = analyzer.updates();
    while let Some(progress) = updates.next().await {
        let analysed = progress.scored + progress.failed;
        if let Some(bar) = &bar {
            bar.set_position(analysed.min(target));
            bar.set_message(format!("{} failed", progress.failed));
        }
        if progress.idle || progress.cancelled {
            break;
        }
        if analysed >= target {
            analyzer.cancel()?;
        }
    }
    if let Some(bar) = bar {
        bar.finish_with_message("done");
    }

    let best = analyzer.overall_best().await?;
    let snapshot = analyzer.snapshot();
    analyzer.shutdown().await;

    if json {
        let payload = json!({
            "input": input.display().to_string(),
            "total_frames": info.total_frames,
            "frame_rate": info.frame_rate,
            "scored": snapshot.scored,
            "failed": snapshot.failed,
            "best": best.as_ref().map(frame_json),
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(());
    }

    match best {
        Some(best) => println!(
            "{} {}",
            "success:".green().bold(),
            format!(
                "Sharpest frame {} at {:.3}s (score {:.4}, {} of {} frames analysed)",
                best.frame,
                best.time,
                best.score.unwrap_or(0.0),
                snapshot.scored,
                info.total_frames
            )
            .green()
        ),
        None => println!(
            "{} {}",
            "warning:".yellow().bold(),
            "No frame could be scored".yellow()
        ),
    }
    Ok(())
}

#[cfg(feature = "ffmpeg")]
fn window_settled(focus: &LocalFocus) -> bool {
    focus
        .entries
        .iter()
        .all(|entry| !entry.pending && (entry.score.is_some() || entry.error))
}

#[cfg(feature = "ffmpeg")]
async fn focus(
    input: &Path,
    center: u64,
    radius: u64,
    json: bool,
    global: &GlobalOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let (resource, info) = FfmpegResource::open(input)?;
    if !info.contains(center) {
        return Err(SharpframeError::FrameOutOfRange {
            frame_number: center,
            total_frames: info.total_frames,
        }
        .into());
    }

    let analyzer = Analyzer::new(Arc::new(resource), info, analysis_options(global));
    analyzer.set_paused(true)?;
    let queued = analyzer.request_priority_analysis(center, radius).await?;
    let bar = progress_bar(queued as u64, global.progress)?;

    let mut updates = analyzer.subscribe();
    let window = loop {
        let window = analyzer.local_focus(center, radius).await?;
        if let Some(bar) = &bar {
            let done = window
                .entries
                .iter()
                .filter(|entry| entry.score.is_some() || entry.error)
                .count();
            bar.set_position(done as u64);
        }
        if window_settled(&window) {
            break window;
        }
        tokio::time::timeout(Duration::from_secs(10), updates.changed())
            .await
            .map_err(|_| "timed out waiting for frame analysis")?
            .map_err(|_| SharpframeError::SessionClosed)?;
    };
    if let Some(bar) = bar {
        bar.finish_with_message("done");
    }
    analyzer.shutdown().await;

    if json {
        let payload = json!({
            "input": input.display().to_string(),
            "center": center,
            "radius": radius,
            "best": window.best,
            "frames": window.entries.iter().map(|entry| json!({
                "frame": entry.frame,
                "score": entry.score,
                "error": entry.error,
                "normalized": entry.normalized,
                "local_best": entry.is_local_best,
            })).collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(());
    }

    for entry in &window.entries {
        let bar_width = (entry.normalized * 20.0).round() as usize;
        let marker = if entry.frame == center { ">" } else { " " };
        let line = match entry.score {
            Some(score) => format!("{marker}{:>8}  {score:>8.4}  {}", entry.frame, "#".repeat(bar_width)),
            None => format!("{marker}{:>8}  {:>8}", entry.frame, "failed"),
        };
        if entry.is_local_best {
            println!("{} {}", line.green().bold(), "(local best)".green());
        } else if entry.error {
            println!("{}", line.red());
        } else {
            println!("{line}");
        }
    }
    Ok(())
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    apply_global_options(&cli.global)?;

    match cli.command {
        Commands::Score {
            images,
            width,
            json,
        } => score_images(&images, width, json, cli.global.verbose)?,
        #[cfg(feature = "ffmpeg")]
        Commands::Scan {
            input,
            budget,
            json,
        } => {
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(scan(&input, budget, json, &cli.global))?;
        }
        #[cfg(feature = "ffmpeg")]
        Commands::Focus {
            input,
            center,
            radius,
            json,
        } => {
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(focus(&input, center, radius, json, &cli.global))?;
        }
        Commands::Completions { shell } => {
            let mut command = Cli::command();
            clap_complete::generate(shell, &mut command, "sharpframe", &mut std::io::stdout());
        }
    }

    Ok(())
}

fn main() {
    if let Err(error) = run() {
        eprintln!("{} {error}", "error:".red().bold());
        std::process::exit(1);
    }
}
