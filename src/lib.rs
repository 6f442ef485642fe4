//! # sharpframe
//!
//! Find the sharpest frames of a video.
//!
//! `sharpframe` samples frames adaptively, scores each one with a perceptual
//! sharpness metric, and prioritizes the frames around whatever the viewer
//! is looking at. It does not decode video itself: a host supplies a
//! seekable, drawable [`MediaResource`] (the `ffmpeg` feature ships one).
//!
//! ## Quick Start
//!
//! ### Score a still image
//!
//! ```
//! use image::{Rgba, RgbaImage};
//!
//! let image = RgbaImage::from_fn(64, 64, |x, _| {
//!     if x % 2 == 0 { Rgba([0, 0, 0, 255]) } else { Rgba([255, 255, 255, 255]) }
//! });
//! let score = sharpframe::sharpness::score_image(&image);
//! assert!(score > 0.0);
//! ```
//!
//! ### Analyse a video
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use sharpframe::{AnalysisOptions, Analyzer, MediaResource, VideoInfo};
//!
//! # async fn example(resource: Arc<dyn MediaResource>) -> Result<(), sharpframe::SharpframeError> {
//! let analyzer = Analyzer::new(resource, VideoInfo::new(1800, 30.0), AnalysisOptions::new());
//!
//! // The viewer paused on frame 640: score its neighbourhood first.
//! analyzer.focus(640).await?;
//!
//! let window = analyzer.local_focus(640, 10).await?;
//! if let Some(best) = window.best {
//!     println!("sharpest nearby frame: {best}");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## How it works
//!
//! - **Scheduling** ([`scheduler`]): explicitly requested frames are
//!   analysed first; otherwise the video is explored by breadth-first
//!   binary subdivision, so coverage converges on every frame.
//! - **Seeking** ([`seek`]): playback and analysis seeks are serialized
//!   FIFO through a single ownership token, with a 3.5 s timeout.
//! - **Sampling** ([`sampler`]): frames are drawn at 160 px wide.
//! - **Scoring** ([`sharpness`], [`worker_pool`]): a blend of Laplacian
//!   variance, Tenengrad, Brenner, edge ratio and RMS contrast, computed on a
//!   bounded pool of isolated threads.
//! - **Aggregation** ([`store`]): per-frame results, the overall best and
//!   local-focus windows.
//!
//! ### Optional Features
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `ffmpeg` | `FfmpegResource`, a `MediaResource` backed by FFmpeg |
//! | `full` | Enables all of the above |

pub mod analyzer;
pub mod configuration;
pub mod error;
#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;
pub mod metadata;
pub mod progress;
pub mod resource;
pub mod sampler;
pub mod scheduler;
pub mod seek;
pub mod sharpness;
pub mod store;
pub mod utilities;
pub mod worker_pool;

pub use analyzer::{AnalysisProgress, Analyzer};
pub use configuration::AnalysisOptions;
pub use error::SharpframeError;
#[cfg(feature = "ffmpeg")]
pub use ffmpeg::{FfmpegLogLevel, FfmpegResource, get_ffmpeg_log_level, set_ffmpeg_log_level};
pub use metadata::VideoInfo;
pub use progress::{CancellationToken, ProgressCallback, ProgressInfo};
pub use resource::{MediaResource, ReadyState};
pub use sampler::{FrameSample, FrameSampler};
pub use scheduler::{AnalysisState, Segment, TaskOutcome};
pub use seek::{SeekCoordinator, SeekHolder, SeekPermit, SeekRequest};
pub use sharpness::{SharpnessKernel, SharpnessMetrics};
pub use store::{FocusEntry, FrameScore, LocalFocus, ScoreStore};
pub use worker_pool::{ScoreKernel, ScoreRequest, ScoreResponse, WorkerPool};
