//! The decodable media resource consumed by the analyzer.
//!
//! `sharpframe` does not decode video. A host supplies implementations of
//! [`MediaResource`]: one instance drives live playback, a second one is
//! dedicated to analysis, so seeking one never disturbs the other. The
//! `ffmpeg` feature provides [`FfmpegResource`](crate::FfmpegResource).

use async_trait::async_trait;
use image::RgbaImage;

use crate::error::SharpframeError;

/// How much data a resource has available at its current position.
///
/// Variants are ordered: a resource at `FutureData` also satisfies every
/// check for `CurrentData`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum ReadyState {
    /// Nothing is known about the media yet.
    #[default]
    Nothing,
    /// Duration and dimensions are known.
    Metadata,
    /// The frame at the current position can be drawn.
    CurrentData,
    /// The current frame and at least the next one are available.
    FutureData,
    /// Enough data is buffered to play through.
    EnoughData,
}

/// A seekable, drawable video source.
///
/// Implementations must signal completion of every [`seek_to`] call, either
/// by returning `Ok` once the new position can be drawn, or by returning an
/// error. The [`SeekCoordinator`](crate::SeekCoordinator) bounds the wait
/// with its own timeout.
///
/// [`seek_to`]: MediaResource::seek_to
#[async_trait]
pub trait MediaResource: Send + Sync {
    /// Current presentation time in seconds.
    fn position(&self) -> f64;

    /// Readiness at the current position.
    fn ready_state(&self) -> ReadyState;

    /// Source `(width, height)` in pixels; `(0, 0)` when unknown.
    fn dimensions(&self) -> (u32, u32);

    /// Media duration in seconds; `0.0` when unknown.
    fn duration(&self) -> f64;

    /// Move to `time` seconds and resolve once the move has completed.
    async fn seek_to(&self, time: f64) -> Result<(), SharpframeError>;

    /// Draw the frame at the current position scaled to `width`×`height`.
    async fn draw(&self, width: u32, height: u32) -> Result<RgbaImage, SharpframeError>;
}
