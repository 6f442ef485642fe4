//! Error types for the `sharpframe` crate.
//!
//! This module defines [`SharpframeError`], the unified error type returned by
//! all fallible operations in the crate. Per-frame failures carry the frame
//! number or worker index involved so they can be logged without extra
//! context at the call site.

use std::{io::Error as IoError, time::Duration};

use image::ImageError;
use thiserror::Error;

/// The unified error type for all `sharpframe` operations.
///
/// Inside an analysis session every variant except
/// [`Cancelled`](SharpframeError::Cancelled) is caught at the task boundary
/// and recorded as an error-flagged [`FrameScore`](crate::FrameScore).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SharpframeError {
    /// The requested frame number lies outside `[1, total_frames]`.
    #[error("Frame {frame_number} is out of range (video has {total_frames} frames)")]
    FrameOutOfRange {
        /// The frame number that was requested.
        frame_number: u64,
        /// The total number of frames in the video.
        total_frames: u64,
    },

    /// A seek did not signal completion before the timeout elapsed.
    #[error("Seek to {target:.3}s timed out after {timeout:?}")]
    SeekTimeout {
        /// Target presentation time in seconds.
        target: f64,
        /// The timeout that elapsed.
        timeout: Duration,
    },

    /// The media resource reported an error while seeking.
    #[error("Seek to {target:.3}s failed: {reason}")]
    SeekFailed {
        /// Target presentation time in seconds.
        target: f64,
        /// Reason reported by the resource.
        reason: String,
    },

    /// The media resource has no decodable frame at its current position.
    #[error("Media resource is not ready to sample")]
    NotReady,

    /// The media resource reports a zero width or height.
    #[error("Video dimensions are zero")]
    ZeroDimensions,

    /// The pixel buffer does not hold `width * height` RGBA pixels.
    #[error("Pixel buffer of {actual} bytes is too small for {width}x{height} RGBA")]
    InvalidBuffer {
        /// Buffer width in pixels.
        width: u32,
        /// Buffer height in pixels.
        height: u32,
        /// Actual buffer length in bytes.
        actual: usize,
    },

    /// Drawing the current frame into a pixel buffer failed.
    #[error("Failed to sample frame: {0}")]
    SampleFailed(String),

    /// The compute unit reported an application-level scoring failure.
    #[error("Scoring task {task_id} failed: {reason}")]
    ScoringFailed {
        /// Identifier of the failed task.
        task_id: u64,
        /// Reason reported by the compute unit.
        reason: String,
    },

    /// A compute unit instance failed, rejecting every task assigned to it.
    #[error("Worker {worker_index} critically failed while running task {task_id}")]
    WorkerFault {
        /// Index of the faulted instance in the pool.
        worker_index: usize,
        /// Identifier of the rejected task.
        task_id: u64,
    },

    /// The analysis session was cancelled (video change or teardown).
    #[error("Operation cancelled")]
    Cancelled,

    /// The analysis driver has shut down and no longer accepts requests.
    #[error("Analysis session is closed")]
    SessionClosed,

    /// The media file could not be opened.
    #[error("Failed to open media: {0}")]
    MediaOpen(String),

    /// The media file does not contain a video stream.
    #[error("No video stream found in file")]
    NoVideoStream,

    /// A video frame could not be decoded.
    #[error("Failed to decode video frame: {0}")]
    VideoDecodeError(String),

    /// An error originating from the FFmpeg libraries.
    #[cfg(feature = "ffmpeg")]
    #[error("FFmpeg error: {0}")]
    FfmpegError(String),

    /// An I/O error occurred while reading files.
    #[error("I/O error: {0}")]
    IoError(#[from] IoError),

    /// An error from the `image` crate while loading or converting images.
    #[error("Image processing error: {0}")]
    ImageError(#[from] ImageError),
}

impl SharpframeError {
    /// Returns `true` for the deliberate teardown signal.
    ///
    /// Cancellation is not a user-visible failure; callers usually drop
    /// such results silently.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SharpframeError::Cancelled)
    }
}

#[cfg(feature = "ffmpeg")]
impl From<ffmpeg_next::Error> for SharpframeError {
    fn from(error: ffmpeg_next::Error) -> Self {
        SharpframeError::FfmpegError(error.to_string())
    }
}
