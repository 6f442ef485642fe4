//! Video metadata consumed by an analysis session.
//!
//! The analyzer never opens media itself; whoever supplies the
//! [`MediaResource`](crate::MediaResource) also supplies a [`VideoInfo`]
//! describing the frame grid the scheduler works on.

use crate::configuration::DEFAULT_FRAME_RATE;

/// Frame grid and geometry of a loaded video.
///
/// # Example
///
/// ```
/// use sharpframe::VideoInfo;
///
/// let info = VideoInfo::from_duration(10.0, 25.0);
/// assert_eq!(info.total_frames, 250);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
#[must_use]
pub struct VideoInfo {
    /// Number of frames; frame numbers run from 1 to this value.
    pub total_frames: u64,
    /// Frames per second (may be approximate for variable-frame-rate content).
    pub frame_rate: f64,
    /// Duration in seconds, or `0.0` when unknown.
    pub duration: f64,
    /// Source width in pixels, `0` when unknown.
    pub width: u32,
    /// Source height in pixels, `0` when unknown.
    pub height: u32,
}

impl VideoInfo {
    /// Describe a video by its frame count and frame rate.
    ///
    /// A non-positive frame rate falls back to
    /// [`DEFAULT_FRAME_RATE`](crate::configuration::DEFAULT_FRAME_RATE).
    pub fn new(total_frames: u64, frame_rate: f64) -> Self {
        let frame_rate = sanitize_frame_rate(frame_rate);
        Self {
            total_frames,
            frame_rate,
            duration: total_frames as f64 / frame_rate,
            width: 0,
            height: 0,
        }
    }

    /// Describe a video by its duration in seconds and frame rate.
    ///
    /// The frame count is `floor(duration * frame_rate)`.
    pub fn from_duration(duration: f64, frame_rate: f64) -> Self {
        let frame_rate = sanitize_frame_rate(frame_rate);
        let duration = duration.max(0.0);
        Self {
            total_frames: (duration * frame_rate).floor() as u64,
            frame_rate,
            duration,
            width: 0,
            height: 0,
        }
    }

    /// Attach source dimensions.
    pub fn with_dimensions(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Whether `frame` lies within `[1, total_frames]`.
    pub fn contains(&self, frame: u64) -> bool {
        frame >= 1 && frame <= self.total_frames
    }
}

fn sanitize_frame_rate(frame_rate: f64) -> f64 {
    if frame_rate.is_finite() && frame_rate > 0.0 {
        frame_rate
    } else {
        DEFAULT_FRAME_RATE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_frame_rate_falls_back_to_default() {
        let info = VideoInfo::new(60, 0.0);
        assert_eq!(info.frame_rate, DEFAULT_FRAME_RATE);
        assert!((info.duration - 2.0).abs() < 1e-9);
    }

    #[test]
    fn contains_is_one_based() {
        let info = VideoInfo::new(10, 30.0);
        assert!(!info.contains(0));
        assert!(info.contains(1));
        assert!(info.contains(10));
        assert!(!info.contains(11));
    }
}
