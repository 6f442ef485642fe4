//! Frame sampling for analysis.
//!
//! [`FrameSampler`] turns a 1-based frame number into a small RGBA buffer:
//! it seeks the dedicated analysis resource through the shared
//! [`SeekCoordinator`], waits briefly for the frame to become drawable, and
//! draws it downscaled to the analysis width while still holding the seek
//! permit.

use std::sync::Arc;
use std::time::Duration;

use image::RgbaImage;

use crate::configuration::AnalysisOptions;
use crate::error::SharpframeError;
use crate::metadata::VideoInfo;
use crate::progress::CancellationToken;
use crate::resource::{MediaResource, ReadyState};
use crate::seek::{SeekCoordinator, SeekHolder, SeekRequest};
use crate::utilities::frame_to_time;

/// A downscaled frame ready for scoring.
#[derive(Debug, Clone)]
pub struct FrameSample {
    /// 1-based frame number that was requested.
    pub frame: u64,
    /// Actual resource position after the seek, in seconds.
    pub time: f64,
    /// The downscaled RGBA pixels.
    pub image: RgbaImage,
}

/// Produces analysis buffers from a media resource.
pub struct FrameSampler {
    resource: Arc<dyn MediaResource>,
    coordinator: Arc<SeekCoordinator>,
    info: VideoInfo,
    analysis_width: u32,
    frame_time_offset: f64,
    readiness_grace: Duration,
}

impl FrameSampler {
    /// Create a sampler for `resource`, whose frame grid is `info`.
    pub fn new(
        resource: Arc<dyn MediaResource>,
        coordinator: Arc<SeekCoordinator>,
        info: VideoInfo,
        options: &AnalysisOptions,
    ) -> Self {
        Self {
            resource,
            coordinator,
            info,
            analysis_width: options.analysis_width,
            frame_time_offset: options.frame_time_offset,
            readiness_grace: options.readiness_grace,
        }
    }

    /// The frame grid this sampler works on.
    pub fn info(&self) -> &VideoInfo {
        &self.info
    }

    /// Presentation time sampled for `frame`.
    pub fn frame_time(&self, frame: u64) -> f64 {
        frame_to_time(frame, self.info.frame_rate, self.frame_time_offset)
    }

    /// Size of the buffer produced for the resource's current dimensions.
    ///
    /// # Errors
    ///
    /// Returns [`SharpframeError::ZeroDimensions`] if the resource reports a
    /// zero width or height.
    pub fn analysis_size(&self) -> Result<(u32, u32), SharpframeError> {
        let (width, height) = self.resource.dimensions();
        analysis_size(width, height, self.analysis_width)
    }

    /// Seek to `frame` and draw it at analysis resolution.
    ///
    /// # Errors
    ///
    /// - [`SharpframeError::FrameOutOfRange`] for frames outside the grid.
    /// - [`SharpframeError::Cancelled`] if `cancellation` fires while waiting
    ///   for the seek permit.
    /// - [`SharpframeError::SeekTimeout`] or a resource error from the seek.
    /// - [`SharpframeError::NotReady`] if the frame is still not drawable
    ///   after the readiness grace period.
    /// - [`SharpframeError::ZeroDimensions`] if the resource has no size.
    pub async fn sample(
        &self,
        frame: u64,
        cancellation: Option<&CancellationToken>,
    ) -> Result<FrameSample, SharpframeError> {
        if !self.info.contains(frame) {
            return Err(SharpframeError::FrameOutOfRange {
                frame_number: frame,
                total_frames: self.info.total_frames,
            });
        }

        let mut request = SeekRequest::new(self.frame_time(frame), SeekHolder::Analysis)
            .with_frame_rate(self.info.frame_rate);
        if let Some(token) = cancellation {
            request = request.with_cancellation(token.clone());
        }

        let (_permit, time) = self
            .coordinator
            .seek_holding(self.resource.as_ref(), request)
            .await?;

        if self.resource.ready_state() < ReadyState::CurrentData {
            tokio::time::sleep(self.readiness_grace).await;
            if self.resource.ready_state() < ReadyState::CurrentData {
                return Err(SharpframeError::NotReady);
            }
        }

        let (width, height) = self.analysis_size()?;
        let image = self.resource.draw(width, height).await?;

        Ok(FrameSample { frame, time, image })
    }
}

/// `(target_width, max(1, floor(target_width / aspect)))` for a source size.
fn analysis_size(width: u32, height: u32, target_width: u32) -> Result<(u32, u32), SharpframeError> {
    if width == 0 || height == 0 {
        return Err(SharpframeError::ZeroDimensions);
    }
    let aspect = width as f64 / height as f64;
    let scaled = (target_width as f64 / aspect).floor() as u32;
    Ok((target_width, scaled.max(1)))
}
