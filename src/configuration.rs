//! Analysis configuration.
//!
//! [`AnalysisOptions`] is a builder that threads worker counts, timeouts,
//! sampling resolution, progress callbacks, and cancellation tokens through
//! the analysis session without polluting every function signature.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//!
//! use sharpframe::{AnalysisOptions, CancellationToken};
//!
//! let token = CancellationToken::new();
//! let options = AnalysisOptions::new()
//!     .with_workers(4)
//!     .with_seek_timeout(Duration::from_secs(2))
//!     .with_cancellation(token.clone());
//! ```

use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::sync::Arc;
use std::time::Duration;

use crate::progress::{CancellationToken, NoOpProgress, ProgressCallback};

/// Number of concurrent scoring slots in the worker pool.
pub const NUM_WORKERS: usize = 3;
/// How long a seek may take before it is treated as failed.
pub const SEEK_TIMEOUT: Duration = Duration::from_millis(3500);
/// Width of the downscaled buffer handed to the scorer.
pub const ANALYSIS_WIDTH: u32 = 160;
/// Fraction of a frame duration added to a frame's start time when seeking.
pub const FRAME_TIME_OFFSET_FACTOR: f64 = 0.01;
/// Tolerance when comparing presentation times (seconds).
pub const TIME_EPSILON: f64 = 0.001;
/// Score spans at or below this are treated as flat when normalizing.
pub const SCORE_RANGE_EPSILON: f64 = 1e-3;
/// Grace period granted to a resource that is not yet ready to draw.
pub const READINESS_GRACE: Duration = Duration::from_millis(50);
/// Quiet period after the last user interaction before recursive work resumes.
pub const USER_INTERACTION_SETTLE_DELAY: Duration = Duration::from_millis(500);
/// Focus radius used when none is given.
pub const DEFAULT_FOCUS_RADIUS: u64 = 10;
/// Frame rate assumed when a resource cannot report one.
pub const DEFAULT_FRAME_RATE: f64 = 30.0;

/// Configuration for an analysis session.
///
/// All fields have sensible defaults matching the constants in this module.
#[derive(Clone)]
#[must_use]
pub struct AnalysisOptions {
    pub(crate) workers: usize,
    pub(crate) seek_timeout: Duration,
    pub(crate) analysis_width: u32,
    pub(crate) frame_time_offset: f64,
    pub(crate) time_epsilon: f64,
    pub(crate) readiness_grace: Duration,
    pub(crate) settle_delay: Duration,
    pub(crate) focus_radius: u64,
    pub(crate) progress: Arc<dyn ProgressCallback>,
    pub(crate) cancellation: Option<CancellationToken>,
}

impl Debug for AnalysisOptions {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("AnalysisOptions")
            .field("workers", &self.workers)
            .field("seek_timeout", &self.seek_timeout)
            .field("analysis_width", &self.analysis_width)
            .field("focus_radius", &self.focus_radius)
            .field("has_cancellation", &self.cancellation.is_some())
            .finish_non_exhaustive()
    }
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl AnalysisOptions {
    /// Create a new configuration with default settings.
    pub fn new() -> Self {
        Self {
            workers: NUM_WORKERS,
            seek_timeout: SEEK_TIMEOUT,
            analysis_width: ANALYSIS_WIDTH,
            frame_time_offset: FRAME_TIME_OFFSET_FACTOR,
            time_epsilon: TIME_EPSILON,
            readiness_grace: READINESS_GRACE,
            settle_delay: USER_INTERACTION_SETTLE_DELAY,
            focus_radius: DEFAULT_FOCUS_RADIUS,
            progress: Arc::new(NoOpProgress),
            cancellation: None,
        }
    }

    /// Set the number of concurrent scoring slots. Clamped to at least 1.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Set how long a seek may take before it fails.
    pub fn with_seek_timeout(mut self, timeout: Duration) -> Self {
        self.seek_timeout = timeout;
        self
    }

    /// Set the width of the downscaled analysis buffer. Clamped to at least 1.
    pub fn with_analysis_width(mut self, width: u32) -> Self {
        self.analysis_width = width.max(1);
        self
    }

    /// Set the tolerance used when comparing presentation times.
    ///
    /// A seek is skipped when the resource already sits within half of it.
    /// Negative values are treated as zero.
    pub fn with_time_epsilon(mut self, epsilon: f64) -> Self {
        self.time_epsilon = epsilon.max(0.0);
        self
    }

    /// Set the grace period granted to a resource that is not yet ready.
    pub fn with_readiness_grace(mut self, grace: Duration) -> Self {
        self.readiness_grace = grace;
        self
    }

    /// Set the quiet period after which recursive work resumes.
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Set the focus radius used by [`Analyzer::focus`](crate::Analyzer::focus).
    pub fn with_focus_radius(mut self, radius: u64) -> Self {
        self.focus_radius = radius;
        self
    }

    /// Attach a progress callback, invoked after every score store change.
    pub fn with_progress(mut self, callback: Arc<dyn ProgressCallback>) -> Self {
        self.progress = callback;
        self
    }

    /// Attach an external cancellation token.
    ///
    /// Cancelling it tears down the whole analyzer, not just the current
    /// session.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Number of concurrent scoring slots.
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Seek timeout.
    pub fn seek_timeout(&self) -> Duration {
        self.seek_timeout
    }

    /// Width of the analysis buffer.
    pub fn analysis_width(&self) -> u32 {
        self.analysis_width
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_constants() {
        let options = AnalysisOptions::new();
        assert_eq!(options.workers(), NUM_WORKERS);
        assert_eq!(options.seek_timeout(), SEEK_TIMEOUT);
        assert_eq!(options.analysis_width(), ANALYSIS_WIDTH);
        assert_eq!(options.focus_radius, DEFAULT_FOCUS_RADIUS);
        assert_eq!(options.time_epsilon, TIME_EPSILON);
    }

    #[test]
    fn negative_time_epsilon_clamps_to_zero() {
        assert_eq!(AnalysisOptions::new().with_time_epsilon(-1.0).time_epsilon, 0.0);
        assert_eq!(AnalysisOptions::new().with_time_epsilon(0.02).time_epsilon, 0.02);
    }

    #[test]
    fn zero_workers_clamps_to_one() {
        assert_eq!(AnalysisOptions::new().with_workers(0).workers(), 1);
    }

    #[test]
    fn debug_reports_cancellation() {
        let debug = format!("{:?}", AnalysisOptions::new());
        assert!(debug.contains("has_cancellation: false"));
        let debug = format!(
            "{:?}",
            AnalysisOptions::new().with_cancellation(CancellationToken::new())
        );
        assert!(debug.contains("has_cancellation: true"));
    }
}
