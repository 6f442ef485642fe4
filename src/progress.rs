//! Progress reporting and cancellation support.
//!
//! This module provides [`CancellationToken`] for cooperative cancellation of
//! an analysis session, [`ProgressCallback`] for observing how much of a video
//! has been scored, and [`ProgressInfo`] snapshots.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use sharpframe::{AnalysisOptions, ProgressCallback, ProgressInfo};
//!
//! struct PrintProgress;
//!
//! impl ProgressCallback for PrintProgress {
//!     fn on_progress(&self, info: &ProgressInfo) {
//!         if let Some(pct) = info.percentage {
//!             println!("{pct:.1}% of frames scored");
//!         }
//!     }
//! }
//!
//! let options = AnalysisOptions::new().with_progress(Arc::new(PrintProgress));
//! ```

use std::time::Duration;

/// A snapshot of analysis progress.
///
/// Delivered to [`ProgressCallback::on_progress`] every time the score store
/// changes.
#[derive(Debug, Clone)]
pub struct ProgressInfo {
    /// Number of frames scored successfully so far.
    pub scored: u64,
    /// Number of frames whose latest attempt failed.
    pub failed: u64,
    /// Total number of frames in the video.
    pub total: u64,
    /// Percentage of frames scored (0.0 – 100.0), if `total` is non-zero.
    pub percentage: Option<f32>,
    /// Wall-clock time since the session was (re)started.
    pub elapsed: Duration,
    /// Analyses currently in flight.
    pub active: usize,
}

/// Trait for receiving progress updates from an analysis session.
///
/// Callbacks run on the analysis driver task, so implementations should
/// return quickly. They observe but cannot halt the session; use
/// [`CancellationToken`] for that.
pub trait ProgressCallback: Send + Sync {
    /// Called after every change of the score store.
    fn on_progress(&self, info: &ProgressInfo);
}

/// A no-op implementation that discards all progress notifications.
pub(crate) struct NoOpProgress;

impl ProgressCallback for NoOpProgress {
    fn on_progress(&self, _info: &ProgressInfo) {}
}

/// Cooperative cancellation token.
///
/// Clone this token and share it between tasks; call
/// [`cancel`](CancellationToken::cancel) from anywhere to stop the associated
/// session. Synchronous code polls [`is_cancelled`](CancellationToken::is_cancelled);
/// async code can await [`cancelled`](CancellationToken::cancelled) at its
/// suspension points.
///
/// # Example
///
/// ```
/// use sharpframe::CancellationToken;
///
/// let token = CancellationToken::new();
/// assert!(!token.is_cancelled());
///
/// token.cancel();
/// assert!(token.is_cancelled());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: tokio_util::sync::CancellationToken,
}

impl CancellationToken {
    /// Create a new, non-cancelled token.
    pub fn new() -> Self {
        Self {
            inner: tokio_util::sync::CancellationToken::new(),
        }
    }

    /// Request cancellation.
    ///
    /// All clones of this token observe the cancellation, and every task
    /// awaiting [`cancelled`](CancellationToken::cancelled) is woken.
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    /// Check whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.inner.is_cancelled()
    }

    /// Resolve once cancellation has been requested.
    pub async fn cancelled(&self) {
        self.inner.cancelled().await;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::CancellationToken;

    #[tokio::test]
    async fn cancelled_wakes_pending_waiter() {
        let token = CancellationToken::new();
        let waiter = {
            let token = token.clone();
            tokio::spawn(async move { token.cancelled().await })
        };

        tokio::task::yield_now().await;
        token.cancel();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should be woken")
            .expect("waiter task panicked");
    }

    #[tokio::test]
    async fn cancelled_returns_immediately_when_already_cancelled() {
        let token = CancellationToken::new();
        token.cancel();
        tokio::time::timeout(Duration::from_millis(100), token.cancelled())
            .await
            .expect("should not block");
    }

    #[tokio::test]
    async fn cancel_on_one_clone_wakes_every_waiter() {
        let token = CancellationToken::default();
        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let token = token.clone();
                tokio::spawn(async move { token.cancelled().await })
            })
            .collect();

        tokio::task::yield_now().await;
        token.clone().cancel();

        for waiter in waiters {
            tokio::time::timeout(Duration::from_secs(1), waiter)
                .await
                .expect("every waiter should be woken")
                .expect("waiter task panicked");
        }
        assert!(token.is_cancelled());
    }
}
