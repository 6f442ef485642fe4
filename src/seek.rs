//! Serialized access to the shared decode/seek position.
//!
//! Playback and analysis both move a decoder around. [`SeekCoordinator`]
//! guarantees that only one seek is ever in flight: callers acquire a
//! [`SeekPermit`] that names its holder, waiters queue in FIFO order, and an
//! in-flight seek is never preempted. Every seek resolves within the
//! configured timeout; a timeout is reported as
//! [`SharpframeError::SeekTimeout`] and the permit is released as usual.

use std::sync::Mutex as StdMutex;
use std::time::Duration;

use tokio::sync::{Mutex, MutexGuard};

use crate::configuration::{AnalysisOptions, TIME_EPSILON};
use crate::error::SharpframeError;
use crate::progress::CancellationToken;
use crate::resource::{MediaResource, ReadyState};
use crate::utilities::times_match;

/// Who is moving the decode position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SeekHolder {
    /// Background frame analysis.
    Analysis,
    /// User-driven playback (scrubbing, stepping).
    User,
}

/// A single seek request.
#[derive(Debug, Clone)]
#[must_use]
pub struct SeekRequest {
    /// Target presentation time in seconds.
    pub target: f64,
    /// Who is seeking.
    pub holder: SeekHolder,
    /// Frame rate used to keep the target inside the last frame.
    pub frame_rate: Option<f64>,
    /// Token observed while waiting for the permit.
    pub cancellation: Option<CancellationToken>,
}

impl SeekRequest {
    /// Create a request to move to `target` seconds.
    pub fn new(target: f64, holder: SeekHolder) -> Self {
        Self {
            target,
            holder,
            frame_rate: None,
            cancellation: None,
        }
    }

    /// Clamp the target to `duration - 0.1 / frame_rate`.
    pub fn with_frame_rate(mut self, frame_rate: f64) -> Self {
        self.frame_rate = Some(frame_rate);
        self
    }

    /// Abort the wait for the permit once `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    fn clamped_target(&self, duration: f64) -> f64 {
        let target = self.target.max(0.0);
        match self.frame_rate {
            Some(fps) if duration > 0.0 && fps > 0.0 => {
                target.min((duration - 0.1 / fps).max(0.0))
            }
            _ => target,
        }
    }
}

/// Ownership token for the decode position.
///
/// Dropping the permit releases the position to the next waiter.
#[derive(Debug)]
pub struct SeekPermit<'a> {
    holder: SeekHolder,
    coordinator: &'a SeekCoordinator,
    _guard: MutexGuard<'a, ()>,
}

impl SeekPermit<'_> {
    /// Who holds this permit.
    pub fn holder(&self) -> SeekHolder {
        self.holder
    }
}

impl Drop for SeekPermit<'_> {
    fn drop(&mut self) {
        if let Ok(mut holder) = self.coordinator.holder.lock() {
            *holder = None;
        }
    }
}

/// Serializes seeks across every resource that shares a decode position.
#[derive(Debug)]
pub struct SeekCoordinator {
    lock: Mutex<()>,
    holder: StdMutex<Option<SeekHolder>>,
    timeout: Duration,
    time_epsilon: f64,
}

impl SeekCoordinator {
    /// Create a coordinator with the timeout and time tolerance from `options`.
    pub fn new(options: &AnalysisOptions) -> Self {
        Self {
            time_epsilon: options.time_epsilon,
            ..Self::with_timeout(options.seek_timeout)
        }
    }

    /// Create a coordinator with an explicit seek timeout.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            lock: Mutex::new(()),
            holder: StdMutex::new(None),
            timeout,
            time_epsilon: TIME_EPSILON,
        }
    }

    /// The holder of the in-flight seek, if any.
    pub fn current_holder(&self) -> Option<SeekHolder> {
        self.holder.lock().ok().and_then(|holder| *holder)
    }

    /// Wait for exclusive ownership of the decode position.
    ///
    /// # Errors
    ///
    /// Returns [`SharpframeError::Cancelled`] if `cancellation` fires while
    /// waiting.
    pub async fn acquire(
        &self,
        holder: SeekHolder,
        cancellation: Option<&CancellationToken>,
    ) -> Result<SeekPermit<'_>, SharpframeError> {
        let guard = match cancellation {
            Some(token) => tokio::select! {
                guard = self.lock.lock() => guard,
                _ = token.cancelled() => return Err(SharpframeError::Cancelled),
            },
            None => self.lock.lock().await,
        };

        if let Ok(mut current) = self.holder.lock() {
            *current = Some(holder);
        }

        Ok(SeekPermit {
            holder,
            coordinator: self,
            _guard: guard,
        })
    }

    /// Move `resource` to the requested time.
    ///
    /// Returns the resource position once the seek has completed. When the
    /// resource already sits on the target and has data ahead of it, no
    /// seek is issued.
    ///
    /// # Errors
    ///
    /// - [`SharpframeError::Cancelled`] if the request's token fires first.
    /// - [`SharpframeError::SeekTimeout`] if the resource does not signal
    ///   completion in time.
    /// - Any error the resource reports for the seek.
    pub async fn seek<R>(&self, resource: &R, request: SeekRequest) -> Result<f64, SharpframeError>
    where
        R: MediaResource + ?Sized,
    {
        let (_permit, position) = self.seek_holding(resource, request).await?;
        Ok(position)
    }

    /// Like [`seek`](Self::seek), but keeps the permit so the caller can read
    /// the frame before anyone else moves the position.
    ///
    /// # Errors
    ///
    /// Same as [`seek`](Self::seek). The permit is released on error.
    pub async fn seek_holding<R>(
        &self,
        resource: &R,
        request: SeekRequest,
    ) -> Result<(SeekPermit<'_>, f64), SharpframeError>
    where
        R: MediaResource + ?Sized,
    {
        let permit = self
            .acquire(request.holder, request.cancellation.as_ref())
            .await?;

        if request
            .cancellation
            .as_ref()
            .is_some_and(|token| token.is_cancelled())
        {
            return Err(SharpframeError::Cancelled);
        }

        let target = request.clamped_target(resource.duration());

        if times_match(resource.position(), target, self.time_epsilon / 2.0)
            && resource.ready_state() >= ReadyState::FutureData
        {
            log::trace!("{:?} seek to {target:.3}s skipped, already there", permit.holder());
            let position = resource.position();
            return Ok((permit, position));
        }

        log::trace!("{:?} seeking to {target:.3}s", permit.holder());
        match tokio::time::timeout(self.timeout, resource.seek_to(target)).await {
            Ok(Ok(())) => {
                let position = resource.position();
                Ok((permit, position))
            }
            Ok(Err(error)) => Err(error),
            Err(_) => Err(SharpframeError::SeekTimeout {
                target,
                timeout: self.timeout,
            }),
        }
    }
}
