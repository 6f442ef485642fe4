//! The asynchronous analysis driver.
//!
//! [`Analyzer`] runs a single driver task that owns the session's
//! [`AnalysisState`]. Commands from the host (priority requests, pause
//! changes, resets) and completions of per-frame analyses arrive as events;
//! each event is handled to completion and followed by a
//! [`tick`](AnalysisState::tick) that launches new work on free slots.
//!
//! Every launched frame runs `seek → sample → score` as its own task.
//! Failures are caught at the task boundary and recorded as error-flagged
//! scores; a task that panics still reports back through a drop guard, so
//! the active count cannot leak.
//!
//! Observers follow the session through a `watch` channel of
//! [`AnalysisProgress`] values (also available as a
//! [`Stream`](tokio_stream::Stream) via [`Analyzer::updates`]) whose
//! `version` increments on every score store change.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use sharpframe::{AnalysisOptions, Analyzer, MediaResource, VideoInfo};
//!
//! # async fn example(resource: Arc<dyn MediaResource>) -> Result<(), sharpframe::SharpframeError> {
//! let info = VideoInfo::new(900, 30.0);
//! let analyzer = Analyzer::new(resource, info, AnalysisOptions::new());
//!
//! analyzer.focus(120).await?;
//! analyzer.wait_idle().await?;
//!
//! if let Some(best) = analyzer.overall_best().await? {
//!     println!("sharpest frame: {} ({:.3})", best.frame, best.score.unwrap_or(0.0));
//! }
//! # Ok(())
//! # }
//! ```

use std::future;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_stream::wrappers::WatchStream;

use crate::configuration::AnalysisOptions;
use crate::error::SharpframeError;
use crate::metadata::VideoInfo;
use crate::progress::{CancellationToken, ProgressInfo};
use crate::resource::MediaResource;
use crate::sampler::FrameSampler;
use crate::scheduler::{AnalysisState, TaskOutcome};
use crate::seek::SeekCoordinator;
use crate::sharpness::SharpnessKernel;
use crate::store::{FrameScore, LocalFocus};
use crate::worker_pool::WorkerPool;

/// A published view of the session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnalysisProgress {
    /// Incremented on every score store change, including resets.
    pub version: u64,
    /// Session counter; bumped by every reset or video change.
    pub generation: u64,
    /// Frames scored successfully.
    pub scored: u64,
    /// Frames whose latest attempt failed.
    pub failed: u64,
    /// Analyses in flight.
    pub active: usize,
    /// Frames in the video.
    pub total_frames: u64,
    /// Recursive exploration is paused.
    pub paused: bool,
    /// Both queues are empty and nothing is in flight.
    pub idle: bool,
    /// The session was cancelled.
    pub cancelled: bool,
}

impl AnalysisProgress {
    /// Percentage of frames scored, if the video has frames.
    pub fn percentage(&self) -> Option<f32> {
        (self.total_frames > 0).then(|| self.scored as f32 / self.total_frames as f32 * 100.0)
    }
}

type Inspector = Box<dyn FnOnce(&AnalysisState) + Send>;

enum Command {
    Reset {
        total_frames: u64,
    },
    Load {
        resource: Arc<dyn MediaResource>,
        info: VideoInfo,
    },
    RequestPriority {
        center: u64,
        radius: u64,
        reply: oneshot::Sender<usize>,
    },
    SetPaused(bool),
    Interaction,
    Cancel,
    Inspect(Inspector),
}

struct Completion {
    generation: u64,
    frame: u64,
    outcome: TaskOutcome,
}

/// Handle to a running analysis driver.
///
/// Dropping the handle tears the driver down and cancels any in-flight work.
pub struct Analyzer {
    commands: mpsc::UnboundedSender<Command>,
    progress: watch::Receiver<AnalysisProgress>,
    coordinator: Arc<SeekCoordinator>,
    focus_radius: u64,
    driver: JoinHandle<()>,
}

impl Analyzer {
    /// Start analysing `resource` with a fresh seek coordinator and a
    /// [`SharpnessKernel`] worker pool sized from `options`.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn new(resource: Arc<dyn MediaResource>, info: VideoInfo, options: AnalysisOptions) -> Self {
        let coordinator = Arc::new(SeekCoordinator::new(&options));
        let pool = Arc::new(WorkerPool::new(options.workers, Arc::new(SharpnessKernel)));
        Self::spawn(resource, info, coordinator, pool, options)
    }

    /// Start analysing `resource` with shared collaborators.
    ///
    /// Share `coordinator` with the playback side so user seeks and analysis
    /// seeks are serialized. At most `options.workers` frames are analysed
    /// at a time, bounded further by the pool's own capacity.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn spawn(
        resource: Arc<dyn MediaResource>,
        info: VideoInfo,
        coordinator: Arc<SeekCoordinator>,
        pool: Arc<WorkerPool>,
        options: AnalysisOptions,
    ) -> Self {
        let (commands, command_receiver) = mpsc::unbounded_channel();
        let (completions, completion_receiver) = mpsc::unbounded_channel();
        let (progress_sender, progress) = watch::channel(AnalysisProgress::default());
        let focus_radius = options.focus_radius;

        let capacity = options.workers.min(pool.capacity());
        let sampler = Arc::new(FrameSampler::new(
            Arc::clone(&resource),
            Arc::clone(&coordinator),
            info,
            &options,
        ));

        let mut driver = Driver {
            state: AnalysisState::new(info.total_frames, capacity),
            capacity,
            resource,
            info,
            sampler,
            coordinator: Arc::clone(&coordinator),
            pool,
            session: CancellationToken::new(),
            generation: 1,
            version: 0,
            started: Instant::now(),
            settle_deadline: None,
            completions,
            progress: progress_sender,
            options,
        };
        driver.publish();
        log::debug!(
            "Analysis session 1 started ({} frames, {capacity} slots)",
            info.total_frames
        );

        let driver = tokio::spawn(driver.run(command_receiver, completion_receiver));

        Self {
            commands,
            progress,
            coordinator,
            focus_radius,
            driver,
        }
    }

    /// The seek coordinator guarding the decode position.
    ///
    /// Playback code should issue its own seeks through it with
    /// [`SeekHolder::User`](crate::SeekHolder::User).
    pub fn coordinator(&self) -> Arc<SeekCoordinator> {
        Arc::clone(&self.coordinator)
    }

    /// Discard everything and restart on a grid of `total_frames` frames.
    ///
    /// # Errors
    ///
    /// Returns [`SharpframeError::SessionClosed`] if the driver has stopped.
    pub fn reset(&self, total_frames: u64) -> Result<(), SharpframeError> {
        self.send(Command::Reset { total_frames })
    }

    /// Switch to a different video. In-flight work for the old one is
    /// cancelled and its results are discarded.
    ///
    /// # Errors
    ///
    /// Returns [`SharpframeError::SessionClosed`] if the driver has stopped.
    pub fn load_video(
        &self,
        resource: Arc<dyn MediaResource>,
        info: VideoInfo,
    ) -> Result<(), SharpframeError> {
        self.send(Command::Load { resource, info })
    }

    /// Analyse the window around `center` before any recursive work.
    ///
    /// Returns how many frames were queued.
    ///
    /// # Errors
    ///
    /// Returns [`SharpframeError::SessionClosed`] if the driver has stopped.
    pub async fn request_priority_analysis(
        &self,
        center: u64,
        radius: u64,
    ) -> Result<usize, SharpframeError> {
        let (reply, response) = oneshot::channel();
        self.send(Command::RequestPriority {
            center,
            radius,
            reply,
        })?;
        response.await.map_err(|_| SharpframeError::SessionClosed)
    }

    /// [`request_priority_analysis`](Self::request_priority_analysis) with the
    /// configured focus radius.
    ///
    /// # Errors
    ///
    /// Returns [`SharpframeError::SessionClosed`] if the driver has stopped.
    pub async fn focus(&self, center: u64) -> Result<usize, SharpframeError> {
        self.request_priority_analysis(center, self.focus_radius)
            .await
    }

    /// Pause or resume recursive exploration.
    ///
    /// # Errors
    ///
    /// Returns [`SharpframeError::SessionClosed`] if the driver has stopped.
    pub fn set_paused(&self, paused: bool) -> Result<(), SharpframeError> {
        self.send(Command::SetPaused(paused))
    }

    /// Report user activity (scrubbing, stepping).
    ///
    /// Recursive exploration pauses until no interaction has been reported
    /// for the settle delay.
    ///
    /// # Errors
    ///
    /// Returns [`SharpframeError::SessionClosed`] if the driver has stopped.
    pub fn notify_interaction(&self) -> Result<(), SharpframeError> {
        self.send(Command::Interaction)
    }

    /// Cancel the current session. Queries keep answering from the scores
    /// gathered so far until the next reset.
    ///
    /// # Errors
    ///
    /// Returns [`SharpframeError::SessionClosed`] if the driver has stopped.
    pub fn cancel(&self) -> Result<(), SharpframeError> {
        self.send(Command::Cancel)
    }

    /// The sharpest frame scored so far.
    ///
    /// # Errors
    ///
    /// Returns [`SharpframeError::SessionClosed`] if the driver has stopped.
    pub async fn overall_best(&self) -> Result<Option<FrameScore>, SharpframeError> {
        self.inspect(|state| state.store().best().cloned()).await
    }

    /// Scores around `center`, normalized within the window.
    ///
    /// # Errors
    ///
    /// Returns [`SharpframeError::SessionClosed`] if the driver has stopped.
    pub async fn local_focus(&self, center: u64, radius: u64) -> Result<LocalFocus, SharpframeError> {
        self.inspect(move |state| state.local_focus(center, radius))
            .await
    }

    /// The recorded outcome for `frame`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`SharpframeError::SessionClosed`] if the driver has stopped.
    pub async fn cached_score(&self, frame: u64) -> Result<Option<FrameScore>, SharpframeError> {
        self.inspect(move |state| state.store().get(frame).cloned())
            .await
    }

    /// Every recorded outcome in frame order.
    ///
    /// # Errors
    ///
    /// Returns [`SharpframeError::SessionClosed`] if the driver has stopped.
    pub async fn scores(&self) -> Result<Vec<FrameScore>, SharpframeError> {
        self.inspect(|state| state.store().iter().cloned().collect())
            .await
    }

    /// Globally normalized value of `score` for heatmap rendering.
    ///
    /// # Errors
    ///
    /// Returns [`SharpframeError::SessionClosed`] if the driver has stopped.
    pub async fn normalized(&self, score: f64) -> Result<f64, SharpframeError> {
        self.inspect(move |state| state.store().normalized(score))
            .await
    }

    /// The latest published progress.
    pub fn snapshot(&self) -> AnalysisProgress {
        self.progress.borrow().clone()
    }

    /// The current store version.
    pub fn version(&self) -> u64 {
        self.progress.borrow().version
    }

    /// A receiver notified on every published change.
    pub fn subscribe(&self) -> watch::Receiver<AnalysisProgress> {
        self.progress.clone()
    }

    /// Published changes as a stream, starting with the current value.
    pub fn updates(&self) -> WatchStream<AnalysisProgress> {
        WatchStream::new(self.progress.clone())
    }

    /// Wait until the session is idle or cancelled.
    ///
    /// A paused session with recursive work left never becomes idle.
    ///
    /// # Errors
    ///
    /// Returns [`SharpframeError::SessionClosed`] if the driver stops first.
    pub async fn wait_idle(&self) -> Result<AnalysisProgress, SharpframeError> {
        // Round-trip through the driver so every earlier command is visible.
        self.inspect(|_| ()).await?;
        let mut progress = self.progress.clone();
        let reached = progress
            .wait_for(|progress| progress.idle || progress.cancelled)
            .await
            .map_err(|_| SharpframeError::SessionClosed)?;
        Ok(reached.clone())
    }

    /// Stop the driver and wait for it to exit.
    pub async fn shutdown(self) {
        let Self {
            commands, driver, ..
        } = self;
        drop(commands);
        if let Err(error) = driver.await {
            log::warn!("Analysis driver ended abnormally: {error}");
        }
    }

    fn send(&self, command: Command) -> Result<(), SharpframeError> {
        self.commands
            .send(command)
            .map_err(|_| SharpframeError::SessionClosed)
    }

    async fn inspect<T, F>(&self, inspector: F) -> Result<T, SharpframeError>
    where
        T: Send + 'static,
        F: FnOnce(&AnalysisState) -> T + Send + 'static,
    {
        let (reply, response) = oneshot::channel();
        self.send(Command::Inspect(Box::new(move |state| {
            let _ = reply.send(inspector(state));
        })))?;
        response.await.map_err(|_| SharpframeError::SessionClosed)
    }
}

impl std::fmt::Debug for Analyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Analyzer")
            .field("progress", &*self.progress.borrow())
            .field("focus_radius", &self.focus_radius)
            .finish_non_exhaustive()
    }
}

/// Owns the session state; runs on its own task.
struct Driver {
    state: AnalysisState,
    capacity: usize,
    resource: Arc<dyn MediaResource>,
    info: VideoInfo,
    sampler: Arc<FrameSampler>,
    coordinator: Arc<SeekCoordinator>,
    pool: Arc<WorkerPool>,
    session: CancellationToken,
    generation: u64,
    version: u64,
    started: Instant,
    settle_deadline: Option<Instant>,
    completions: mpsc::UnboundedSender<Completion>,
    progress: watch::Sender<AnalysisProgress>,
    options: AnalysisOptions,
}

impl Driver {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut completions: mpsc::UnboundedReceiver<Completion>,
    ) {
        let external = self.options.cancellation.clone();
        // Commands sent before the driver first ran (e.g. an initial pause)
        // apply before anything is launched.
        while let Ok(command) = commands.try_recv() {
            self.handle(command);
        }
        self.launch();
        self.publish();

        loop {
            let settle = self.settle_deadline;
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle(command),
                    None => {
                        log::debug!("Analyzer handle dropped, stopping driver");
                        break;
                    }
                },
                Some(completion) = completions.recv() => self.on_completion(completion),
                _ = sleep_until(settle) => {
                    log::debug!("User interaction settled, resuming recursive analysis");
                    self.settle_deadline = None;
                    self.state.set_paused(false);
                }
                _ = cancelled(external.as_ref()) => {
                    log::debug!("External cancellation requested, stopping driver");
                    break;
                }
            }

            self.launch();
            self.publish();
        }

        self.session.cancel();
        self.state.cancel();
        self.publish();
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Reset { total_frames } => {
                let info = VideoInfo {
                    total_frames,
                    ..self.info
                };
                let resource = Arc::clone(&self.resource);
                self.start_session(resource, info);
            }
            Command::Load { resource, info } => self.start_session(resource, info),
            Command::RequestPriority {
                center,
                radius,
                reply,
            } => {
                let queued = self.state.request_priority(center, radius);
                let _ = reply.send(queued);
            }
            Command::SetPaused(paused) => {
                self.settle_deadline = None;
                self.state.set_paused(paused);
            }
            Command::Interaction => {
                self.state.set_paused(true);
                self.settle_deadline = Some(Instant::now() + self.options.settle_delay);
            }
            Command::Cancel => {
                log::debug!("Cancelling analysis session {}", self.generation);
                self.session.cancel();
                self.state.cancel();
                self.settle_deadline = None;
            }
            Command::Inspect(inspector) => {
                self.launch();
                self.publish();
                inspector(&self.state);
            }
        }
    }

    fn start_session(&mut self, resource: Arc<dyn MediaResource>, info: VideoInfo) {
        self.session.cancel();
        self.session = CancellationToken::new();
        self.generation += 1;
        self.version += 1;
        self.started = Instant::now();
        self.settle_deadline = None;

        self.sampler = Arc::new(FrameSampler::new(
            Arc::clone(&resource),
            Arc::clone(&self.coordinator),
            info,
            &self.options,
        ));
        self.resource = resource;
        self.info = info;
        self.state = AnalysisState::new(info.total_frames, self.capacity);

        log::debug!(
            "Analysis session {} started ({} frames)",
            self.generation,
            info.total_frames
        );
        self.report();
    }

    fn on_completion(&mut self, completion: Completion) {
        if completion.generation != self.generation {
            log::trace!(
                "Discarding frame {} from finished session {}",
                completion.frame,
                completion.generation
            );
            return;
        }

        if self.state.complete(completion.frame, completion.outcome) {
            self.version += 1;
            self.report();
        }
    }

    fn launch(&mut self) {
        for frame in self.state.tick() {
            let guard = CompletionGuard {
                completions: self.completions.clone(),
                generation: self.generation,
                frame,
                fallback_time: self.sampler.frame_time(frame),
                sent: false,
            };
            let sampler = Arc::clone(&self.sampler);
            let pool = Arc::clone(&self.pool);
            let session = self.session.clone();

            tokio::spawn(async move {
                let outcome = analyze_frame(&sampler, &pool, frame, &session).await;
                guard.finish(outcome);
            });
        }
    }

    fn snapshot(&self) -> AnalysisProgress {
        let store = self.state.store();
        AnalysisProgress {
            version: self.version,
            generation: self.generation,
            scored: store.scored_count(),
            failed: store.failed_count(),
            active: self.state.active_count(),
            total_frames: self.state.total_frames(),
            paused: self.state.is_paused(),
            idle: self.state.is_idle(),
            cancelled: self.state.is_cancelled(),
        }
    }

    fn publish(&self) {
        let next = self.snapshot();
        self.progress.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }

    /// Notify the progress callback of a store change.
    fn report(&self) {
        let progress = self.snapshot();
        self.options.progress.on_progress(&ProgressInfo {
            scored: progress.scored,
            failed: progress.failed,
            total: progress.total_frames,
            percentage: progress.percentage(),
            elapsed: self.started.elapsed(),
            active: progress.active,
        });
    }
}

/// Run one frame through `seek → sample → score`.
async fn analyze_frame(
    sampler: &FrameSampler,
    pool: &WorkerPool,
    frame: u64,
    session: &CancellationToken,
) -> TaskOutcome {
    let scored = async {
        let sample = sampler.sample(frame, Some(session)).await?;
        let time = sample.time;
        let (width, height) = sample.image.dimensions();
        let score = pool
            .submit(sample.image.into_raw(), width, height, Some(session))
            .await?;
        Ok::<_, SharpframeError>(TaskOutcome::Scored { score, time })
    };

    match scored.await {
        Ok(outcome) => outcome,
        Err(error) if error.is_cancelled() => TaskOutcome::Cancelled,
        Err(error) => {
            log::warn!("Analysis of frame {frame} failed: {error}");
            TaskOutcome::Failed {
                time: sampler.frame_time(frame),
            }
        }
    }
}

/// Reports a failed completion if the frame task ends without reporting.
struct CompletionGuard {
    completions: mpsc::UnboundedSender<Completion>,
    generation: u64,
    frame: u64,
    fallback_time: f64,
    sent: bool,
}

impl CompletionGuard {
    fn finish(mut self, outcome: TaskOutcome) {
        self.send(outcome);
    }

    fn send(&mut self, outcome: TaskOutcome) {
        self.sent = true;
        let _ = self.completions.send(Completion {
            generation: self.generation,
            frame: self.frame,
            outcome,
        });
    }
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        if !self.sent {
            log::warn!("Analysis task for frame {} ended abruptly", self.frame);
            self.send(TaskOutcome::Failed {
                time: self.fallback_time,
            });
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => future::pending().await,
    }
}

async fn cancelled(token: Option<&CancellationToken>) {
    match token {
        Some(token) => token.cancelled().await,
        None => future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentage_requires_frames() {
        let mut progress = AnalysisProgress::default();
        assert_eq!(progress.percentage(), None);
        progress.total_frames = 8;
        progress.scored = 2;
        assert_eq!(progress.percentage(), Some(25.0));
    }

    #[tokio::test]
    async fn guard_reports_failure_when_dropped() {
        let (completions, mut receiver) = mpsc::unbounded_channel();
        let guard = CompletionGuard {
            completions,
            generation: 3,
            frame: 42,
            fallback_time: 1.4,
            sent: false,
        };
        drop(guard);

        let completion = receiver.recv().await.expect("completion");
        assert_eq!(completion.generation, 3);
        assert_eq!(completion.frame, 42);
        assert_eq!(completion.outcome, TaskOutcome::Failed { time: 1.4 });
    }

    #[tokio::test]
    async fn guard_reports_once_when_finished() {
        let (completions, mut receiver) = mpsc::unbounded_channel();
        let guard = CompletionGuard {
            completions,
            generation: 1,
            frame: 7,
            fallback_time: 0.0,
            sent: false,
        };
        guard.finish(TaskOutcome::Cancelled);

        assert_eq!(
            receiver.recv().await.map(|completion| completion.outcome),
            Some(TaskOutcome::Cancelled)
        );
        assert!(receiver.recv().await.is_none());
    }
}
