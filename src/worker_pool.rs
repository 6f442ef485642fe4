//! Bounded pool of isolated scoring units.
//!
//! [`WorkerPool`] runs a [`ScoreKernel`] on a fixed number of dedicated OS
//! threads. Callers [`submit`](WorkerPool::submit) a pixel buffer and wait
//! for its score; when every slot is busy the caller suspends on a
//! semaphore until one frees up.
//!
//! A compute unit that panics is torn down: every task assigned to it is
//! rejected with [`SharpframeError::WorkerFault`], its slot is released, and
//! a fresh thread replaces it the next time the slot is used. The other
//! slots are unaffected.

use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;

use tokio::sync::{Semaphore, SemaphorePermit, oneshot};

use crate::error::SharpframeError;
use crate::progress::CancellationToken;

/// The computation executed inside a compute unit.
///
/// Kernels must be pure: the same buffer always yields the same result.
/// Application-level failures are reported as `Err(reason)`; a panic is
/// treated as a fault of the whole unit.
pub trait ScoreKernel: Send + Sync + 'static {
    /// Score an RGBA buffer of `width * height` pixels.
    fn score(&self, pixels: &[u8], width: u32, height: u32) -> Result<f64, String>;
}

/// A message sent to a compute unit.
#[derive(Debug, Clone)]
pub struct ScoreRequest {
    /// Unique, monotonically increasing task identifier.
    pub task_id: u64,
    /// RGBA pixel data.
    pub pixels: Vec<u8>,
    /// Buffer width in pixels.
    pub width: u32,
    /// Buffer height in pixels.
    pub height: u32,
}

/// A message sent back by a compute unit.
#[derive(Debug, Clone)]
pub struct ScoreResponse {
    /// Echo of [`ScoreRequest::task_id`].
    pub task_id: u64,
    /// The score, or the kernel's failure reason.
    pub outcome: Result<f64, String>,
}

struct Job {
    request: ScoreRequest,
    reply: oneshot::Sender<ScoreResponse>,
}

struct Slot {
    jobs: Option<Sender<Job>>,
    busy: bool,
}

/// A bounded executor over isolated scoring threads.
pub struct WorkerPool {
    kernel: Arc<dyn ScoreKernel>,
    permits: Semaphore,
    slots: Mutex<Vec<Slot>>,
    capacity: usize,
    next_task_id: AtomicU64,
    faults: AtomicU64,
}

impl Debug for WorkerPool {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("WorkerPool")
            .field("capacity", &self.capacity)
            .field("active", &self.active_tasks())
            .field("faults", &self.faults())
            .finish_non_exhaustive()
    }
}

impl WorkerPool {
    /// Create a pool with `capacity` slots (at least one) running `kernel`.
    ///
    /// Threads are spawned lazily on first use.
    pub fn new(capacity: usize, kernel: Arc<dyn ScoreKernel>) -> Self {
        let capacity = capacity.max(1);
        let slots = (0..capacity)
            .map(|_| Slot {
                jobs: None,
                busy: false,
            })
            .collect();

        Self {
            kernel,
            permits: Semaphore::new(capacity),
            slots: Mutex::new(slots),
            capacity,
            next_task_id: AtomicU64::new(0),
            faults: AtomicU64::new(0),
        }
    }

    /// Number of slots.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of tasks currently holding a slot.
    pub fn active_tasks(&self) -> usize {
        self.capacity - self.permits.available_permits()
    }

    /// Number of compute unit faults observed since creation.
    pub fn faults(&self) -> u64 {
        self.faults.load(Ordering::Relaxed)
    }

    /// Score `pixels` on a free compute unit.
    ///
    /// Suspends until a slot is free. Exactly one slot is released when the
    /// task resolves, whatever the outcome.
    ///
    /// # Errors
    ///
    /// - [`SharpframeError::Cancelled`] if `cancellation` fires while waiting
    ///   for a slot or for the result. The slot is released at once.
    /// - [`SharpframeError::ScoringFailed`] if the kernel reports a failure.
    /// - [`SharpframeError::WorkerFault`] if the compute unit died.
    /// - [`SharpframeError::IoError`] if a compute thread cannot be spawned.
    pub async fn submit(
        &self,
        pixels: Vec<u8>,
        width: u32,
        height: u32,
        cancellation: Option<&CancellationToken>,
    ) -> Result<f64, SharpframeError> {
        let permit = match cancellation {
            Some(token) => tokio::select! {
                permit = self.permits.acquire() => permit,
                _ = token.cancelled() => return Err(SharpframeError::Cancelled),
            },
            None => self.permits.acquire().await,
        }
        .map_err(|_| SharpframeError::SessionClosed)?;

        let task_id = self.next_task_id.fetch_add(1, Ordering::Relaxed) + 1;
        let claim = self.claim(permit)?;
        let worker_index = claim.index;

        let (reply, response) = oneshot::channel();
        let job = Job {
            request: ScoreRequest {
                task_id,
                pixels,
                width,
                height,
            },
            reply,
        };

        let delivered = claim.jobs.send(job).is_ok();
        let response = match cancellation {
            _ if !delivered => None,
            Some(token) => tokio::select! {
                response = response => response.ok(),
                _ = token.cancelled() => {
                    // The unit finishes the job and discards the reply; the
                    // slot's next task queues behind it.
                    log::debug!("Task {task_id} abandoned on worker {worker_index}");
                    drop(claim);
                    return Err(SharpframeError::Cancelled);
                }
            },
            None => response.await.ok(),
        };

        let outcome = match response {
            Some(ScoreResponse {
                task_id: echoed,
                outcome,
            }) if echoed == task_id => {
                claim.release(false);
                outcome.map_err(|reason| SharpframeError::ScoringFailed { task_id, reason })
            }
            _ => {
                log::warn!("Worker {worker_index} faulted while running task {task_id}");
                self.faults.fetch_add(1, Ordering::Relaxed);
                claim.release(true);
                Err(SharpframeError::WorkerFault {
                    worker_index,
                    task_id,
                })
            }
        };

        if cancellation.is_some_and(|token| token.is_cancelled()) {
            return Err(SharpframeError::Cancelled);
        }
        outcome
    }

    /// Reserve an idle slot, spawning its thread when it has none.
    fn claim<'a>(&'a self, permit: SemaphorePermit<'a>) -> Result<Claim<'a>, SharpframeError> {
        let mut slots = self.slots.lock().map_err(|_| SharpframeError::SessionClosed)?;
        // A slot whose submitter was dropped mid-task may still be marked
        // busy while permits are free; fall back to any slot in that case.
        let index = slots
            .iter()
            .position(|slot| !slot.busy)
            .unwrap_or(0);

        let slot = &mut slots[index];
        let jobs = match &slot.jobs {
            Some(jobs) => jobs.clone(),
            None => {
                let jobs = spawn_unit(index, Arc::clone(&self.kernel))?;
                slot.jobs = Some(jobs.clone());
                jobs
            }
        };
        slot.busy = true;

        Ok(Claim {
            pool: self,
            index,
            jobs,
            released: false,
            _permit: permit,
        })
    }
}

/// A reserved slot. Releases the slot on drop if not released explicitly.
struct Claim<'a> {
    pool: &'a WorkerPool,
    index: usize,
    jobs: Sender<Job>,
    released: bool,
    _permit: SemaphorePermit<'a>,
}

impl Claim<'_> {
    fn release(mut self, faulted: bool) {
        self.mark_idle(faulted);
    }

    fn mark_idle(&mut self, faulted: bool) {
        if self.released {
            return;
        }
        self.released = true;
        if let Ok(mut slots) = self.pool.slots.lock() {
            let slot = &mut slots[self.index];
            slot.busy = false;
            if faulted {
                slot.jobs = None;
            }
        }
    }
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        self.mark_idle(false);
    }
}

fn spawn_unit(index: usize, kernel: Arc<dyn ScoreKernel>) -> Result<Sender<Job>, SharpframeError> {
    let (jobs, queue) = mpsc::channel();
    thread::Builder::new()
        .name(format!("sharpframe-worker-{index}"))
        .spawn(move || run_unit(index, kernel, queue))?;
    log::debug!("Spawned compute unit {index}");
    Ok(jobs)
}

fn run_unit(index: usize, kernel: Arc<dyn ScoreKernel>, queue: Receiver<Job>) {
    while let Ok(Job { request, reply }) = queue.recv() {
        let scored = catch_unwind(AssertUnwindSafe(|| {
            kernel.score(&request.pixels, request.width, request.height)
        }));

        match scored {
            Ok(outcome) => {
                let _ = reply.send(ScoreResponse {
                    task_id: request.task_id,
                    outcome,
                });
            }
            Err(_) => {
                log::warn!(
                    "Compute unit {index} panicked on task {}; shutting it down",
                    request.task_id
                );
                // Dropping the queue rejects every job still assigned here.
                return;
            }
        }
    }
}
