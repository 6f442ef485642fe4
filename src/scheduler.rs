//! The analysis scheduling state machine.
//!
//! [`AnalysisState`] owns everything a session needs to decide what to
//! analyse next: the priority queue of explicitly requested frames, the
//! recursive queue of unexplored [`Segment`]s, the set of frames in flight,
//! and the [`ScoreStore`]. It performs no I/O. A driver calls
//! [`tick`](AnalysisState::tick) to obtain frames to launch and reports each
//! result back through [`complete`](AnalysisState::complete).
//!
//! Selection for every free slot:
//!
//! 1. Pop the head of the priority queue.
//! 2. Otherwise, unless paused, take the shallowest segment (ties: smaller
//!    span, then insertion order), analyse its midpoint and push both halves
//!    back one level deeper.
//! 3. Frames already scored or in flight are skipped; the halves are still
//!    pushed, so exploration continues underneath them.
//!
//! # Example
//!
//! ```
//! use sharpframe::{AnalysisState, Segment, TaskOutcome};
//!
//! let mut state = AnalysisState::new(10, 1);
//! assert_eq!(state.tick(), vec![5]);
//! assert_eq!(
//!     state.recursive_segments(),
//!     vec![Segment::new(1, 4, 1), Segment::new(6, 10, 1)],
//! );
//!
//! state.complete(5, TaskOutcome::Scored { score: 1.2, time: 0.134 });
//! assert_eq!(state.store().best().map(|best| best.frame), Some(5));
//! ```

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet, VecDeque};

use crate::store::{LocalFocus, ScoreStore};

/// An unexplored, inclusive range of frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Segment {
    /// First frame of the range.
    pub start_frame: u64,
    /// Last frame of the range.
    pub end_frame: u64,
    /// Subdivision depth; the whole video is depth 0.
    pub depth: u32,
}

impl Segment {
    /// Create a segment. `start_frame` must not exceed `end_frame`.
    pub fn new(start_frame: u64, end_frame: u64, depth: u32) -> Self {
        debug_assert!(start_frame <= end_frame);
        Self {
            start_frame,
            end_frame,
            depth,
        }
    }

    /// `end_frame - start_frame`.
    pub fn span(&self) -> u64 {
        self.end_frame - self.start_frame
    }

    /// The frame analysed when this segment is picked.
    pub fn midpoint(&self) -> u64 {
        (self.start_frame + self.end_frame) / 2
    }

    /// The non-empty halves left after analysing the midpoint.
    fn split(&self) -> impl Iterator<Item = Segment> {
        let mid = self.midpoint();
        let depth = self.depth + 1;
        let left = (mid > self.start_frame).then(|| Segment::new(self.start_frame, mid - 1, depth));
        let right = (mid < self.end_frame).then(|| Segment::new(mid + 1, self.end_frame, depth));
        left.into_iter().chain(right)
    }
}

/// Heap key: shallower first, then narrower, then older.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct QueuedSegment {
    depth: u32,
    span: u64,
    sequence: u64,
    start_frame: u64,
    end_frame: u64,
}

impl QueuedSegment {
    fn segment(&self) -> Segment {
        Segment::new(self.start_frame, self.end_frame, self.depth)
    }
}

/// How a launched analysis ended.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TaskOutcome {
    /// The frame was scored.
    Scored {
        /// Sharpness score.
        score: f64,
        /// Position actually sampled, in seconds.
        time: f64,
    },
    /// Seeking, sampling or scoring failed.
    Failed {
        /// Position the analysis aimed for, in seconds.
        time: f64,
    },
    /// The session was torn down before the task finished.
    Cancelled,
}

/// Session-scoped scheduling state.
#[derive(Debug, Clone)]
pub struct AnalysisState {
    total_frames: u64,
    capacity: usize,
    priority: VecDeque<u64>,
    recursive: BinaryHeap<Reverse<QueuedSegment>>,
    next_sequence: u64,
    in_flight: HashSet<u64>,
    store: ScoreStore,
    paused: bool,
    cancelled: bool,
    focus: Option<(u64, u64)>,
}

impl AnalysisState {
    /// Fresh state for a video of `total_frames` frames, launching at most
    /// `capacity` analyses at a time.
    ///
    /// The recursive queue is seeded with `[1, total_frames]` at depth 0.
    pub fn new(total_frames: u64, capacity: usize) -> Self {
        let mut state = Self {
            total_frames,
            capacity: capacity.max(1),
            priority: VecDeque::new(),
            recursive: BinaryHeap::new(),
            next_sequence: 0,
            in_flight: HashSet::new(),
            store: ScoreStore::new(),
            paused: false,
            cancelled: false,
            focus: None,
        };
        if total_frames > 0 {
            state.push_segment(Segment::new(1, total_frames, 0));
        }
        state
    }

    /// Queue the window around `center` ahead of everything else.
    ///
    /// Frames are ordered center first, then `center - i`, `center + i` for
    /// `i = 1..=radius`, keeping only frames inside the video that are not
    /// scored and not in flight. Previously queued frames move behind the
    /// new window. Returns the number of frames in the new window.
    pub fn request_priority(&mut self, center: u64, radius: u64) -> usize {
        self.focus = Some((center, radius));
        if self.cancelled {
            return 0;
        }

        // Offsets whose frames all fall outside [1, total_frames] produce
        // nothing, so only the reachable band is walked.
        let total = self.total_frames;
        let first_offset = center.saturating_sub(total).max(1);
        let last_offset = radius.min(center.saturating_sub(1).max(total.saturating_sub(center)));
        let offsets = (first_offset..=last_offset).flat_map(|offset| {
            [center.checked_sub(offset), center.checked_add(offset)]
        });

        let mut window: Vec<u64> = Vec::new();
        let mut queued: HashSet<u64> = HashSet::new();
        for frame in std::iter::once(Some(center)).chain(offsets).flatten() {
            let eligible = frame >= 1
                && frame <= total
                && !self.store.is_scored(frame)
                && !self.in_flight.contains(&frame);
            if eligible && queued.insert(frame) {
                window.push(frame);
            }
        }

        let previous: Vec<u64> = self
            .priority
            .drain(..)
            .filter(|frame| !queued.contains(frame))
            .collect();
        let added = window.len();
        self.priority.extend(window);
        self.priority.extend(previous);

        log::debug!(
            "Priority window around frame {center} (radius {radius}): {added} frames queued, {} total",
            self.priority.len()
        );
        added
    }

    /// Pause or resume recursive exploration. Priority work is never paused.
    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    /// Whether recursive exploration is paused.
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Select frames for every free slot and mark them in flight.
    ///
    /// Returns nothing once cancelled.
    pub fn tick(&mut self) -> Vec<u64> {
        let mut launched = Vec::new();
        if self.cancelled {
            return launched;
        }

        while self.in_flight.len() < self.capacity {
            let Some(frame) = self.next_frame() else {
                break;
            };
            self.in_flight.insert(frame);
            launched.push(frame);
        }

        if !launched.is_empty() {
            log::debug!(
                "Launching frames {launched:?} ({} active, {} queued, {} segments)",
                self.in_flight.len(),
                self.priority.len(),
                self.recursive.len()
            );
        }
        launched
    }

    /// Record the outcome of a launched frame.
    ///
    /// Returns `true` if the score store changed. Results for frames not in
    /// flight, and every result after cancellation, are discarded.
    pub fn complete(&mut self, frame: u64, outcome: TaskOutcome) -> bool {
        if !self.in_flight.remove(&frame) || self.cancelled {
            return false;
        }

        match outcome {
            TaskOutcome::Scored { score, time } => self.store.record_success(frame, score, time),
            TaskOutcome::Failed { time } => self.store.record_error(frame, time),
            TaskOutcome::Cancelled => false,
        }
    }

    /// Stop all further dispatch and discard late results.
    pub fn cancel(&mut self) {
        self.cancelled = true;
        self.priority.clear();
    }

    /// Whether [`cancel`](Self::cancel) was called.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Both queues are empty and nothing is in flight.
    pub fn is_idle(&self) -> bool {
        self.priority.is_empty() && self.recursive.is_empty() && self.in_flight.is_empty()
    }

    /// Number of frames in flight.
    pub fn active_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Frames currently in flight.
    pub fn in_flight(&self) -> &HashSet<u64> {
        &self.in_flight
    }

    /// Maximum number of concurrent analyses.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of frames in the video.
    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }

    /// The most recent priority request as `(center, radius)`.
    pub fn focus(&self) -> Option<(u64, u64)> {
        self.focus
    }

    /// Pending priority frames in dispatch order.
    pub fn priority_queue(&self) -> Vec<u64> {
        self.priority.iter().copied().collect()
    }

    /// Pending segments in dispatch order.
    pub fn recursive_segments(&self) -> Vec<Segment> {
        let mut queued: Vec<QueuedSegment> =
            self.recursive.iter().map(|Reverse(entry)| *entry).collect();
        queued.sort();
        queued.iter().map(QueuedSegment::segment).collect()
    }

    /// The recorded scores.
    pub fn store(&self) -> &ScoreStore {
        &self.store
    }

    /// Aggregate scores around `center`, marking in-flight frames pending.
    pub fn local_focus(&self, center: u64, radius: u64) -> LocalFocus {
        self.store
            .local_focus(center, radius, self.total_frames, &self.in_flight)
    }

    fn next_frame(&mut self) -> Option<u64> {
        while let Some(frame) = self.priority.pop_front() {
            if self.is_claimable(frame) {
                return Some(frame);
            }
        }

        if self.paused {
            return None;
        }

        while let Some(Reverse(entry)) = self.recursive.pop() {
            let segment = entry.segment();
            for half in segment.split() {
                self.push_segment(half);
            }
            let mid = segment.midpoint();
            if self.is_claimable(mid) {
                return Some(mid);
            }
        }
        None
    }

    fn is_claimable(&self, frame: u64) -> bool {
        frame >= 1
            && frame <= self.total_frames
            && !self.store.is_scored(frame)
            && !self.in_flight.contains(&frame)
    }

    fn push_segment(&mut self, segment: Segment) {
        self.recursive.push(Reverse(QueuedSegment {
            depth: segment.depth,
            span: segment.span(),
            sequence: self.next_sequence,
            start_frame: segment.start_frame,
            end_frame: segment.end_frame,
        }));
        self.next_sequence += 1;
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn scored(score: f64) -> TaskOutcome {
        TaskOutcome::Scored { score, time: 0.0 }
    }

    /// Tick and complete every launched frame until idle.
    fn drain(state: &mut AnalysisState) -> Vec<u64> {
        let mut visited = Vec::new();
        loop {
            let launched = state.tick();
            if launched.is_empty() {
                break;
            }
            for frame in launched {
                visited.push(frame);
                state.complete(frame, scored(frame as f64));
            }
        }
        visited
    }

    // ── Recursive subdivision ──────────────────────────────────────────

    #[test]
    fn first_frame_of_ten_is_the_midpoint() {
        let mut state = AnalysisState::new(10, 1);
        assert_eq!(state.recursive_segments(), vec![Segment::new(1, 10, 0)]);
        assert_eq!(state.tick(), vec![5]);
        assert_eq!(
            state.recursive_segments(),
            vec![Segment::new(1, 4, 1), Segment::new(6, 10, 1)]
        );
    }

    #[test]
    fn shallower_then_narrower_segments_first() {
        let mut state = AnalysisState::new(10, 3);
        // [1,10,0] -> 5; [1,4,1] (span 3) -> 2; [6,10,1] -> 8.
        assert_eq!(state.tick(), vec![5, 2, 8]);
        let depths: Vec<u32> = state
            .recursive_segments()
            .iter()
            .map(|segment| segment.depth)
            .collect();
        assert!(depths.iter().all(|&depth| depth == 2));
    }

    #[test]
    fn every_frame_is_visited_exactly_once() {
        for total in [1_u64, 2, 3, 10, 37, 128] {
            let mut state = AnalysisState::new(total, 3);
            let visited = drain(&mut state);

            let mut counts: HashMap<u64, usize> = HashMap::new();
            for frame in &visited {
                *counts.entry(*frame).or_default() += 1;
            }
            assert_eq!(counts.len() as u64, total, "total {total}");
            assert!(counts.values().all(|&count| count == 1));
            assert!(counts.keys().all(|&frame| (1..=total).contains(&frame)));
            assert!(state.is_idle());
        }
    }

    #[test]
    fn empty_video_is_idle() {
        let mut state = AnalysisState::new(0, 3);
        assert!(state.is_idle());
        assert!(state.tick().is_empty());
        assert_eq!(state.request_priority(1, 3), 0);
    }

    #[test]
    fn cached_midpoint_is_skipped_but_still_split() {
        let mut state = AnalysisState::new(10, 1);
        state.request_priority(5, 0);
        assert_eq!(state.tick(), vec![5]);
        state.complete(5, scored(1.0));

        // [1,10,0] picks 5 again, skips it, and continues with [1,4,1].
        assert_eq!(state.tick(), vec![2]);
        assert_eq!(
            state.recursive_segments(),
            vec![
                Segment::new(6, 10, 1),
                Segment::new(1, 1, 2),
                Segment::new(3, 4, 2)
            ]
        );
    }

    // ── Priority queue ─────────────────────────────────────────────────

    #[test]
    fn priority_window_expands_symmetrically() {
        let mut state = AnalysisState::new(100, 5);
        assert_eq!(state.request_priority(7, 2), 5);
        assert_eq!(state.priority_queue(), vec![7, 6, 8, 5, 9]);
        assert_eq!(state.tick(), vec![7, 6, 8, 5, 9]);
        assert_eq!(state.recursive_segments(), vec![Segment::new(1, 100, 0)]);
    }

    #[test]
    fn priority_beats_recursive_for_a_single_slot() {
        let mut state = AnalysisState::new(10, 1);
        state.request_priority(2, 0);
        assert_eq!(state.tick(), vec![2]);
        state.complete(2, scored(1.0));
        assert_eq!(state.tick(), vec![5]);
    }

    #[test]
    fn priority_window_is_clipped_and_filtered() {
        let mut state = AnalysisState::new(10, 1);
        state.request_priority(2, 0);
        state.tick();
        state.complete(2, scored(1.0));

        assert_eq!(state.request_priority(1, 2), 2);
        assert_eq!(state.priority_queue(), vec![1, 3]);

        state.tick();
        assert_eq!(state.request_priority(1, 2), 1);
        assert_eq!(state.priority_queue(), vec![3]);
    }

    #[test]
    fn oversized_radius_only_walks_the_video() {
        let mut state = AnalysisState::new(10, 1);
        assert_eq!(state.request_priority(5, u64::MAX), 10);
        assert_eq!(state.priority_queue(), vec![5, 4, 6, 3, 7, 2, 8, 1, 9, 10]);

        let mut state = AnalysisState::new(60_000, 3);
        assert_eq!(state.request_priority(30_000, 30_000), 60_000);
        assert_eq!(state.priority_queue()[..3], [30_000, 29_999, 30_001]);
    }

    #[test]
    fn center_outside_the_video_reaches_in_from_the_edge() {
        let mut state = AnalysisState::new(10, 1);
        assert_eq!(state.request_priority(12, 2), 1);
        assert_eq!(state.priority_queue(), vec![10]);
        assert_eq!(state.request_priority(12, 3), 2);
        assert_eq!(state.priority_queue(), vec![10, 9]);

        let mut state = AnalysisState::new(10, 1);
        assert_eq!(state.request_priority(u64::MAX, u64::MAX), 10);
        assert_eq!(state.priority_queue(), (1..=10).rev().collect::<Vec<_>>());
        assert_eq!(state.request_priority(0, 2), 2);
        assert_eq!(state.priority_queue()[..2], [1, 2]);
    }

    #[test]
    fn new_window_moves_ahead_of_old_one() {
        let mut state = AnalysisState::new(100, 1);
        state.request_priority(5, 1);
        state.request_priority(8, 1);
        assert_eq!(state.priority_queue(), vec![8, 7, 9, 5, 4, 6]);
        state.request_priority(5, 0);
        assert_eq!(state.priority_queue(), vec![5, 8, 7, 9, 4, 6]);
        assert_eq!(state.focus(), Some((5, 0)));
    }

    #[test]
    fn failed_frames_can_be_requested_again() {
        let mut state = AnalysisState::new(10, 1);
        state.request_priority(3, 0);
        state.tick();
        assert!(state.complete(3, TaskOutcome::Failed { time: 0.07 }));
        assert!(state.store().get(3).is_some_and(|entry| entry.error));

        assert_eq!(state.request_priority(3, 0), 1);
        assert_eq!(state.tick(), vec![3]);
        assert!(state.complete(3, scored(2.0)));
        assert!(!state.store().needs_analysis(3));
    }

    // ── Pause, capacity, cancellation ──────────────────────────────────

    #[test]
    fn pause_blocks_only_recursive_work() {
        let mut state = AnalysisState::new(10, 3);
        state.set_paused(true);
        assert!(state.tick().is_empty());
        assert!(!state.is_idle());

        state.request_priority(9, 0);
        assert_eq!(state.tick(), vec![9]);

        state.set_paused(false);
        assert_eq!(state.tick(), vec![5, 2]);
    }

    #[test]
    fn active_count_never_exceeds_capacity() {
        let mut state = AnalysisState::new(50, 3);
        state.request_priority(25, 10);
        let mut pending: VecDeque<u64> = VecDeque::new();

        for _ in 0..200 {
            pending.extend(state.tick());
            assert!(state.active_count() <= state.capacity());
            match pending.pop_front() {
                Some(frame) => {
                    state.complete(frame, scored(frame as f64));
                }
                None => break,
            }
        }
        assert!(state.is_idle());
        assert_eq!(state.store().scored_count(), 50);
    }

    #[test]
    fn in_flight_frames_are_not_launched_twice() {
        let mut state = AnalysisState::new(10, 3);
        assert_eq!(state.tick(), vec![5, 2, 8]);
        assert_eq!(state.request_priority(5, 1), 2);
        assert_eq!(state.priority_queue(), vec![4, 6]);
        assert!(state.local_focus(5, 0).entries[0].pending);
    }

    #[test]
    fn cancel_stops_dispatch_and_discards_results() {
        let mut state = AnalysisState::new(10, 2);
        let launched = state.tick();
        state.cancel();

        assert!(state.tick().is_empty());
        for frame in launched {
            assert!(!state.complete(frame, scored(1.0)));
        }
        assert!(state.store().is_empty());
        assert_eq!(state.active_count(), 0);
        assert_eq!(state.request_priority(3, 1), 0);
    }

    #[test]
    fn stale_completions_are_ignored() {
        let mut state = AnalysisState::new(10, 1);
        assert!(!state.complete(4, scored(1.0)));
        assert_eq!(state.tick(), vec![5]);
        assert!(!state.complete(5, TaskOutcome::Cancelled));
        assert_eq!(state.active_count(), 0);
        assert!(state.store().is_empty());
    }

    #[test]
    fn range_bounds_hold_throughout_a_session() {
        let mut state = AnalysisState::new(64, 3);
        let mut step = 0_u64;
        loop {
            let launched = state.tick();
            if launched.is_empty() {
                break;
            }
            for frame in launched {
                step += 1;
                let outcome = if step % 5 == 0 {
                    TaskOutcome::Failed { time: 0.0 }
                } else {
                    scored(((frame * 37) % 11) as f64 - 3.0)
                };
                state.complete(frame, outcome);

                if let Some((min, max)) = state.store().score_range() {
                    for entry in state.store().iter() {
                        if let Some(score) = entry.valid_score() {
                            assert!(min <= score && score <= max);
                        }
                    }
                }
            }
        }
        assert!(state.store().failed_count() > 0);
    }
}
