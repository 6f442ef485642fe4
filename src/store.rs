//! Memoized frame scores and their aggregates.
//!
//! [`ScoreStore`] keeps one [`FrameScore`] per analysed frame together with
//! the running overall best and the global score range. A successful score
//! is final; a failed attempt is remembered but may be superseded by a later
//! success. Every change bumps [`version`](ScoreStore::version) so observers
//! can cheaply detect updates.

use std::collections::{BTreeMap, HashSet};

use crate::configuration::SCORE_RANGE_EPSILON;

/// Normalized value reported when no meaningful range exists.
const NEUTRAL_NORMALIZED: f64 = 0.5;

/// The recorded outcome of analysing one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameScore {
    /// 1-based frame number.
    pub frame: u64,
    /// Sharpness score, `None` when the attempt failed.
    pub score: Option<f64>,
    /// Presentation time that was actually sampled, in seconds.
    pub time: f64,
    /// Whether the attempt failed.
    pub error: bool,
}

impl FrameScore {
    /// The score of a successful attempt.
    pub fn valid_score(&self) -> Option<f64> {
        if self.error { None } else { self.score }
    }
}

/// One frame of a local-focus window.
#[derive(Debug, Clone, PartialEq)]
pub struct FocusEntry {
    /// 1-based frame number.
    pub frame: u64,
    /// Cached score, if the frame was scored successfully.
    pub score: Option<f64>,
    /// Whether the latest attempt failed.
    pub error: bool,
    /// Whether an analysis of this frame is in flight.
    pub pending: bool,
    /// Whether the frame still lacks a successful score.
    pub needs_analysis: bool,
    /// Score mapped to `[0, 1]` within the window; `0.5` when unknown.
    pub normalized: f64,
    /// Whether this is the sharpest scored frame of the window.
    pub is_local_best: bool,
}

/// Scores around a center frame.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LocalFocus {
    /// Entries for every frame in the window, in frame order.
    pub entries: Vec<FocusEntry>,
    /// Frame number of the local best, if any frame was scored.
    pub best: Option<u64>,
    /// Smallest valid score in the window.
    pub min: Option<f64>,
    /// Largest valid score in the window.
    pub max: Option<f64>,
}

impl LocalFocus {
    /// The entry of the local best, if any.
    pub fn best_entry(&self) -> Option<&FocusEntry> {
        self.entries.iter().find(|entry| entry.is_local_best)
    }
}

/// Memoized per-frame scores with running aggregates.
#[derive(Debug, Clone)]
pub struct ScoreStore {
    scores: BTreeMap<u64, FrameScore>,
    best: Option<FrameScore>,
    global_min: f64,
    global_max: f64,
    scored: u64,
    failed: u64,
    version: u64,
}

impl Default for ScoreStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ScoreStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            scores: BTreeMap::new(),
            best: None,
            global_min: f64::INFINITY,
            global_max: f64::NEG_INFINITY,
            scored: 0,
            failed: 0,
            version: 0,
        }
    }

    /// Record a successful score for `frame` sampled at `time`.
    ///
    /// Returns `false` and leaves the store untouched if the frame already
    /// holds a successful score.
    pub fn record_success(&mut self, frame: u64, score: f64, time: f64) -> bool {
        let previous = self.scores.get(&frame).map(|entry| entry.error);
        match previous {
            Some(false) => {
                log::debug!("Frame {frame} already scored, ignoring duplicate result");
                return false;
            }
            Some(true) => self.failed -= 1,
            None => {}
        }

        let entry = FrameScore {
            frame,
            score: Some(score),
            time,
            error: false,
        };

        self.global_min = self.global_min.min(score);
        self.global_max = self.global_max.max(score);

        let replaces_best = match &self.best {
            None => true,
            Some(best) => best.valid_score().is_none_or(|best_score| score > best_score),
        };
        if replaces_best {
            self.best = Some(entry.clone());
        }

        self.scores.insert(frame, entry);
        self.scored += 1;
        self.version += 1;
        true
    }

    /// Record a failed attempt for `frame`.
    ///
    /// Returns `false` if the frame already holds a successful score, which
    /// is never overwritten.
    pub fn record_error(&mut self, frame: u64, time: f64) -> bool {
        match self.scores.get(&frame) {
            Some(entry) if !entry.error => return false,
            Some(_) => {}
            None => self.failed += 1,
        }

        self.scores.insert(
            frame,
            FrameScore {
                frame,
                score: None,
                time,
                error: true,
            },
        );
        self.version += 1;
        true
    }

    /// The sharpest frame seen so far.
    pub fn best(&self) -> Option<&FrameScore> {
        self.best.as_ref()
    }

    /// The recorded outcome for `frame`.
    pub fn get(&self, frame: u64) -> Option<&FrameScore> {
        self.scores.get(&frame)
    }

    /// Whether `frame` holds a successful score.
    pub fn is_scored(&self, frame: u64) -> bool {
        self.scores.get(&frame).is_some_and(|entry| !entry.error)
    }

    /// Whether `frame` still lacks a successful score.
    pub fn needs_analysis(&self, frame: u64) -> bool {
        !self.is_scored(frame)
    }

    /// `(global_min, global_max)` over successful scores.
    pub fn score_range(&self) -> Option<(f64, f64)> {
        (self.scored > 0).then_some((self.global_min, self.global_max))
    }

    /// Map `score` to `[0, 1]` using the global range.
    ///
    /// Falls back to `0.5` when no range is known or it is degenerate.
    pub fn normalized(&self, score: f64) -> f64 {
        match self.score_range() {
            Some((min, max)) => normalize(score, min, max),
            None => NEUTRAL_NORMALIZED,
        }
    }

    /// Number of frames with a successful score.
    pub fn scored_count(&self) -> u64 {
        self.scored
    }

    /// Number of frames whose latest attempt failed.
    pub fn failed_count(&self) -> u64 {
        self.failed
    }

    /// Number of frames with any recorded outcome.
    pub fn len(&self) -> usize {
        self.scores.len()
    }

    /// Whether nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    /// Incremented on every change.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// All recorded outcomes in frame order.
    pub fn iter(&self) -> impl Iterator<Item = &FrameScore> {
        self.scores.values()
    }

    /// Aggregate the window `[center - radius, center + radius]`, clipped to
    /// `[1, total_frames]`.
    ///
    /// Frames in `in_flight` are reported as pending.
    pub fn local_focus(
        &self,
        center: u64,
        radius: u64,
        total_frames: u64,
        in_flight: &HashSet<u64>,
    ) -> LocalFocus {
        let start = center.saturating_sub(radius).max(1);
        let end = center.saturating_add(radius).min(total_frames);
        if start > end {
            return LocalFocus::default();
        }

        let mut entries: Vec<FocusEntry> = (start..=end)
            .map(|frame| {
                let recorded = self.scores.get(&frame);
                let score = recorded.and_then(FrameScore::valid_score);
                FocusEntry {
                    frame,
                    score,
                    error: recorded.is_some_and(|entry| entry.error),
                    pending: in_flight.contains(&frame),
                    needs_analysis: score.is_none(),
                    normalized: NEUTRAL_NORMALIZED,
                    is_local_best: false,
                }
            })
            .collect();

        let mut min: Option<f64> = None;
        let mut max: Option<f64> = None;
        let mut best: Option<(usize, f64)> = None;
        for (index, score) in entries
            .iter()
            .enumerate()
            .filter_map(|(index, entry)| entry.score.map(|score| (index, score)))
        {
            min = Some(min.map_or(score, |current| current.min(score)));
            max = Some(max.map_or(score, |current| current.max(score)));
            if best.is_none_or(|(_, best_score)| score > best_score) {
                best = Some((index, score));
            }
        }

        if let (Some(low), Some(high)) = (min, max) {
            for entry in &mut entries {
                if let Some(score) = entry.score {
                    entry.normalized = normalize(score, low, high);
                }
            }
        }

        let best = best.map(|(index, _)| {
            entries[index].is_local_best = true;
            entries[index].frame
        });

        LocalFocus {
            entries,
            best,
            min,
            max,
        }
    }
}

fn normalize(score: f64, min: f64, max: f64) -> f64 {
    let range = max - min;
    if range <= SCORE_RANGE_EPSILON {
        NEUTRAL_NORMALIZED
    } else {
        ((score - min) / range).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── Recording ──────────────────────────────────────────────────────

    #[test]
    fn success_updates_best_and_range() {
        let mut store = ScoreStore::new();
        assert!(store.record_success(5, 1.5, 0.16));
        assert!(store.record_success(2, 0.5, 0.03));
        assert!(store.record_success(8, 2.5, 0.26));

        assert_eq!(store.best().map(|best| best.frame), Some(8));
        assert_eq!(store.score_range(), Some((0.5, 2.5)));
        assert_eq!(store.scored_count(), 3);
        assert_eq!(store.version(), 3);
    }

    #[test]
    fn best_keeps_first_on_equal_scores() {
        let mut store = ScoreStore::new();
        store.record_success(3, 1.0, 0.1);
        store.record_success(4, 1.0, 0.13);
        assert_eq!(store.best().map(|best| best.frame), Some(3));
    }

    #[test]
    fn error_never_overwrites_success() {
        let mut store = ScoreStore::new();
        store.record_success(3, 1.0, 0.1);
        let version = store.version();

        assert!(!store.record_error(3, 0.1));
        assert_eq!(store.get(3).and_then(FrameScore::valid_score), Some(1.0));
        assert_eq!(store.version(), version);
    }

    #[test]
    fn success_is_final() {
        let mut store = ScoreStore::new();
        store.record_success(3, 1.0, 0.1);
        assert!(!store.record_success(3, 9.0, 0.1));
        assert_eq!(store.get(3).and_then(|entry| entry.score), Some(1.0));
        assert_eq!(store.score_range(), Some((1.0, 1.0)));
    }

    #[test]
    fn success_supersedes_error() {
        let mut store = ScoreStore::new();
        assert!(store.record_error(6, 0.2));
        assert_eq!(store.failed_count(), 1);
        assert!(store.needs_analysis(6));
        assert!(store.best().is_none());
        assert_eq!(store.score_range(), None);

        assert!(store.record_success(6, 0.7, 0.2));
        assert_eq!(store.failed_count(), 0);
        assert_eq!(store.scored_count(), 1);
        assert!(!store.needs_analysis(6));
    }

    #[test]
    fn range_bounds_every_success() {
        let mut store = ScoreStore::new();
        let scores = [0.3, 1.9, -0.2, 0.0, 7.5, 2.2, 1.1];
        for (index, score) in scores.iter().enumerate() {
            store.record_success(index as u64 + 1, *score, 0.0);
            store.record_error(100 + index as u64, 0.0);
        }

        let (min, max) = store.score_range().expect("range");
        for entry in store.iter() {
            if let Some(score) = entry.valid_score() {
                assert!(min <= score && score <= max);
            }
        }
        assert_eq!((min, max), (-0.2, 7.5));
    }

    #[test]
    fn normalized_falls_back_for_degenerate_range() {
        let mut store = ScoreStore::new();
        assert_eq!(store.normalized(3.0), 0.5);
        store.record_success(1, 2.0, 0.0);
        assert_eq!(store.normalized(2.0), 0.5);
        store.record_success(2, 4.0, 0.0);
        assert_eq!(store.normalized(3.0), 0.5);
        assert_eq!(store.normalized(4.0), 1.0);
    }

    #[test]
    fn near_flat_scores_normalize_to_neutral() {
        let mut store = ScoreStore::new();
        store.record_success(1, 10.0, 0.0);
        store.record_success(2, 10.0005, 0.04);
        assert_eq!(store.normalized(10.0005), 0.5);

        store.record_success(3, 10.004, 0.08);
        assert_eq!(store.normalized(10.004), 1.0);
        assert_eq!(store.normalized(10.0), 0.0);
    }

    // ── Local focus ────────────────────────────────────────────────────

    #[test]
    fn local_focus_window_is_clipped() {
        let store = ScoreStore::new();
        let focus = store.local_focus(2, 3, 4, &HashSet::new());
        let frames: Vec<u64> = focus.entries.iter().map(|entry| entry.frame).collect();
        assert_eq!(frames, vec![1, 2, 3, 4]);
        assert!(focus.best.is_none());
        assert!(focus.entries.iter().all(|entry| entry.needs_analysis));
        assert!(focus.entries.iter().all(|entry| entry.normalized == 0.5));
    }

    #[test]
    fn local_focus_marks_first_maximum() {
        let mut store = ScoreStore::new();
        store.record_success(4, 1.0, 0.0);
        store.record_success(5, 3.0, 0.0);
        store.record_success(6, 3.0, 0.0);
        store.record_error(7, 0.0);
        store.record_success(20, 99.0, 0.0);

        let in_flight: HashSet<u64> = [3].into_iter().collect();
        let focus = store.local_focus(5, 2, 100, &in_flight);

        assert_eq!(focus.best, Some(5));
        assert_eq!(focus.best_entry().map(|entry| entry.frame), Some(5));
        assert_eq!(focus.min, Some(1.0));
        assert_eq!(focus.max, Some(3.0));

        let by_frame = |frame: u64| {
            focus
                .entries
                .iter()
                .find(|entry| entry.frame == frame)
                .expect("frame in window")
        };
        assert_eq!(by_frame(4).normalized, 0.0);
        assert_eq!(by_frame(5).normalized, 1.0);
        assert!(!by_frame(6).is_local_best);
        assert!(by_frame(7).error);
        assert!(by_frame(7).needs_analysis);
        assert_eq!(by_frame(7).normalized, 0.5);
        assert!(by_frame(3).pending);
    }

    #[test]
    fn local_focus_uses_neutral_value_for_flat_window() {
        let mut store = ScoreStore::new();
        store.record_success(1, 2.0, 0.0);
        store.record_success(2, 2.0005, 0.0);
        let focus = store.local_focus(1, 1, 2, &HashSet::new());
        assert!(focus.entries.iter().all(|entry| entry.normalized == 0.5));
        assert_eq!(focus.best, Some(2));
    }

    #[test]
    fn empty_grid_has_empty_window() {
        let store = ScoreStore::new();
        let focus = store.local_focus(1, 5, 0, &HashSet::new());
        assert!(focus.entries.is_empty());
        assert!(focus.best.is_none());
    }
}
