//! An in-memory media resource for integration tests.
//!
//! `SyntheticVideo` renders a checkerboard whose contrast peaks at one frame,
//! so the sharpest frame of the clip is known in advance.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU8, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use image::{Rgba, RgbaImage};
use sharpframe::utilities::time_to_frame;
use sharpframe::{MediaResource, ReadyState, SharpframeError, VideoInfo};

pub struct SyntheticVideo {
    info: VideoInfo,
    sharpest: u64,
    position: AtomicU64,
    ready: AtomicU8,
    seek_delay: Duration,
    failing: HashSet<u64>,
    stuck_ready: Option<ReadyState>,
    seeks: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    drawn: Mutex<Vec<u64>>,
}

impl SyntheticVideo {
    /// A 1920x1080 clip of `total_frames` frames at 30 fps.
    pub fn new(total_frames: u64, sharpest: u64) -> Self {
        Self {
            info: VideoInfo::new(total_frames, 30.0).with_dimensions(1920, 1080),
            sharpest,
            position: AtomicU64::new(0f64.to_bits()),
            ready: AtomicU8::new(ready_to_u8(ReadyState::Metadata)),
            seek_delay: Duration::ZERO,
            failing: HashSet::new(),
            stuck_ready: None,
            seeks: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            drawn: Mutex::new(Vec::new()),
        }
    }

    pub fn with_dimensions(mut self, width: u32, height: u32) -> Self {
        self.info = self.info.with_dimensions(width, height);
        self
    }

    pub fn with_seek_delay(mut self, delay: Duration) -> Self {
        self.seek_delay = delay;
        self
    }

    /// Seeks landing on any of `frames` fail.
    pub fn with_failing_frames(mut self, frames: impl IntoIterator<Item = u64>) -> Self {
        self.failing.extend(frames);
        self
    }

    /// Report `state` after every seek instead of `EnoughData`.
    pub fn with_stuck_ready_state(mut self, state: ReadyState) -> Self {
        self.stuck_ready = Some(state);
        self
    }

    pub fn info(&self) -> VideoInfo {
        self.info
    }

    pub fn seek_count(&self) -> usize {
        self.seeks.load(Ordering::SeqCst)
    }

    pub fn max_concurrent_seeks(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn drawn_frames(&self) -> Vec<u64> {
        self.drawn.lock().expect("drawn lock").clone()
    }

    fn current_frame(&self) -> u64 {
        time_to_frame(self.position(), self.info.frame_rate, self.info.total_frames)
    }

    /// Checkerboard contrast for `frame`, largest at the sharpest frame.
    fn amplitude(&self, frame: u64) -> u8 {
        let distance = frame.abs_diff(self.sharpest);
        (240 / (1 + distance)) as u8
    }
}

#[async_trait]
impl MediaResource for SyntheticVideo {
    fn position(&self) -> f64 {
        f64::from_bits(self.position.load(Ordering::SeqCst))
    }

    fn ready_state(&self) -> ReadyState {
        ready_from_u8(self.ready.load(Ordering::SeqCst))
    }

    fn dimensions(&self) -> (u32, u32) {
        (self.info.width, self.info.height)
    }

    fn duration(&self) -> f64 {
        self.info.duration
    }

    async fn seek_to(&self, time: f64) -> Result<(), SharpframeError> {
        self.seeks.fetch_add(1, Ordering::SeqCst);
        let concurrent = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(concurrent, Ordering::SeqCst);

        if !self.seek_delay.is_zero() {
            tokio::time::sleep(self.seek_delay).await;
        }
        self.position.store(time.to_bits(), Ordering::SeqCst);
        let ready = self.stuck_ready.unwrap_or(ReadyState::EnoughData);
        self.ready.store(ready_to_u8(ready), Ordering::SeqCst);

        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let frame = self.current_frame();
        if self.failing.contains(&frame) {
            return Err(SharpframeError::SeekFailed {
                target: time,
                reason: format!("frame {frame} is corrupt"),
            });
        }
        Ok(())
    }

    async fn draw(&self, width: u32, height: u32) -> Result<RgbaImage, SharpframeError> {
        let frame = self.current_frame();
        self.drawn.lock().expect("drawn lock").push(frame);

        let half = self.amplitude(frame) / 2;
        let (low, high) = (128 - half, 128 + half);
        Ok(RgbaImage::from_fn(width, height, |x, y| {
            let value = if (x / 2 + y / 2) % 2 == 0 { low } else { high };
            Rgba([value, value, value, 255])
        }))
    }
}

fn ready_to_u8(state: ReadyState) -> u8 {
    match state {
        ReadyState::Nothing => 0,
        ReadyState::Metadata => 1,
        ReadyState::CurrentData => 2,
        ReadyState::FutureData => 3,
        ReadyState::EnoughData => 4,
    }
}

fn ready_from_u8(value: u8) -> ReadyState {
    match value {
        0 => ReadyState::Nothing,
        1 => ReadyState::Metadata,
        2 => ReadyState::CurrentData,
        3 => ReadyState::FutureData,
        _ => ReadyState::EnoughData,
    }
}
