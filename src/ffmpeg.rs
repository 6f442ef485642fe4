//! FFmpeg-backed media resource.
//!
//! [`FfmpegResource`] implements [`MediaResource`] for a file on disk. Each
//! instance owns a dedicated decode thread holding its own demuxer, decoder
//! and scaler, so a playback instance and an analysis instance opened on the
//! same file never disturb each other. Seek and draw requests are handed to
//! that thread and answered asynchronously.
//!
//! The module also exposes FFmpeg's own log verbosity, which is separate
//! from the `log` crate output of this library.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use sharpframe::{AnalysisOptions, Analyzer, FfmpegLogLevel, FfmpegResource};
//!
//! # async fn example() -> Result<(), sharpframe::SharpframeError> {
//! sharpframe::set_ffmpeg_log_level(FfmpegLogLevel::Error);
//!
//! let (resource, info) = FfmpegResource::open("input.mp4")?;
//! let analyzer = Analyzer::new(Arc::new(resource), info, AnalysisOptions::new());
//! analyzer.wait_idle().await?;
//! # Ok(())
//! # }
//! ```

use std::mem;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;

use async_trait::async_trait;
use ffmpeg_next::{
    Rational,
    codec::context::Context as CodecContext,
    decoder::Video as VideoDecoder,
    format::{Pixel, context::Input},
    frame::Video as VideoFrame,
    media::Type,
    software::scaling::{Context as ScalingContext, Flags as ScalingFlags},
    util::log::Level,
};
use image::RgbaImage;
use tokio::sync::oneshot;

use crate::error::SharpframeError;
use crate::metadata::VideoInfo;
use crate::resource::{MediaResource, ReadyState};

/// Microseconds per second, the unit of container-level seek timestamps.
const AV_TIME_BASE: f64 = 1_000_000.0;

enum DecodeCommand {
    Seek {
        time: f64,
        reply: oneshot::Sender<Result<(), SharpframeError>>,
    },
    Draw {
        width: u32,
        height: u32,
        reply: oneshot::Sender<Result<RgbaImage, SharpframeError>>,
    },
}

/// State readable without a round-trip to the decode thread.
struct Shared {
    position: AtomicU64,
    ready: AtomicU8,
}

impl Shared {
    fn set_position(&self, time: f64) {
        self.position.store(time.to_bits(), Ordering::Release);
    }

    fn set_ready(&self, state: ReadyState) {
        self.ready.store(state as u8, Ordering::Release);
    }
}

/// A video file decoded by FFmpeg on a dedicated thread.
#[derive(Debug)]
pub struct FfmpegResource {
    commands: Sender<DecodeCommand>,
    shared: Arc<Shared>,
    info: VideoInfo,
    path: PathBuf,
}

impl std::fmt::Debug for Shared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shared")
            .field("position", &f64::from_bits(self.position.load(Ordering::Acquire)))
            .field("ready", &self.ready.load(Ordering::Acquire))
            .finish()
    }
}

impl FfmpegResource {
    /// Open `path` and start its decode thread.
    ///
    /// Returns the resource together with the frame grid of its best video
    /// stream. Open the same file twice to get independent playback and
    /// analysis instances.
    ///
    /// # Errors
    ///
    /// - [`SharpframeError::MediaOpen`] if FFmpeg cannot open the file.
    /// - [`SharpframeError::NoVideoStream`] if it has no video stream.
    /// - [`SharpframeError::IoError`] if the decode thread cannot be spawned.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<(Self, VideoInfo), SharpframeError> {
        let path = path.as_ref().to_path_buf();
        log::debug!("Opening media file: {}", path.display());

        let shared = Arc::new(Shared {
            position: AtomicU64::new(0.0_f64.to_bits()),
            ready: AtomicU8::new(ReadyState::Nothing as u8),
        });
        let (commands, queue) = mpsc::channel();
        let (opened, opening) = mpsc::sync_channel(1);

        let thread_path = path.clone();
        let thread_shared = Arc::clone(&shared);
        thread::Builder::new()
            .name("sharpframe-decode".to_string())
            .spawn(move || match DecodeThread::open(&thread_path, thread_shared) {
                Ok((decode_thread, info)) => {
                    let _ = opened.send(Ok(info));
                    decode_thread.serve(queue);
                }
                Err(error) => {
                    let _ = opened.send(Err(error));
                }
            })?;

        let info = opening.recv().map_err(|_| {
            SharpframeError::MediaOpen(format!("{}: decode thread exited", path.display()))
        })??;

        log::debug!(
            "Opened {} ({} frames at {:.3} fps, {}x{})",
            path.display(),
            info.total_frames,
            info.frame_rate,
            info.width,
            info.height
        );

        Ok((
            Self {
                commands,
                shared,
                info,
                path,
            },
            info,
        ))
    }

    /// Frame grid of the opened stream.
    pub fn info(&self) -> &VideoInfo {
        &self.info
    }

    /// Path the resource was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn send(&self, command: DecodeCommand) -> Result<(), SharpframeError> {
        self.commands
            .send(command)
            .map_err(|_| SharpframeError::VideoDecodeError("decode thread has stopped".to_string()))
    }
}

#[async_trait]
impl MediaResource for FfmpegResource {
    fn position(&self) -> f64 {
        f64::from_bits(self.shared.position.load(Ordering::Acquire))
    }

    fn ready_state(&self) -> ReadyState {
        match self.shared.ready.load(Ordering::Acquire) {
            0 => ReadyState::Nothing,
            1 => ReadyState::Metadata,
            2 => ReadyState::CurrentData,
            3 => ReadyState::FutureData,
            _ => ReadyState::EnoughData,
        }
    }

    fn dimensions(&self) -> (u32, u32) {
        (self.info.width, self.info.height)
    }

    fn duration(&self) -> f64 {
        self.info.duration
    }

    async fn seek_to(&self, time: f64) -> Result<(), SharpframeError> {
        let (reply, response) = oneshot::channel();
        self.send(DecodeCommand::Seek { time, reply })?;
        response.await.map_err(|_| SharpframeError::SeekFailed {
            target: time,
            reason: "decode thread stopped".to_string(),
        })?
    }

    async fn draw(&self, width: u32, height: u32) -> Result<RgbaImage, SharpframeError> {
        let (reply, response) = oneshot::channel();
        self.send(DecodeCommand::Draw {
            width,
            height,
            reply,
        })?;
        response
            .await
            .map_err(|_| SharpframeError::SampleFailed("decode thread stopped".to_string()))?
    }
}

/// Everything owned by the decode thread.
struct DecodeThread {
    input: Input,
    decoder: VideoDecoder,
    stream_index: usize,
    time_base: Rational,
    frame_duration: f64,
    current: Option<VideoFrame>,
    scaler: Option<(ScalingContext, u32, u32)>,
    shared: Arc<Shared>,
}

impl DecodeThread {
    fn open(path: &Path, shared: Arc<Shared>) -> Result<(Self, VideoInfo), SharpframeError> {
        ffmpeg_next::init().map_err(|error| {
            SharpframeError::MediaOpen(format!("FFmpeg initialisation failed: {error}"))
        })?;

        let input = ffmpeg_next::format::input(&path)
            .map_err(|error| SharpframeError::MediaOpen(format!("{}: {error}", path.display())))?;

        let stream = input
            .streams()
            .best(Type::Video)
            .ok_or(SharpframeError::NoVideoStream)?;
        let stream_index = stream.index();
        let time_base = stream.time_base();

        let frame_rate = stream.avg_frame_rate();
        let frames_per_second = if frame_rate.denominator() != 0 && frame_rate.numerator() != 0 {
            frame_rate.numerator() as f64 / frame_rate.denominator() as f64
        } else {
            let rate = stream.rate();
            if rate.denominator() != 0 {
                rate.numerator() as f64 / rate.denominator() as f64
            } else {
                0.0
            }
        };

        let decoder = CodecContext::from_parameters(stream.parameters())?
            .decoder()
            .video()?;

        let duration = match input.duration() {
            micros if micros > 0 => micros as f64 / AV_TIME_BASE,
            _ => 0.0,
        };
        let info = VideoInfo::from_duration(duration, frames_per_second)
            .with_dimensions(decoder.width(), decoder.height());

        shared.set_ready(ReadyState::Metadata);

        Ok((
            Self {
                input,
                decoder,
                stream_index,
                time_base,
                frame_duration: 1.0 / info.frame_rate,
                current: None,
                scaler: None,
                shared,
            },
            info,
        ))
    }

    fn serve(mut self, queue: Receiver<DecodeCommand>) {
        while let Ok(command) = queue.recv() {
            match command {
                DecodeCommand::Seek { time, reply } => {
                    let result = self.seek(time);
                    if let Err(error) = &result {
                        log::warn!("Seek to {time:.3}s failed: {error}");
                    }
                    let _ = reply.send(result);
                }
                DecodeCommand::Draw {
                    width,
                    height,
                    reply,
                } => {
                    let _ = reply.send(self.draw(width, height));
                }
            }
        }
        log::debug!("Decode thread stopping");
    }

    /// Seek to the keyframe before `time` and decode up to the frame that
    /// contains it.
    fn seek(&mut self, time: f64) -> Result<(), SharpframeError> {
        self.shared.set_ready(ReadyState::Metadata);
        self.current = None;

        let timestamp = (time.max(0.0) * AV_TIME_BASE) as i64;
        self.input.seek(timestamp, ..timestamp)?;
        self.decoder.flush();

        let mut decoded = VideoFrame::empty();
        let mut last: Option<VideoFrame> = None;
        let mut found: Option<VideoFrame> = None;

        'packets: for (stream, packet) in self.input.packets() {
            if stream.index() != self.stream_index {
                continue;
            }
            self.decoder.send_packet(&packet)?;

            while self.decoder.receive_frame(&mut decoded).is_ok() {
                let frame_time = pts_to_seconds(decoded.pts().unwrap_or(0), self.time_base);
                let frame = mem::replace(&mut decoded, VideoFrame::empty());
                if frame_time + self.frame_duration > time {
                    found = Some(frame);
                    break 'packets;
                }
                last = Some(frame);
            }
        }

        if let Some(frame) = found {
            self.settle(frame, time, ReadyState::EnoughData);
            return Ok(());
        }

        // Past the last packet: the target lies in the decoder's tail.
        self.decoder.send_eof()?;
        while self.decoder.receive_frame(&mut decoded).is_ok() {
            let frame_time = pts_to_seconds(decoded.pts().unwrap_or(0), self.time_base);
            let frame = mem::replace(&mut decoded, VideoFrame::empty());
            if frame_time + self.frame_duration > time {
                self.settle(frame, time, ReadyState::CurrentData);
                return Ok(());
            }
            last = Some(frame);
        }

        match last {
            Some(frame) => {
                self.settle(frame, time, ReadyState::CurrentData);
                Ok(())
            }
            None => Err(SharpframeError::SeekFailed {
                target: time,
                reason: "no frame decoded after seek".to_string(),
            }),
        }
    }

    fn settle(&mut self, frame: VideoFrame, time: f64, ready: ReadyState) {
        self.current = Some(frame);
        self.shared.set_position(time);
        self.shared.set_ready(ready);
    }

    fn draw(&mut self, width: u32, height: u32) -> Result<RgbaImage, SharpframeError> {
        let frame = self.current.as_ref().ok_or(SharpframeError::NotReady)?;

        let reuse = matches!(&self.scaler, Some((_, w, h)) if *w == width && *h == height);
        if !reuse {
            let scaler = ScalingContext::get(
                frame.format(),
                frame.width(),
                frame.height(),
                Pixel::RGBA,
                width,
                height,
                ScalingFlags::BILINEAR,
            )?;
            self.scaler = Some((scaler, width, height));
        }

        let mut rgba = VideoFrame::empty();
        if let Some((scaler, _, _)) = self.scaler.as_mut() {
            scaler.run(frame, &mut rgba)?;
        }

        let buffer = packed_rows(&rgba, width, height);
        RgbaImage::from_raw(width, height, buffer).ok_or_else(|| {
            SharpframeError::SampleFailed(format!("scaled frame does not fill {width}x{height}"))
        })
    }
}

/// Copy an RGBA frame into a tightly packed buffer, dropping row padding.
fn packed_rows(frame: &VideoFrame, width: u32, height: u32) -> Vec<u8> {
    let stride = frame.stride(0);
    let row_bytes = width as usize * 4;
    let data = frame.data(0);

    if stride == row_bytes {
        return data[..row_bytes * height as usize].to_vec();
    }
    let mut buffer = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        buffer.extend_from_slice(&data[start..start + row_bytes]);
    }
    buffer
}

fn pts_to_seconds(pts: i64, time_base: Rational) -> f64 {
    pts as f64 * time_base.numerator() as f64 / time_base.denominator() as f64
}

/// FFmpeg's internal log verbosity, from silent to most verbose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FfmpegLogLevel {
    /// No output at all.
    Quiet,
    /// Conditions that abort the process.
    Panic,
    /// Unrecoverable errors.
    Fatal,
    /// Recoverable errors.
    Error,
    /// Warnings (FFmpeg's default).
    Warning,
    /// Informational messages.
    Info,
    /// Verbose informational messages.
    Verbose,
    /// Debugging messages.
    Debug,
    /// Extremely verbose tracing.
    Trace,
}

impl From<FfmpegLogLevel> for Level {
    fn from(level: FfmpegLogLevel) -> Self {
        match level {
            FfmpegLogLevel::Quiet => Level::Quiet,
            FfmpegLogLevel::Panic => Level::Panic,
            FfmpegLogLevel::Fatal => Level::Fatal,
            FfmpegLogLevel::Error => Level::Error,
            FfmpegLogLevel::Warning => Level::Warning,
            FfmpegLogLevel::Info => Level::Info,
            FfmpegLogLevel::Verbose => Level::Verbose,
            FfmpegLogLevel::Debug => Level::Debug,
            FfmpegLogLevel::Trace => Level::Trace,
        }
    }
}

impl From<Level> for FfmpegLogLevel {
    fn from(level: Level) -> Self {
        match level {
            Level::Quiet => FfmpegLogLevel::Quiet,
            Level::Panic => FfmpegLogLevel::Panic,
            Level::Fatal => FfmpegLogLevel::Fatal,
            Level::Error => FfmpegLogLevel::Error,
            Level::Warning => FfmpegLogLevel::Warning,
            Level::Info => FfmpegLogLevel::Info,
            Level::Verbose => FfmpegLogLevel::Verbose,
            Level::Debug => FfmpegLogLevel::Debug,
            Level::Trace => FfmpegLogLevel::Trace,
        }
    }
}

/// Set what FFmpeg itself prints to stderr.
pub fn set_ffmpeg_log_level(level: FfmpegLogLevel) {
    ffmpeg_next::util::log::set_level(level.into());
}

/// FFmpeg's current log verbosity, if it maps to a known level.
pub fn get_ffmpeg_log_level() -> Option<FfmpegLogLevel> {
    ffmpeg_next::util::log::get_level().ok().map(FfmpegLogLevel::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_level_round_trips_through_ffmpeg() {
        for level in [
            FfmpegLogLevel::Quiet,
            FfmpegLogLevel::Error,
            FfmpegLogLevel::Warning,
            FfmpegLogLevel::Trace,
        ] {
            assert_eq!(FfmpegLogLevel::from(Level::from(level)), level);
        }
    }

    #[test]
    fn pts_is_scaled_by_time_base() {
        let seconds = pts_to_seconds(3003, Rational::new(1, 30000));
        assert!((seconds - 0.1001).abs() < 1e-9);
    }

    #[test]
    fn missing_file_is_a_media_open_error() {
        let result = FfmpegResource::open("/definitely/not/here.mp4");
        assert!(matches!(result, Err(SharpframeError::MediaOpen(_))));
    }
}
