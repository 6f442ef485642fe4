//! Frame number and presentation time conversions.
//!
//! Frame numbers are 1-based. A frame's presentation time is nudged a small
//! fraction of a frame past its start so a seek never lands exactly on the
//! boundary with the previous frame.

/// Presentation time (seconds) to seek to for `frame_number`.
///
/// `max(0, (frame - 1) / fps + offset_factor / fps)`.
pub fn frame_to_time(frame_number: u64, frames_per_second: f64, offset_factor: f64) -> f64 {
    let frame_duration = 1.0 / frames_per_second;
    (frame_number.saturating_sub(1) as f64 * frame_duration + offset_factor * frame_duration)
        .max(0.0)
}

/// The 1-based frame shown at `time` seconds, clamped to `[1, total_frames]`.
///
/// Returns `0` when the video has no frames.
pub fn time_to_frame(time: f64, frames_per_second: f64, total_frames: u64) -> u64 {
    if total_frames == 0 {
        return 0;
    }
    let frame = (time.max(0.0) * frames_per_second).floor() as u64 + 1;
    frame.clamp(1, total_frames)
}

/// Whether two presentation times are equal within `epsilon`.
pub fn times_match(a: f64, b: f64, epsilon: f64) -> bool {
    (a - b).abs() < epsilon
}
