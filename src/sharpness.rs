//! Perceptual sharpness scoring.
//!
//! The score blends five classic focus measures computed in a single pass
//! over the luminance of an RGBA buffer:
//!
//! | Measure | Weight |
//! |---------|--------|
//! | Variance of the 4-neighbour Laplacian | 0.30 |
//! | Tenengrad (mean Sobel energy) | 0.25 |
//! | Brenner gradient (two-pixel differences) | 0.20 |
//! | Strong-edge ratio (approximate) | 0.15 |
//! | Global RMS contrast | 0.10 |
//!
//! The first three are log-compressed so that no single measure dominates.
//! Larger is sharper. Scores are only comparable between frames of the same
//! video at the same analysis resolution.
//!
//! # Example
//!
//! ```
//! use image::{Rgba, RgbaImage};
//!
//! let flat = RgbaImage::from_pixel(32, 32, Rgba([0, 0, 0, 255]));
//! assert_eq!(sharpframe::sharpness::score_image(&flat), 0.0);
//! ```

use image::RgbaImage;

use crate::error::SharpframeError;
use crate::worker_pool::ScoreKernel;

const LAPLACIAN_WEIGHT: f64 = 0.30;
const TENENGRAD_WEIGHT: f64 = 0.25;
const BRENNER_WEIGHT: f64 = 0.20;
const EDGE_RATIO_WEIGHT: f64 = 0.15;
const CONTRAST_WEIGHT: f64 = 0.10;

/// Tail mass scale used by the edge-ratio approximation.
const EDGE_TAIL_FACTOR: f64 = 0.159;
const GRADIENT_EPSILON: f64 = 1e-7;
/// RMS contrast is expressed relative to half the 8-bit range.
const CONTRAST_SCALE: f64 = 128.0;

/// The individual focus measures behind a sharpness score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SharpnessMetrics {
    /// `mean(lap²) - mean(lap)²`, clamped to be non-negative.
    pub laplacian_variance: f64,
    /// Sum of squared Sobel gradient magnitudes over the interior.
    pub tenengrad: f64,
    /// Sum of squared two-pixel differences (right and below).
    pub brenner: f64,
    /// Approximate fraction of strong-edge pixels in `[0, 1]`.
    ///
    /// Derived from the mean and standard deviation of the gradient energy
    /// under a near-Gaussian assumption; it is not an exact pixel count.
    pub edge_ratio: f64,
    /// Root-mean-square deviation of luminance from the global mean.
    pub rms_contrast: f64,
    /// Number of interior pixels visited, `(w - 2) * (h - 2)`.
    pub processed: u64,
}

impl SharpnessMetrics {
    /// Compute all measures for an RGBA buffer.
    ///
    /// Returns `Ok(None)` when the image is smaller than 3×3, which has no
    /// interior to analyse.
    ///
    /// # Errors
    ///
    /// Returns [`SharpframeError::InvalidBuffer`] if `pixels` holds fewer
    /// than `width * height * 4` bytes.
    pub fn compute(
        pixels: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Option<Self>, SharpframeError> {
        if width < 3 || height < 3 {
            return Ok(None);
        }

        let w = width as usize;
        let h = height as usize;
        if pixels.len() < w * h * 4 {
            return Err(SharpframeError::InvalidBuffer {
                width,
                height,
                actual: pixels.len(),
            });
        }

        let gray = luminance(pixels, w * h);
        let pixel_count = (w * h) as f64;
        let mean_gray = gray.iter().sum::<f64>() / pixel_count;

        let mut laplacian_sum = 0.0;
        let mut laplacian_squares = 0.0;
        let mut gradient_sum = 0.0;
        let mut gradient_squares = 0.0;
        let mut brenner = 0.0;

        for y in 1..h - 1 {
            let above = (y - 1) * w;
            let row = y * w;
            let below = (y + 1) * w;

            for x in 1..w - 1 {
                let center = gray[row + x];
                let left = gray[row + x - 1];
                let right = gray[row + x + 1];
                let top = gray[above + x];
                let bottom = gray[below + x];

                let laplacian = left + right + top + bottom - 4.0 * center;
                laplacian_sum += laplacian;
                laplacian_squares += laplacian * laplacian;

                let top_left = gray[above + x - 1];
                let top_right = gray[above + x + 1];
                let bottom_left = gray[below + x - 1];
                let bottom_right = gray[below + x + 1];

                let gx = (top_right + 2.0 * right + bottom_right)
                    - (top_left + 2.0 * left + bottom_left);
                let gy = (bottom_left + 2.0 * bottom + bottom_right)
                    - (top_left + 2.0 * top + top_right);
                let energy = gx * gx + gy * gy;
                gradient_sum += energy;
                gradient_squares += energy * energy;

                if x + 2 < w {
                    let diff = gray[row + x + 2] - center;
                    brenner += diff * diff;
                }
                if y + 2 < h {
                    let diff = gray[row + 2 * w + x] - center;
                    brenner += diff * diff;
                }
            }
        }

        let variance_sum: f64 = gray
            .iter()
            .map(|value| {
                let diff = value - mean_gray;
                diff * diff
            })
            .sum();
        let rms_contrast = (variance_sum / pixel_count).sqrt();

        let processed = ((w - 2) * (h - 2)) as f64;
        let laplacian_mean = laplacian_sum / processed;
        let laplacian_variance =
            (laplacian_squares / processed - laplacian_mean * laplacian_mean).max(0.0);

        let gradient_mean = gradient_sum / processed;
        let gradient_variance =
            (gradient_squares / processed - gradient_mean * gradient_mean).max(0.0);
        let gradient_std = gradient_variance.sqrt();
        let edge_ratio =
            (EDGE_TAIL_FACTOR * gradient_std / (gradient_mean + GRADIENT_EPSILON)).min(1.0);

        Ok(Some(Self {
            laplacian_variance,
            tenengrad: gradient_sum,
            brenner,
            edge_ratio,
            rms_contrast,
            processed: processed as u64,
        }))
    }

    /// Blend the measures into a single score.
    pub fn score(&self) -> f64 {
        let processed = self.processed as f64;
        LAPLACIAN_WEIGHT * (self.laplacian_variance + 1.0).log10()
            + TENENGRAD_WEIGHT * (self.tenengrad / processed + 1.0).log10()
            + BRENNER_WEIGHT * (self.brenner / processed + 1.0).log10()
            + EDGE_RATIO_WEIGHT * self.edge_ratio
            + CONTRAST_WEIGHT * (self.rms_contrast / CONTRAST_SCALE)
    }
}

/// Score an RGBA buffer. Larger is sharper.
///
/// Returns `0.0` for images smaller than 3×3 and for buffers too short to
/// hold `width * height` pixels. Use [`try_score`] to distinguish the latter.
pub fn score(pixels: &[u8], width: u32, height: u32) -> f64 {
    try_score(pixels, width, height).unwrap_or(0.0)
}

/// Score an RGBA buffer, reporting malformed buffers as errors.
///
/// # Errors
///
/// Returns [`SharpframeError::InvalidBuffer`] if `pixels` is too short.
pub fn try_score(pixels: &[u8], width: u32, height: u32) -> Result<f64, SharpframeError> {
    Ok(SharpnessMetrics::compute(pixels, width, height)?
        .map(|metrics| metrics.score())
        .unwrap_or(0.0))
}

/// Score an [`RgbaImage`].
pub fn score_image(image: &RgbaImage) -> f64 {
    score(image.as_raw(), image.width(), image.height())
}

/// The stock [`ScoreKernel`] run by the worker pool.
#[derive(Debug, Clone, Copy, Default)]
pub struct SharpnessKernel;

impl ScoreKernel for SharpnessKernel {
    fn score(&self, pixels: &[u8], width: u32, height: u32) -> Result<f64, String> {
        try_score(pixels, width, height).map_err(|error| error.to_string())
    }
}

/// Rec. 709 luma of each RGBA pixel; alpha is ignored.
fn luminance(pixels: &[u8], count: usize) -> Vec<f64> {
    pixels
        .chunks_exact(4)
        .take(count)
        .map(|px| 0.2126 * px[0] as f64 + 0.7152 * px[1] as f64 + 0.0722 * px[2] as f64)
        .collect()
}

#[cfg(test)]
mod tests {
    use image::{Rgba, RgbaImage, imageops};

    use super::*;

    fn stripes(width: u32, height: u32, period: u32) -> RgbaImage {
        RgbaImage::from_fn(width, height, |x, _| {
            if (x / period) % 2 == 0 {
                Rgba([20, 20, 20, 255])
            } else {
                Rgba([235, 235, 235, 255])
            }
        })
    }

    #[test]
    fn degenerate_sizes_score_zero() {
        let buffer = vec![255_u8; 64];
        assert_eq!(score(&buffer, 2, 8), 0.0);
        assert_eq!(score(&buffer, 8, 2), 0.0);
        assert_eq!(score(&[], 0, 0), 0.0);
    }

    #[test]
    fn flat_image_scores_zero() {
        let black = RgbaImage::from_pixel(16, 9, Rgba([0, 0, 0, 255]));
        assert_eq!(score_image(&black), 0.0);

        let tinted = RgbaImage::from_pixel(16, 9, Rgba([90, 140, 200, 255]));
        assert!(score_image(&tinted).abs() < 1e-9);
    }

    #[test]
    fn scoring_is_deterministic() {
        let image = stripes(160, 90, 3);
        let first = score_image(&image);
        let second = score_image(&image);
        assert_eq!(first.to_bits(), second.to_bits());
    }

    #[test]
    fn sharp_stripes_beat_blurred_stripes() {
        let sharp = stripes(160, 90, 4);
        let blurred = imageops::blur(&sharp, 2.0);
        assert!(score_image(&sharp) > score_image(&blurred));
    }

    #[test]
    fn short_buffer_is_an_error() {
        let result = try_score(&[0_u8; 10], 4, 4);
        assert!(matches!(
            result,
            Err(SharpframeError::InvalidBuffer { actual: 10, .. })
        ));
        assert_eq!(score(&[0_u8; 10], 4, 4), 0.0);
    }

    #[test]
    fn single_bright_pixel_only_contributes_contrast() {
        let mut image = RgbaImage::from_pixel(3, 3, Rgba([0, 0, 0, 255]));
        image.put_pixel(1, 1, Rgba([255, 255, 255, 255]));

        let metrics = SharpnessMetrics::compute(image.as_raw(), 3, 3)
            .unwrap()
            .unwrap();
        assert_eq!(metrics.processed, 1);
        assert_eq!(metrics.laplacian_variance, 0.0);
        assert_eq!(metrics.tenengrad, 0.0);
        assert_eq!(metrics.brenner, 0.0);
        assert_eq!(metrics.edge_ratio, 0.0);

        let expected = CONTRAST_WEIGHT * metrics.rms_contrast / CONTRAST_SCALE;
        assert!((metrics.score() - expected).abs() < 1e-12);
        assert!(metrics.score() > 0.0);
    }

    #[test]
    fn edge_ratio_is_bounded() {
        let image = stripes(64, 64, 1);
        let metrics = SharpnessMetrics::compute(image.as_raw(), 64, 64)
            .unwrap()
            .unwrap();
        assert!((0.0..=1.0).contains(&metrics.edge_ratio));
    }

    #[test]
    fn kernel_reports_buffer_errors_as_strings() {
        let result = SharpnessKernel.score(&[0_u8; 3], 3, 3);
        assert!(result.unwrap_err().contains("too small"));
    }
}
