//! Additive Gaussian and signal-dependent Poisson noise.
//!
//! Both families optionally draw a single noise plane per sample that is shared
//! by every channel ("gray" noise), and both clamp the result to `[0, 1]`.

use ndarray::{Array2, Array4, ArrayView3, Axis};

use crate::config::StageConfig;
use crate::rng::RandomSource;

/// Luma weights used to derive the gray plane for Poisson noise.
const LUMA_WEIGHTS: [f32; 3] = [0.2989, 0.587, 0.114];

/// Noise family and its drawn intensity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Noise {
    /// Additive Gaussian noise; `sigma` is in 8-bit units.
    Gaussian { sigma: f64 },
    /// Poisson noise scaled by `scale`.
    Poisson { scale: f64 },
}

/// Noise drawn once per pipeline call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoiseParams {
    pub noise: Noise,
    /// One noise plane shared across channels.
    pub gray: bool,
}

impl NoiseParams {
    /// Draw family, intensity and gray flag from a stage's ranges.
    pub fn draw<R: RandomSource + ?Sized>(stage: &StageConfig, rng: &mut R) -> Self {
        let noise = if rng.uniform(0.0, 1.0) < stage.gaussian_noise_prob {
            Noise::Gaussian {
                sigma: rng.uniform(stage.noise_range.0, stage.noise_range.1),
            }
        } else {
            Noise::Poisson {
                scale: rng.uniform(stage.poisson_scale_range.0, stage.poisson_scale_range.1),
            }
        };
        let gray = rng.uniform(0.0, 1.0) < stage.gray_noise_prob;
        Self { noise, gray }
    }
}

/// Apply `params` to every sample of `batch` in place.
pub fn apply_noise<R: RandomSource + ?Sized>(batch: &mut Array4<f32>, params: &NoiseParams, rng: &mut R) {
    match params.noise {
        Noise::Gaussian { sigma } => add_gaussian_noise(batch, sigma, params.gray, rng),
        Noise::Poisson { scale } => add_poisson_noise(batch, scale, params.gray, rng),
    }
}

/// Add `N(0, (sigma / 255)^2)` noise and clamp to `[0, 1]`.
pub fn add_gaussian_noise<R: RandomSource + ?Sized>(
    batch: &mut Array4<f32>,
    sigma: f64,
    gray: bool,
    rng: &mut R,
) {
    let std = sigma / 255.0;
    for mut sample in batch.axis_iter_mut(Axis(0)) {
        if gray {
            let (_, h, w) = sample.dim();
            let plane = Array2::from_shape_simple_fn((h, w), || (rng.standard_normal() * std) as f32);
            for mut channel in sample.axis_iter_mut(Axis(0)) {
                channel.zip_mut_with(&plane, |v, &n| *v = (*v + n).clamp(0.0, 1.0));
            }
        } else {
            sample.mapv_inplace(|v| (v + (rng.standard_normal() * std) as f32).clamp(0.0, 1.0));
        }
    }
}

/// Quantize to 8-bit levels in float range.
#[inline]
fn quantize_level(v: f32) -> f32 {
    (v * 255.0).round().clamp(0.0, 255.0) / 255.0
}

/// `2^ceil(log2(n))` for the number of distinct 8-bit levels in `values`.
fn poisson_levels<'a>(values: impl Iterator<Item = &'a f32>) -> f64 {
    let mut seen = [false; 256];
    for &v in values {
        seen[(v * 255.0).round() as usize] = true;
    }
    let unique = seen.iter().filter(|&&s| s).count().max(1);
    2f64.powf((unique as f64).log2().ceil())
}

/// Poisson noise relative to the 8-bit quantized input.
fn poisson_noise_plane<R: RandomSource + ?Sized>(quantized: &Array2<f32>, rng: &mut R) -> Array2<f32> {
    let vals = poisson_levels(quantized.iter());
    quantized.mapv(|v| (rng.poisson(v as f64 * vals) / vals) as f32 - v)
}

fn gray_plane(sample: ArrayView3<f32>) -> Array2<f32> {
    let (c, h, w) = sample.dim();
    if c != LUMA_WEIGHTS.len() {
        return sample.index_axis(Axis(0), 0).to_owned();
    }
    let mut plane = Array2::zeros((h, w));
    for (channel, &weight) in sample.axis_iter(Axis(0)).zip(LUMA_WEIGHTS.iter()) {
        plane.scaled_add(weight, &channel);
    }
    plane
}

/// Add Poisson noise scaled by `scale` and clamp to `[0, 1]`.
pub fn add_poisson_noise<R: RandomSource + ?Sized>(
    batch: &mut Array4<f32>,
    scale: f64,
    gray: bool,
    rng: &mut R,
) {
    let scale = scale as f32;
    for mut sample in batch.axis_iter_mut(Axis(0)) {
        if gray {
            let quantized = gray_plane(sample.view()).mapv(quantize_level);
            let noise = poisson_noise_plane(&quantized, rng);
            for mut channel in sample.axis_iter_mut(Axis(0)) {
                channel.zip_mut_with(&noise, |v, &n| *v = (*v + n * scale).clamp(0.0, 1.0));
            }
        } else {
            let quantized = sample.mapv(quantize_level);
            let vals = poisson_levels(quantized.iter());
            sample.zip_mut_with(&quantized, |v, &q| {
                let n = (rng.poisson(q as f64 * vals) / vals) as f32 - q;
                *v = (*v + n * scale).clamp(0.0, 1.0);
            });
        }
    }
}
