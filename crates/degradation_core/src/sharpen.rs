//! Unsharp-mask sharpening of ground-truth images.
//!
//! The blur is a separable Gaussian applied as a row pass then a column pass
//! over mirror-padded buffers, which keeps the inner loop branch-free.
//! Sharpening is gated by a soft mask so flat regions are left untouched.

use ndarray::{Array2, Array4, ArrayView2, ArrayView4, Axis};
use rayon::prelude::*;

use crate::filtering::mirror_index;

/// Default kernel size of the sharpening blur.
const DEFAULT_RADIUS: usize = 50;

/// Default blend weight of the residual.
const DEFAULT_WEIGHT: f32 = 0.5;

/// Default residual threshold in 8-bit units.
const DEFAULT_THRESHOLD: f32 = 10.0;

/// Gaussian kernel of odd `size`; `sigma <= 0` derives sigma from the size.
pub fn gaussian_kernel_1d(size: usize, sigma: f64) -> Vec<f32> {
    let sigma = if sigma > 0.0 {
        sigma
    } else {
        0.3 * ((size as f64 - 1.0) * 0.5 - 1.0) + 0.8
    };
    let center = (size / 2) as f64;
    let raw: Vec<f64> = (0..size)
        .map(|i| {
            let x = i as f64 - center;
            (-x * x / (2.0 * sigma * sigma)).exp()
        })
        .collect();
    let sum: f64 = raw.iter().sum();
    raw.iter().map(|&v| (v / sum) as f32).collect()
}

/// Fill `padded` with `input` plus `radius` mirrored samples on each side.
#[inline]
fn fill_padded_row(input: &[f32], radius: usize, padded: &mut Vec<f32>) {
    let n = input.len();
    padded.clear();
    padded.extend((0..n + 2 * radius).map(|i| input[mirror_index(i as isize - radius as isize, n)]));
}

#[inline]
fn convolve_1d_padded(padded: &[f32], kernel: &[f32], output: &mut [f32]) {
    for (i, out) in output.iter_mut().enumerate() {
        *out = padded[i..i + kernel.len()]
            .iter()
            .zip(kernel)
            .map(|(p, k)| p * k)
            .sum();
    }
}

/// Separable blur of one plane.
fn blur_plane(plane: ArrayView2<f32>, kernel: &[f32]) -> Array2<f32> {
    let (rows, cols) = plane.dim();
    let radius = kernel.len() / 2;
    if rows == 0 || cols == 0 {
        return Array2::zeros((rows, cols));
    }

    let mut horizontal = Array2::<f32>::zeros((rows, cols));
    let mut line = Vec::with_capacity(rows.max(cols));
    let mut padded = Vec::with_capacity(rows.max(cols) + 2 * radius);
    let mut out = vec![0.0f32; rows.max(cols)];

    for r in 0..rows {
        line.clear();
        line.extend(plane.row(r).iter().copied());
        fill_padded_row(&line, radius, &mut padded);
        convolve_1d_padded(&padded, kernel, &mut out[..cols]);
        for (dst, &v) in horizontal.row_mut(r).iter_mut().zip(&out[..cols]) {
            *dst = v;
        }
    }

    let mut output = Array2::<f32>::zeros((rows, cols));
    for c in 0..cols {
        line.clear();
        line.extend(horizontal.column(c).iter().copied());
        fill_padded_row(&line, radius, &mut padded);
        convolve_1d_padded(&padded, kernel, &mut out[..rows]);
        for (dst, &v) in output.column_mut(c).iter_mut().zip(&out[..rows]) {
            *dst = v;
        }
    }
    output
}

/// Unsharp-mask sharpener.
#[derive(Debug, Clone)]
pub struct UsmSharpener {
    kernel: Vec<f32>,
    weight: f32,
    threshold: f32,
}

impl Default for UsmSharpener {
    fn default() -> Self {
        Self::new(DEFAULT_RADIUS, DEFAULT_WEIGHT, DEFAULT_THRESHOLD)
    }
}

impl UsmSharpener {
    /// `radius` is rounded up to an odd kernel size.
    pub fn new(radius: usize, weight: f32, threshold: f32) -> Self {
        let size = if radius % 2 == 0 { radius + 1 } else { radius };
        Self {
            kernel: gaussian_kernel_1d(size, 0.0),
            weight,
            threshold,
        }
    }

    fn sharpen_plane(&self, plane: ArrayView2<f32>) -> Array2<f32> {
        let blur = blur_plane(plane, &self.kernel);
        let residual = &plane - &blur;
        let mask = residual.mapv(|r| if r.abs() * 255.0 > self.threshold { 1.0 } else { 0.0 });
        let soft = blur_plane(mask.view(), &self.kernel);

        let mut out = Array2::zeros(plane.raw_dim());
        ndarray::Zip::from(&mut out)
            .and(&plane)
            .and(&residual)
            .and(&soft)
            .for_each(|o, &img, &res, &m| {
                let sharp = (img + self.weight * res).clamp(0.0, 1.0);
                *o = m * sharp + (1.0 - m) * img;
            });
        out
    }

    /// Sharpen every plane of a `(b, c, h, w)` batch.
    pub fn sharpen(&self, batch: ArrayView4<f32>) -> Array4<f32> {
        let mut output = Array4::zeros(batch.raw_dim());
        let out_samples: Vec<_> = output.axis_iter_mut(Axis(0)).collect();
        let in_samples: Vec<_> = batch.axis_iter(Axis(0)).collect();

        out_samples
            .into_par_iter()
            .zip(in_samples.into_par_iter())
            .for_each(|(mut out, sample)| {
                for (src, mut dst) in sample.axis_iter(Axis(0)).zip(out.axis_iter_mut(Axis(0))) {
                    dst.assign(&self.sharpen_plane(src));
                }
            });

        output
    }
}
