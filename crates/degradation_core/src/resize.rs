//! Spatial interpolation of image batches.
//!
//! All three modes are separable, so each resize is expressed as one weight
//! table per axis and applied as a horizontal pass followed by a vertical pass.
//! Sampling follows the half-pixel convention (corners not aligned):
//! `src = (dst + 0.5) * in / out - 0.5`.

use ndarray::{Array2, Array4, ArrayView2, ArrayView4, Axis};
use rayon::prelude::*;

use crate::rng::RandomSource;

/// Cubic convolution coefficient.
const CUBIC_A: f64 = -0.75;

/// Interpolation mode of a resize step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResizeMode {
    /// Average over the covered source area.
    Area,
    /// Linear interpolation.
    Bilinear,
    /// Cubic convolution.
    Bicubic,
}

impl ResizeMode {
    pub const ALL: [ResizeMode; 3] = [ResizeMode::Area, ResizeMode::Bilinear, ResizeMode::Bicubic];

    /// Uniform choice among the three modes.
    pub fn random<R: RandomSource + ?Sized>(rng: &mut R) -> Self {
        Self::ALL[rng.index(Self::ALL.len())]
    }
}

/// Output size for a relative scale factor: `floor(dim * scale)`, at least 1.
pub fn scaled_size(h: usize, w: usize, scale: f64) -> (usize, usize) {
    let scaled = |d: usize| ((d as f64 * scale).floor() as usize).max(1);
    (scaled(h), scaled(w))
}

/// Source taps `(index, weight)` for every output position along one axis.
fn axis_weights(in_len: usize, out_len: usize, mode: ResizeMode) -> Vec<Vec<(usize, f32)>> {
    let scale = in_len as f64 / out_len as f64;
    let last = in_len as isize - 1;
    (0..out_len)
        .map(|o| match mode {
            ResizeMode::Area => {
                let start = (o * in_len) / out_len;
                let end = ((o + 1) * in_len + out_len - 1) / out_len;
                let weight = 1.0 / (end - start) as f32;
                (start..end).map(|i| (i, weight)).collect()
            }
            ResizeMode::Bilinear => {
                let src = ((o as f64 + 0.5) * scale - 0.5).max(0.0);
                let i0 = (src.floor() as isize).min(last);
                let i1 = (i0 + 1).min(last);
                let frac = (src - i0 as f64) as f32;
                vec![(i0 as usize, 1.0 - frac), (i1 as usize, frac)]
            }
            ResizeMode::Bicubic => {
                let src = (o as f64 + 0.5) * scale - 0.5;
                let base = src.floor();
                let t = src - base;
                let coeffs = [
                    cubic_outer(t + 1.0),
                    cubic_inner(t),
                    cubic_inner(1.0 - t),
                    cubic_outer(2.0 - t),
                ];
                coeffs
                    .iter()
                    .enumerate()
                    .map(|(k, &c)| {
                        let idx = (base as isize + k as isize - 1).clamp(0, last);
                        (idx as usize, c as f32)
                    })
                    .collect()
            }
        })
        .collect()
}

#[inline]
fn cubic_inner(x: f64) -> f64 {
    ((CUBIC_A + 2.0) * x - (CUBIC_A + 3.0)) * x * x + 1.0
}

#[inline]
fn cubic_outer(x: f64) -> f64 {
    ((CUBIC_A * x - 5.0 * CUBIC_A) * x + 8.0 * CUBIC_A) * x - 4.0 * CUBIC_A
}

/// Resize one plane with precomputed axis tables.
fn resize_plane(
    plane: ArrayView2<f32>,
    rows: &[Vec<(usize, f32)>],
    cols: &[Vec<(usize, f32)>],
) -> Array2<f32> {
    let (h, _) = plane.dim();
    let mut horizontal = Array2::<f32>::zeros((h, cols.len()));
    for (src_row, mut dst_row) in plane.outer_iter().zip(horizontal.outer_iter_mut()) {
        for (dst, taps) in dst_row.iter_mut().zip(cols) {
            *dst = taps.iter().map(|&(i, w)| w * src_row[i]).sum();
        }
    }

    let mut output = Array2::<f32>::zeros((rows.len(), cols.len()));
    for (mut dst_row, taps) in output.outer_iter_mut().zip(rows) {
        for &(i, w) in taps {
            dst_row.scaled_add(w, &horizontal.row(i));
        }
    }
    output
}

/// Resize every plane of a `(b, c, h, w)` batch to `(out_h, out_w)`.
pub fn resize(batch: ArrayView4<f32>, out_h: usize, out_w: usize, mode: ResizeMode) -> Array4<f32> {
    let (b, c, h, w) = batch.dim();
    if (h, w) == (out_h, out_w) {
        return batch.to_owned();
    }
    let rows = axis_weights(h, out_h, mode);
    let cols = axis_weights(w, out_w, mode);

    let mut output = Array4::zeros((b, c, out_h, out_w));
    let out_samples: Vec<_> = output.axis_iter_mut(Axis(0)).collect();
    let in_samples: Vec<_> = batch.axis_iter(Axis(0)).collect();

    out_samples
        .into_par_iter()
        .zip(in_samples.into_par_iter())
        .for_each(|(mut out, sample)| {
            for (src, mut dst) in sample.axis_iter(Axis(0)).zip(out.axis_iter_mut(Axis(0))) {
                dst.assign(&resize_plane(src, &rows, &cols));
            }
        });

    output
}

/// Resize by a relative scale factor.
pub fn resize_by(batch: ArrayView4<f32>, scale: f64, mode: ResizeMode) -> Array4<f32> {
    let (_, _, h, w) = batch.dim();
    let (out_h, out_w) = scaled_size(h, w, scale);
    resize(batch, out_h, out_w, mode)
}
