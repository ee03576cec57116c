//! Batched 2-D filtering with per-sample kernels.
//!
//! Every sample of a `(b, c, h, w)` batch is correlated with its own kernel;
//! all channels of a sample share that kernel. Borders use mirror padding
//! without edge repetition (`-1 -> 1`, `n -> n - 2`).
//!
//! Padded kernels are mostly zeros, so each kernel is reduced to its list of
//! non-zero taps before the sweep. The pulse kernel collapses to a single tap.

use ndarray::{Array2, Array4, ArrayView2, ArrayView3, ArrayView4, ArrayViewMut2, Axis};
use rayon::prelude::*;

use crate::error::{DegradeError, Result};

/// One non-zero kernel entry: row offset, column offset, weight.
type Tap = (isize, isize, f32);

/// Mirror an out-of-range index back into `0..len` (no edge repetition).
#[inline]
pub(crate) fn mirror_index(idx: isize, len: usize) -> usize {
    if len == 1 {
        return 0;
    }
    let n = len as isize;
    let period = 2 * (n - 1);
    let mut i = idx.rem_euclid(period);
    if i >= n {
        i = period - i;
    }
    i as usize
}

fn kernel_taps(kernel: ArrayView2<f32>) -> Vec<Tap> {
    let (kh, kw) = kernel.dim();
    let (cy, cx) = ((kh / 2) as isize, (kw / 2) as isize);
    kernel
        .indexed_iter()
        .filter(|(_, &w)| w != 0.0)
        .map(|((r, c), &w)| (r as isize - cy, c as isize - cx, w))
        .collect()
}

/// Correlate a single plane with a tap list into `dst`.
fn correlate_plane(src: ArrayView2<f32>, taps: &[Tap], mut dst: ArrayViewMut2<f32>) {
    let (h, w) = src.dim();
    let src = src.as_standard_layout();
    let src = match src.as_slice() {
        Some(s) => s,
        None => return,
    };

    let mut acc = vec![0.0f32; h * w];
    let mut col_map = vec![0usize; w];
    for &(dy, dx, weight) in taps {
        for (x, slot) in col_map.iter_mut().enumerate() {
            *slot = mirror_index(x as isize + dx, w);
        }
        for y in 0..h {
            let row = mirror_index(y as isize + dy, h) * w;
            let out = &mut acc[y * w..(y + 1) * w];
            for (o, &sx) in out.iter_mut().zip(col_map.iter()) {
                *o += weight * src[row + sx];
            }
        }
    }

    for (d, a) in dst.iter_mut().zip(acc) {
        *d = a;
    }
}

/// Filter every sample of `batch` with its own kernel.
///
/// `kernels` is `(b, kh, kw)` with odd `kh`, `kw`; a single kernel
/// (`(1, kh, kw)`) is broadcast over the batch.
pub fn filter2d(batch: ArrayView4<f32>, kernels: ArrayView3<f32>) -> Result<Array4<f32>> {
    let b = batch.len_of(Axis(0));
    let kb = kernels.len_of(Axis(0));
    if kb != b && kb != 1 {
        return Err(DegradeError::KernelBatchMismatch {
            kernels: kb,
            images: b,
        });
    }

    let taps: Vec<Vec<Tap>> = kernels
        .axis_iter(Axis(0))
        .map(kernel_taps)
        .collect();

    let mut output = Array4::zeros(batch.raw_dim());
    let out_samples: Vec<_> = output.axis_iter_mut(Axis(0)).collect();
    let in_samples: Vec<_> = batch.axis_iter(Axis(0)).collect();

    out_samples
        .into_par_iter()
        .zip(in_samples.into_par_iter())
        .enumerate()
        .for_each(|(i, (mut out, sample))| {
            let sample_taps = &taps[if kb == 1 { 0 } else { i }];
            for (src, dst) in sample.axis_iter(Axis(0)).zip(out.axis_iter_mut(Axis(0))) {
                correlate_plane(src, sample_taps, dst);
            }
        });

    Ok(output)
}

/// Filter one plane with one kernel.
pub fn filter_plane(plane: ArrayView2<f32>, kernel: ArrayView2<f32>) -> Array2<f32> {
    let mut output = Array2::zeros(plane.raw_dim());
    correlate_plane(plane, &kernel_taps(kernel), output.view_mut());
    output
}
