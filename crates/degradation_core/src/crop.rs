//! Paired random cropping of ground-truth and low-quality batches.

use ndarray::{s, Array4, ArrayView4};

use crate::error::{DegradeError, Result};
use crate::rng::RandomSource;

/// Crop aligned patches from a `(gt, lq)` pair.
///
/// The low-quality patch is `gt_size / scale` pixels and starts at a random
/// `(top, left)`; the ground-truth patch starts at `(top * scale, left * scale)`.
/// The same offset is applied to every sample of the batch.
pub fn paired_random_crop<R: RandomSource + ?Sized>(
    gt: ArrayView4<f32>,
    lq: ArrayView4<f32>,
    gt_size: usize,
    scale: usize,
    rng: &mut R,
) -> Result<(Array4<f32>, Array4<f32>)> {
    let (_, _, h_gt, w_gt) = gt.dim();
    let (_, _, h_lq, w_lq) = lq.dim();
    let lq_size = gt_size / scale;

    if h_gt != h_lq * scale || w_gt != w_lq * scale {
        return Err(DegradeError::ScaleMismatch {
            gt_h: h_gt,
            gt_w: w_gt,
            lq_h: h_lq,
            lq_w: w_lq,
            scale,
        });
    }
    if h_lq < lq_size || w_lq < lq_size {
        return Err(DegradeError::PatchTooLarge {
            lq_h: h_lq,
            lq_w: w_lq,
            patch: lq_size,
        });
    }

    let top = rng.index(h_lq - lq_size + 1);
    let left = rng.index(w_lq - lq_size + 1);
    let lq_patch = lq
        .slice(s![.., .., top..top + lq_size, left..left + lq_size])
        .to_owned();

    let (top_gt, left_gt) = (top * scale, left * scale);
    let gt_patch = gt
        .slice(s![.., .., top_gt..top_gt + gt_size, left_gt..left_gt + gt_size])
        .to_owned();

    Ok((gt_patch, lq_patch))
}
