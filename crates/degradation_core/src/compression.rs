//! Compression artifact simulation.
//!
//! The pipeline only depends on the [`ArtifactSimulator`] trait. The default
//! [`JpegSimulator`] reproduces baseline JPEG losses in float arithmetic:
//! YCbCr conversion, 4:2:0 chroma averaging, 8x8 DCT, quantization with the
//! standard tables scaled by the quality factor, and the inverse path.
//! Images are zero-padded to multiples of 16 and cropped back afterwards.

use std::f32::consts::PI;

use ndarray::{s, Array2, Array3, Array4, ArrayView3, ArrayView4, Axis};
use rayon::prelude::*;

/// Standard luminance quantization table, row = vertical frequency.
const LUMA_TABLE: [[f32; 8]; 8] = [
    [16.0, 11.0, 10.0, 16.0, 24.0, 40.0, 51.0, 61.0],
    [12.0, 12.0, 14.0, 19.0, 26.0, 58.0, 60.0, 55.0],
    [14.0, 13.0, 16.0, 24.0, 40.0, 57.0, 69.0, 56.0],
    [14.0, 17.0, 22.0, 29.0, 51.0, 87.0, 80.0, 62.0],
    [18.0, 22.0, 37.0, 56.0, 68.0, 109.0, 103.0, 77.0],
    [24.0, 35.0, 55.0, 64.0, 81.0, 104.0, 113.0, 92.0],
    [49.0, 64.0, 78.0, 87.0, 103.0, 121.0, 120.0, 101.0],
    [72.0, 92.0, 95.0, 98.0, 112.0, 100.0, 103.0, 99.0],
];

/// Standard chrominance quantization table (upper-left corner; rest is 99).
const CHROMA_CORNER: [[f32; 4]; 4] = [
    [17.0, 18.0, 24.0, 47.0],
    [18.0, 21.0, 26.0, 66.0],
    [24.0, 26.0, 56.0, 99.0],
    [47.0, 66.0, 99.0, 99.0],
];

const BLOCK: usize = 8;
const MCU: usize = 16;

/// Simulates lossy compression of a `(b, c, h, w)` batch in `[0, 1]`.
pub trait ArtifactSimulator: Send + Sync {
    /// Compress and decompress at `quality` (1-100).
    fn compress(&self, batch: ArrayView4<f32>, quality: f64) -> Array4<f32>;
}

/// Pass-through simulator for ablations and deterministic tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCompression;

impl ArtifactSimulator for NoCompression {
    fn compress(&self, batch: ArrayView4<f32>, _quality: f64) -> Array4<f32> {
        batch.to_owned()
    }
}

/// Block-DCT JPEG simulator.
#[derive(Debug, Clone)]
pub struct JpegSimulator {
    /// Orthonormal DCT-II basis, `basis[u][x]`.
    basis: [[f32; BLOCK]; BLOCK],
    luma: [[f32; BLOCK]; BLOCK],
    chroma: [[f32; BLOCK]; BLOCK],
}

impl Default for JpegSimulator {
    fn default() -> Self {
        Self::new()
    }
}

/// Quantization table multiplier for a quality factor.
pub fn quality_to_factor(quality: f64) -> f32 {
    let quality = quality.clamp(1.0, 100.0);
    let percent = if quality < 50.0 {
        5000.0 / quality
    } else {
        200.0 - quality * 2.0
    };
    (percent / 100.0) as f32
}

impl JpegSimulator {
    pub fn new() -> Self {
        let mut basis = [[0.0f32; BLOCK]; BLOCK];
        for (u, row) in basis.iter_mut().enumerate() {
            let norm = if u == 0 {
                (1.0 / BLOCK as f32).sqrt()
            } else {
                (2.0 / BLOCK as f32).sqrt()
            };
            for (x, v) in row.iter_mut().enumerate() {
                *v = norm * (((2 * x + 1) as f32 * u as f32 * PI) / (2 * BLOCK) as f32).cos();
            }
        }

        let mut chroma = [[99.0f32; BLOCK]; BLOCK];
        for (r, row) in CHROMA_CORNER.iter().enumerate() {
            chroma[r][..4].copy_from_slice(row);
        }

        Self {
            basis,
            luma: LUMA_TABLE,
            chroma,
        }
    }

    /// Quantize every 8x8 block of a plane in the 0-255 range.
    fn quantize_plane(&self, plane: &mut Array2<f32>, table: &[[f32; BLOCK]; BLOCK], factor: f32) {
        let (h, w) = plane.dim();
        let mut block = [[0.0f32; BLOCK]; BLOCK];
        let mut tmp = [[0.0f32; BLOCK]; BLOCK];
        for by in (0..h).step_by(BLOCK) {
            for bx in (0..w).step_by(BLOCK) {
                for y in 0..BLOCK {
                    for x in 0..BLOCK {
                        block[y][x] = plane[[by + y, bx + x]] - 128.0;
                    }
                }
                self.forward_dct(&block, &mut tmp);
                for u in 0..BLOCK {
                    for v in 0..BLOCK {
                        let step = (table[u][v] * factor).max(1.0);
                        tmp[u][v] = (tmp[u][v] / step).round() * step;
                    }
                }
                self.inverse_dct(&tmp, &mut block);
                for y in 0..BLOCK {
                    for x in 0..BLOCK {
                        plane[[by + y, bx + x]] = block[y][x] + 128.0;
                    }
                }
            }
        }
    }

    fn forward_dct(&self, input: &[[f32; BLOCK]; BLOCK], output: &mut [[f32; BLOCK]; BLOCK]) {
        let c = &self.basis;
        let mut rows = [[0.0f32; BLOCK]; BLOCK];
        // rows[y][v] = sum_x f[y][x] c[v][x]
        for y in 0..BLOCK {
            for v in 0..BLOCK {
                rows[y][v] = (0..BLOCK).map(|x| input[y][x] * c[v][x]).sum();
            }
        }
        // out[u][v] = sum_y c[u][y] rows[y][v]
        for u in 0..BLOCK {
            for v in 0..BLOCK {
                output[u][v] = (0..BLOCK).map(|y| c[u][y] * rows[y][v]).sum();
            }
        }
    }

    fn inverse_dct(&self, input: &[[f32; BLOCK]; BLOCK], output: &mut [[f32; BLOCK]; BLOCK]) {
        let c = &self.basis;
        let mut cols = [[0.0f32; BLOCK]; BLOCK];
        // cols[y][v] = sum_u c[u][y] F[u][v]
        for y in 0..BLOCK {
            for v in 0..BLOCK {
                cols[y][v] = (0..BLOCK).map(|u| c[u][y] * input[u][v]).sum();
            }
        }
        // out[y][x] = sum_v cols[y][v] c[v][x]
        for y in 0..BLOCK {
            for x in 0..BLOCK {
                output[y][x] = (0..BLOCK).map(|v| cols[y][v] * c[v][x]).sum();
            }
        }
    }

    fn compress_sample(&self, sample: ArrayView3<f32>, factor: f32) -> Array3<f32> {
        let (c, h, w) = sample.dim();
        let hp = h.div_ceil(MCU) * MCU;
        let wp = w.div_ceil(MCU) * MCU;

        let mut padded = Array3::<f32>::zeros((c, hp, wp));
        padded
            .slice_mut(s![.., ..h, ..w])
            .assign(&sample.mapv(|v| v * 255.0));

        if c != 3 {
            for mut channel in padded.axis_iter_mut(Axis(0)) {
                let mut plane = channel.to_owned();
                self.quantize_plane(&mut plane, &self.luma, factor);
                channel.assign(&plane);
            }
            return padded
                .slice(s![.., ..h, ..w])
                .mapv(|v| v.clamp(0.0, 255.0) / 255.0);
        }

        let (r, g, b) = (
            padded.index_axis(Axis(0), 0),
            padded.index_axis(Axis(0), 1),
            padded.index_axis(Axis(0), 2),
        );
        let mut luma = Array2::<f32>::zeros((hp, wp));
        let mut cb_full = Array2::<f32>::zeros((hp, wp));
        let mut cr_full = Array2::<f32>::zeros((hp, wp));
        ndarray::Zip::from(&mut luma)
            .and(&mut cb_full)
            .and(&mut cr_full)
            .and(&r)
            .and(&g)
            .and(&b)
            .for_each(|y, cb, cr, &r, &g, &b| {
                *y = 0.299 * r + 0.587 * g + 0.114 * b;
                *cb = -0.168_736 * r - 0.331_264 * g + 0.5 * b + 128.0;
                *cr = 0.5 * r - 0.418_688 * g - 0.081_312 * b + 128.0;
            });

        let subsample = |full: &Array2<f32>| {
            Array2::from_shape_fn((hp / 2, wp / 2), |(y, x)| {
                let (y2, x2) = (2 * y, 2 * x);
                (full[[y2, x2]] + full[[y2 + 1, x2]] + full[[y2, x2 + 1]] + full[[y2 + 1, x2 + 1]])
                    * 0.25
            })
        };
        let mut cb = subsample(&cb_full);
        let mut cr = subsample(&cr_full);

        self.quantize_plane(&mut luma, &self.luma, factor);
        self.quantize_plane(&mut cb, &self.chroma, factor);
        self.quantize_plane(&mut cr, &self.chroma, factor);

        Array3::from_shape_fn((c, h, w), |(ch, y, x)| {
            let yy = luma[[y, x]];
            let cb = cb[[y / 2, x / 2]] - 128.0;
            let cr = cr[[y / 2, x / 2]] - 128.0;
            let v = match ch {
                0 => yy + 1.402 * cr,
                1 => yy - 0.344_136 * cb - 0.714_136 * cr,
                _ => yy + 1.772 * cb,
            };
            v.clamp(0.0, 255.0) / 255.0
        })
    }
}

impl ArtifactSimulator for JpegSimulator {
    fn compress(&self, batch: ArrayView4<f32>, quality: f64) -> Array4<f32> {
        let factor = quality_to_factor(quality);
        let mut output = Array4::zeros(batch.raw_dim());
        let out_samples: Vec<_> = output.axis_iter_mut(Axis(0)).collect();
        let in_samples: Vec<_> = batch.axis_iter(Axis(0)).collect();

        out_samples
            .into_par_iter()
            .zip(in_samples.into_par_iter())
            .for_each(|(mut out, sample)| {
                out.assign(&self.compress_sample(sample, factor));
            });

        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn smooth_batch(h: usize, w: usize) -> Array4<f32> {
        Array4::from_shape_fn((2, 3, h, w), |(i, c, y, x)| {
            0.2 + 0.6 * ((y as f32 * 0.15 + x as f32 * 0.1 + c as f32 + i as f32).sin() * 0.5 + 0.5)
        })
    }

    fn mean_abs_error(a: &Array4<f32>, b: &Array4<f32>) -> f32 {
        a.iter().zip(b.iter()).map(|(x, y)| (x - y).abs()).sum::<f32>() / a.len() as f32
    }

    #[test]
    fn test_quality_to_factor() {
        assert_abs_diff_eq!(quality_to_factor(50.0), 1.0);
        assert_abs_diff_eq!(quality_to_factor(25.0), 2.0);
        assert_abs_diff_eq!(quality_to_factor(90.0), 0.2, epsilon = 1e-6);
        assert_abs_diff_eq!(quality_to_factor(100.0), 0.0);
    }

    #[test]
    fn test_dct_roundtrip() {
        let jpeg = JpegSimulator::new();
        let mut block = [[0.0f32; BLOCK]; BLOCK];
        for (y, row) in block.iter_mut().enumerate() {
            for (x, v) in row.iter_mut().enumerate() {
                *v = ((y * 8 + x) as f32 * 3.7).sin() * 100.0;
            }
        }
        let mut coeffs = [[0.0f32; BLOCK]; BLOCK];
        let mut back = [[0.0f32; BLOCK]; BLOCK];
        jpeg.forward_dct(&block, &mut coeffs);
        jpeg.inverse_dct(&coeffs, &mut back);
        for y in 0..BLOCK {
            for x in 0..BLOCK {
                assert_abs_diff_eq!(back[y][x], block[y][x], epsilon = 1e-3);
            }
        }
    }

    #[test]
    fn test_dc_coefficient_of_flat_block() {
        let jpeg = JpegSimulator::new();
        let block = [[10.0f32; BLOCK]; BLOCK];
        let mut coeffs = [[0.0f32; BLOCK]; BLOCK];
        jpeg.forward_dct(&block, &mut coeffs);
        assert_abs_diff_eq!(coeffs[0][0], 80.0, epsilon = 1e-3);
        assert_abs_diff_eq!(coeffs[3][5], 0.0, epsilon = 1e-4);
    }

    #[test]
    fn test_shape_preserved_for_unaligned_sizes() {
        let jpeg = JpegSimulator::new();
        let batch = smooth_batch(21, 37);
        let out = jpeg.compress(batch.view(), 70.0);
        assert_eq!(out.dim(), batch.dim());
        assert!(out.iter().all(|&v| (0.0..=1.0).contains(&v)));
    }

    #[test]
    fn test_lower_quality_loses_more() {
        let jpeg = JpegSimulator::new();
        // Identical channels keep chroma flat so only quantization differs
        let batch = Array4::from_shape_fn((1, 3, 32, 32), |(_, _, y, x)| {
            (((y * 7 + x * 13) % 23) as f32) / 22.0
        });
        let high = jpeg.compress(batch.view(), 95.0);
        let low = jpeg.compress(batch.view(), 10.0);
        let err_high = mean_abs_error(&batch, &high);
        let err_low = mean_abs_error(&batch, &low);
        assert!(err_low > err_high, "q10 error {} vs q95 error {}", err_low, err_high);
        assert!(err_high < 0.08);
    }

    #[test]
    fn test_flat_gray_survives_compression() {
        let jpeg = JpegSimulator::new();
        let batch = Array4::from_elem((1, 3, 16, 16), 0.5f32);
        let out = jpeg.compress(batch.view(), 30.0);
        for &v in out.iter() {
            assert_abs_diff_eq!(v, 0.5, epsilon = 0.02);
        }
    }

    #[test]
    fn test_single_channel_input() {
        let jpeg = JpegSimulator::new();
        let batch = Array4::from_shape_fn((1, 1, 16, 24), |(_, _, y, x)| ((x + y) % 2) as f32);
        let out = jpeg.compress(batch.view(), 40.0);
        assert_eq!(out.dim(), (1, 1, 16, 24));
        assert!(mean_abs_error(&batch, &out) > 0.0);
    }

    #[test]
    fn test_no_compression_passthrough() {
        let batch = smooth_batch(8, 8);
        assert_eq!(NoCompression.compress(batch.view(), 10.0), batch);
    }
}
