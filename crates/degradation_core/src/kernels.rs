//! Blur and sinc kernel synthesis.
//!
//! Each training sample carries three kernels: one blur kernel per degradation
//! stage and a final filter that is either a circular low-pass (sinc) kernel or
//! the identity pulse. Kernels have odd sizes in `7..=21` and are zero-padded to
//! a common 21x21 footprint so a batch of them stacks into one array.
//!
//! ## Kernel families
//!
//! Blur kernels are drawn from bivariate shapes parameterized by a covariance
//! `Sigma = R(theta) diag(sx^2, sy^2) R(theta)^T` and the quadratic form
//! `q(p) = p^T Sigma^-1 p` over the integer grid centered on the kernel:
//! - Gaussian: `exp(-q / 2)`
//! - generalized Gaussian: `exp(-q^beta / 2)`
//! - plateau: `1 / (q^beta + 1)`
//!
//! Isotropic variants use `sy = sx` and `theta = 0`.

use std::f64::consts::PI;

use ndarray::{s, Array2, Array3, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::{KernelConfig, KernelStageConfig};
use crate::rng::RandomSource;

// =============================================================================
// Constants
// =============================================================================

/// Spatial extent every kernel is padded to.
pub const KERNEL_PAD_SIZE: usize = 21;

/// Candidate kernel sizes: 7, 9, ..., 21.
pub const KERNEL_SIZES: [usize; 8] = [7, 9, 11, 13, 15, 17, 19, 21];

/// Kernels at least this large draw their sinc cutoff from the wider range.
const SINC_NARROW_SIZE: usize = 13;

/// Rotation range for anisotropic kernels.
const ROTATION_RANGE: (f64, f64) = (-PI, PI);

// =============================================================================
// Types
// =============================================================================

/// Parametric blur kernel family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KernelFamily {
    /// Isotropic Gaussian.
    Iso,
    /// Anisotropic (rotated) Gaussian.
    Aniso,
    /// Isotropic generalized Gaussian.
    GeneralizedIso,
    /// Anisotropic generalized Gaussian.
    GeneralizedAniso,
    /// Isotropic plateau.
    PlateauIso,
    /// Anisotropic plateau.
    PlateauAniso,
}

impl KernelFamily {
    /// All families in their conventional configuration order.
    pub const ALL: [KernelFamily; 6] = [
        KernelFamily::Iso,
        KernelFamily::Aniso,
        KernelFamily::GeneralizedIso,
        KernelFamily::GeneralizedAniso,
        KernelFamily::PlateauIso,
        KernelFamily::PlateauAniso,
    ];

    fn is_isotropic(self) -> bool {
        matches!(
            self,
            KernelFamily::Iso | KernelFamily::GeneralizedIso | KernelFamily::PlateauIso
        )
    }
}

/// The three kernels attached to one training sample, each 21x21.
#[derive(Debug, Clone, PartialEq)]
pub struct KernelTriple {
    /// Blur kernel of the first degradation stage.
    pub kernel1: Array2<f32>,
    /// Blur kernel of the second degradation stage.
    pub kernel2: Array2<f32>,
    /// Final sinc filter, or the pulse kernel.
    pub final_kernel: Array2<f32>,
}

/// Per-sample kernels stacked along a leading batch axis, each `(b, 21, 21)`.
#[derive(Debug, Clone, PartialEq)]
pub struct KernelBatch {
    pub kernel1: Array3<f32>,
    pub kernel2: Array3<f32>,
    pub final_kernel: Array3<f32>,
}

impl KernelBatch {
    /// Stack the triples of a collated batch.
    pub fn stack(triples: &[KernelTriple]) -> Self {
        let b = triples.len();
        let mut batch = Self {
            kernel1: Array3::zeros((b, KERNEL_PAD_SIZE, KERNEL_PAD_SIZE)),
            kernel2: Array3::zeros((b, KERNEL_PAD_SIZE, KERNEL_PAD_SIZE)),
            final_kernel: Array3::zeros((b, KERNEL_PAD_SIZE, KERNEL_PAD_SIZE)),
        };
        for (i, t) in triples.iter().enumerate() {
            batch.kernel1.index_axis_mut(Axis(0), i).assign(&t.kernel1);
            batch.kernel2.index_axis_mut(Axis(0), i).assign(&t.kernel2);
            batch
                .final_kernel
                .index_axis_mut(Axis(0), i)
                .assign(&t.final_kernel);
        }
        batch
    }

    /// Wrap a single triple as a batch of one.
    pub fn single(triple: &KernelTriple) -> Self {
        Self::stack(std::slice::from_ref(triple))
    }

    /// Number of samples in the batch.
    pub fn len(&self) -> usize {
        self.kernel1.len_of(Axis(0))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// =============================================================================
// Kernel primitives
// =============================================================================

/// The identity kernel under convolution: 1.0 at the center of a 21x21 grid.
pub fn pulse_kernel() -> Array2<f32> {
    let mut pulse = Array2::zeros((KERNEL_PAD_SIZE, KERNEL_PAD_SIZE));
    pulse[[KERNEL_PAD_SIZE / 2, KERNEL_PAD_SIZE / 2]] = 1.0;
    pulse
}

/// Cutoff frequency range for a stage sinc kernel of the given size.
///
/// Larger kernels ring more visibly, so they may use a lower cutoff.
pub fn sinc_cutoff_range(kernel_size: usize) -> (f64, f64) {
    if kernel_size < SINC_NARROW_SIZE {
        (PI / 3.0, PI)
    } else {
        (PI / 5.0, PI)
    }
}

/// Draw a kernel size uniformly from [`KERNEL_SIZES`].
pub fn draw_kernel_size<R: RandomSource + ?Sized>(rng: &mut R) -> usize {
    KERNEL_SIZES[rng.index(KERNEL_SIZES.len())]
}

/// Bessel function of the first kind, order one.
///
/// Rational approximation for `|x| < 8` and the asymptotic expansion beyond;
/// absolute error is below 1e-7 over the range used by the sinc kernel.
pub fn bessel_j1(x: f64) -> f64 {
    let ax = x.abs();
    if ax < 8.0 {
        let y = x * x;
        let num = x
            * (72_362_614_232.0
                + y * (-7_895_059_235.0
                    + y * (242_396_853.1
                        + y * (-2_972_611.439 + y * (15_704.482_60 + y * (-30.160_366_06))))));
        let den = 144_725_228_442.0
            + y * (2_300_535_178.0
                + y * (18_583_304.74 + y * (99_447.433_94 + y * (376.999_139_7 + y))));
        num / den
    } else {
        let z = 8.0 / ax;
        let y = z * z;
        let xx = ax - 2.356_194_491;
        let p = 1.0
            + y * (0.183_105e-2
                + y * (-0.351_639_649_6e-4 + y * (0.245_752_017_4e-5 + y * (-0.240_337_019e-6))));
        let q = 0.046_874_999_95
            + y * (-0.200_269_087_3e-3
                + y * (0.844_919_909_6e-5 + y * (-0.882_289_87e-6 + y * 0.105_787_412e-6)));
        let ans = (0.636_619_772 / ax).sqrt() * (xx.cos() * p - z * xx.sin() * q);
        if x < 0.0 {
            -ans
        } else {
            ans
        }
    }
}

/// Circular low-pass (2-D sinc) kernel with unit sum.
pub fn circular_lowpass_kernel(cutoff: f64, kernel_size: usize) -> Array2<f64> {
    let center = (kernel_size as f64 - 1.0) / 2.0;
    let mut kernel = Array2::from_shape_fn((kernel_size, kernel_size), |(r, c)| {
        let dr = r as f64 - center;
        let dc = c as f64 - center;
        let radius = (dr * dr + dc * dc).sqrt();
        if radius == 0.0 {
            cutoff * cutoff / (4.0 * PI)
        } else {
            cutoff * bessel_j1(cutoff * radius) / (2.0 * PI * radius)
        }
    });
    let sum = kernel.sum();
    kernel.mapv_inplace(|v| v / sum);
    kernel
}

/// Covariance matrix of a rotated bivariate distribution.
fn sigma_matrix(sigma_x: f64, sigma_y: f64, theta: f64) -> [[f64; 2]; 2] {
    let (sin, cos) = theta.sin_cos();
    let (a, b) = (sigma_x * sigma_x, sigma_y * sigma_y);
    [
        [cos * cos * a + sin * sin * b, cos * sin * (a - b)],
        [cos * sin * (a - b), sin * sin * a + cos * cos * b],
    ]
}

/// Quadratic form `p^T Sigma^-1 p` evaluated on the centered integer grid.
fn quadratic_grid(kernel_size: usize, sigma: [[f64; 2]; 2]) -> Array2<f64> {
    let det = sigma[0][0] * sigma[1][1] - sigma[0][1] * sigma[1][0];
    let inv = [
        [sigma[1][1] / det, -sigma[0][1] / det],
        [-sigma[1][0] / det, sigma[0][0] / det],
    ];
    let half = (kernel_size / 2) as f64;
    Array2::from_shape_fn((kernel_size, kernel_size), |(r, c)| {
        let x = c as f64 - half;
        let y = r as f64 - half;
        x * (inv[0][0] * x + inv[0][1] * y) + y * (inv[1][0] * x + inv[1][1] * y)
    })
}

fn normalized(mut kernel: Array2<f64>) -> Array2<f64> {
    let sum = kernel.sum();
    if sum > 0.0 {
        kernel.mapv_inplace(|v| v / sum);
    }
    kernel
}

/// Bivariate Gaussian kernel with unit sum.
pub fn bivariate_gaussian(kernel_size: usize, sigma_x: f64, sigma_y: f64, theta: f64) -> Array2<f64> {
    let q = quadratic_grid(kernel_size, sigma_matrix(sigma_x, sigma_y, theta));
    normalized(q.mapv(|v| (-0.5 * v).exp()))
}

/// Bivariate generalized Gaussian kernel with unit sum.
pub fn bivariate_generalized_gaussian(
    kernel_size: usize,
    sigma_x: f64,
    sigma_y: f64,
    theta: f64,
    beta: f64,
) -> Array2<f64> {
    let q = quadratic_grid(kernel_size, sigma_matrix(sigma_x, sigma_y, theta));
    normalized(q.mapv(|v| (-0.5 * v.powf(beta)).exp()))
}

/// Bivariate plateau kernel with unit sum.
pub fn bivariate_plateau(
    kernel_size: usize,
    sigma_x: f64,
    sigma_y: f64,
    theta: f64,
    beta: f64,
) -> Array2<f64> {
    let q = quadratic_grid(kernel_size, sigma_matrix(sigma_x, sigma_y, theta));
    normalized(q.mapv(|v| 1.0 / (v.powf(beta) + 1.0)))
}

/// Shape exponent: below or above one with equal probability.
fn draw_beta<R: RandomSource + ?Sized>(range: (f64, f64), rng: &mut R) -> f64 {
    if rng.uniform(0.0, 1.0) < 0.5 {
        rng.uniform(range.0, 1.0)
    } else {
        rng.uniform(1.0, range.1)
    }
}

/// Kernel from a weighted choice among `families`.
pub fn random_mixed_kernel<R: RandomSource + ?Sized>(
    families: &[KernelFamily],
    weights: &[f64],
    kernel_size: usize,
    stage: &KernelStageConfig,
    rng: &mut R,
) -> Array2<f64> {
    let family = families
        .get(rng.weighted_index(weights))
        .copied()
        .unwrap_or(KernelFamily::Iso);

    let sigma_x = rng.uniform(stage.blur_sigma.0, stage.blur_sigma.1);
    let (sigma_y, theta) = if family.is_isotropic() {
        (sigma_x, 0.0)
    } else {
        let sigma_y = rng.uniform(stage.blur_sigma.0, stage.blur_sigma.1);
        (sigma_y, rng.uniform(ROTATION_RANGE.0, ROTATION_RANGE.1))
    };

    match family {
        KernelFamily::Iso | KernelFamily::Aniso => {
            bivariate_gaussian(kernel_size, sigma_x, sigma_y, theta)
        }
        KernelFamily::GeneralizedIso | KernelFamily::GeneralizedAniso => {
            let beta = draw_beta(stage.betag_range, rng);
            bivariate_generalized_gaussian(kernel_size, sigma_x, sigma_y, theta, beta)
        }
        KernelFamily::PlateauIso | KernelFamily::PlateauAniso => {
            let beta = draw_beta(stage.betap_range, rng);
            bivariate_plateau(kernel_size, sigma_x, sigma_y, theta, beta)
        }
    }
}

/// Zero-pad an odd-sized kernel to 21x21, keeping it centered.
pub fn pad_kernel(kernel: ArrayView2<f64>) -> Array2<f32> {
    let size = kernel.nrows();
    debug_assert!(size % 2 == 1 && size <= KERNEL_PAD_SIZE);
    let pad = (KERNEL_PAD_SIZE - size) / 2;
    let mut padded = Array2::zeros((KERNEL_PAD_SIZE, KERNEL_PAD_SIZE));
    padded
        .slice_mut(s![pad..pad + size, pad..pad + size])
        .assign(&kernel.mapv(|v| v as f32));
    padded
}

// =============================================================================
// Synthesizer
// =============================================================================

/// Generates the per-sample kernel triples.
///
/// Stateless apart from configuration and the pulse kernel, so it can be
/// shared across rayon workers.
#[derive(Debug, Clone)]
pub struct KernelSynthesizer {
    config: KernelConfig,
    pulse: Array2<f32>,
}

impl KernelSynthesizer {
    pub fn new(config: KernelConfig) -> Self {
        Self {
            config,
            pulse: pulse_kernel(),
        }
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    /// Draw the two stage kernels and the final kernel for one sample.
    pub fn synthesize<R: RandomSource + ?Sized>(&self, rng: &mut R) -> KernelTriple {
        let kernel1 = self.stage_kernel(&self.config.first, rng);
        let kernel2 = self.stage_kernel(&self.config.second, rng);
        let final_kernel = self.final_kernel(rng);
        KernelTriple {
            kernel1,
            kernel2,
            final_kernel,
        }
    }

    /// Synthesize `count` triples in parallel, one child generator per sample.
    pub fn synthesize_batch<R: RandomSource + ?Sized>(
        &self,
        count: usize,
        rng: &mut R,
    ) -> Vec<KernelTriple> {
        let seeds: Vec<u64> = (0..count).map(|_| rng.next_seed()).collect();
        seeds
            .into_par_iter()
            .map(|seed| {
                let mut child = StdRng::seed_from_u64(seed);
                self.synthesize(&mut child)
            })
            .collect()
    }

    fn stage_kernel<R: RandomSource + ?Sized>(
        &self,
        stage: &KernelStageConfig,
        rng: &mut R,
    ) -> Array2<f32> {
        let kernel_size = draw_kernel_size(rng);
        let kernel = if rng.uniform(0.0, 1.0) < stage.sinc_prob {
            let (low, high) = sinc_cutoff_range(kernel_size);
            circular_lowpass_kernel(rng.uniform(low, high), kernel_size)
        } else {
            random_mixed_kernel(
                &stage.kernel_list,
                &stage.kernel_prob,
                kernel_size,
                stage,
                rng,
            )
        };
        pad_kernel(kernel.view())
    }

    fn final_kernel<R: RandomSource + ?Sized>(&self, rng: &mut R) -> Array2<f32> {
        if rng.uniform(0.0, 1.0) < self.config.final_sinc_prob {
            let kernel_size = draw_kernel_size(rng);
            let cutoff = rng.uniform(PI / 3.0, PI);
            pad_kernel(circular_lowpass_kernel(cutoff, kernel_size).view())
        } else {
            self.pulse.clone()
        }
    }
}
