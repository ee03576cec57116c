//! Two-stage degradation pipeline.
//!
//! A ground-truth batch is turned into its low-quality counterpart by two
//! rounds of blur, resize, noise and compression, followed by a final
//! resize with an optional sinc filter:
//!
//! ```text
//! gt -> [usm] -> blur(k1) -> resize -> noise -> jpeg
//!    -> [blur(k2)] -> resize -> noise -> { resize + sinc -> jpeg | jpeg -> resize + sinc }
//!    -> quantize -> paired crop -> diversity pool
//! ```
//!
//! Kernels differ per sample; every other random parameter is drawn once per
//! call and shared by the whole batch. The drawn values are returned as
//! [`DegradationParameters`] so callers can log or reproduce them.

use ndarray::{Array3, Array4, ArrayView3, ArrayView4, Axis};
use tracing::debug;

use crate::compression::{ArtifactSimulator, JpegSimulator};
use crate::config::{PipelineConfig, StageConfig};
use crate::crop::paired_random_crop;
use crate::error::{DegradeError, Result};
use crate::filtering::filter2d;
use crate::kernels::{KernelBatch, KernelTriple};
use crate::noise::{apply_noise, NoiseParams};
use crate::pool::DiversityPool;
use crate::resize::{resize, resize_by, ResizeMode};
use crate::rng::RandomSource;
use crate::sharpen::UsmSharpener;

// =============================================================================
// Constants
// =============================================================================

/// Probability of resizing before compressing in the final step.
const FINAL_RESIZE_FIRST_PROB: f64 = 0.5;

// =============================================================================
// Types
// =============================================================================

/// Direction of a stage resize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeDirection {
    Up,
    Down,
    Keep,
}

/// Drawn resize of one stage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResizeStep {
    pub direction: ResizeDirection,
    /// Relative scale; exactly 1.0 for [`ResizeDirection::Keep`].
    pub scale: f64,
    pub mode: ResizeMode,
}

impl ResizeStep {
    /// Draw direction by `resize_prob` `[up, down, keep]`, then scale, then mode.
    pub fn draw<R: RandomSource + ?Sized>(stage: &StageConfig, rng: &mut R) -> Self {
        let direction = match rng.weighted_index(&stage.resize_prob) {
            0 => ResizeDirection::Up,
            1 => ResizeDirection::Down,
            _ => ResizeDirection::Keep,
        };
        let scale = match direction {
            ResizeDirection::Up => rng.uniform(1.0, stage.resize_range.1),
            ResizeDirection::Down => rng.uniform(stage.resize_range.0, 1.0),
            ResizeDirection::Keep => 1.0,
        };
        let mode = ResizeMode::random(rng);
        Self {
            direction,
            scale,
            mode,
        }
    }
}

/// Drawn parameters of one degradation stage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StageParameters {
    pub resize: ResizeStep,
    pub noise: NoiseParams,
    /// Quality of this stage's compression pass.
    pub jpeg_quality: f64,
}

/// Order of the final resize/sinc step and the last compression pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalOrder {
    /// Resize and sinc filter, then compress.
    ResizeThenCompress,
    /// Compress, then resize and sinc filter.
    CompressThenResize,
}

/// Every random choice of one pipeline call except the per-sample kernels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DegradationParameters {
    pub first: StageParameters,
    /// Whether the second-stage blur ran.
    pub second_blur: bool,
    pub second: StageParameters,
    pub final_order: FinalOrder,
    /// Interpolation of the final resize to the output resolution.
    pub final_mode: ResizeMode,
}

impl DegradationParameters {
    /// Draw a complete parameter set.
    ///
    /// Draw order: first resize, first noise, first quality, second blur flag,
    /// second resize, second noise, final order, final mode, final quality.
    pub fn draw<R: RandomSource + ?Sized>(config: &PipelineConfig, rng: &mut R) -> Self {
        let first_resize = ResizeStep::draw(&config.first, rng);
        let first_noise = NoiseParams::draw(&config.first, rng);
        let first_quality = draw_quality(&config.first, rng);
        let second_blur = rng.chance(config.second_blur_prob);
        let second_resize = ResizeStep::draw(&config.second, rng);
        let second_noise = NoiseParams::draw(&config.second, rng);
        let final_order = if rng.chance(FINAL_RESIZE_FIRST_PROB) {
            FinalOrder::ResizeThenCompress
        } else {
            FinalOrder::CompressThenResize
        };
        let final_mode = ResizeMode::random(rng);
        let second_quality = draw_quality(&config.second, rng);

        Self {
            first: StageParameters {
                resize: first_resize,
                noise: first_noise,
                jpeg_quality: first_quality,
            },
            second_blur,
            second: StageParameters {
                resize: second_resize,
                noise: second_noise,
                jpeg_quality: second_quality,
            },
            final_order,
            final_mode,
        }
    }
}

/// Output of [`DegradationPipeline::degrade_batch`].
#[derive(Debug, Clone)]
pub struct DegradedBatch {
    /// Low-quality batch at `gt_size / scale`.
    pub lq: Array4<f32>,
    /// Matching ground truth at `gt_size`.
    pub gt: Array4<f32>,
    pub params: DegradationParameters,
}

/// Output of [`DegradationPipeline::degrade_single`].
#[derive(Debug, Clone)]
pub struct DegradedSample {
    pub lq: Array3<f32>,
    pub gt: Array3<f32>,
    pub params: DegradationParameters,
}

// =============================================================================
// Helper Functions
// =============================================================================

fn draw_quality<R: RandomSource + ?Sized>(stage: &StageConfig, rng: &mut R) -> f64 {
    rng.uniform(stage.jpeg_range.0, stage.jpeg_range.1)
}

/// Round to the nearest 8-bit level: `clamp(round(x * 255), 0, 255) / 255`.
pub fn quantize_8bit(batch: &mut Array4<f32>) {
    batch.mapv_inplace(|v| (v * 255.0).round().clamp(0.0, 255.0) / 255.0);
}

/// Second-stage resize target: `round(dim / scale * stage_scale)`, at least 1.
///
/// The size is relative to the final output resolution, not to the current
/// first-stage size.
pub fn second_stage_size(dim: usize, scale: usize, stage_scale: f64) -> usize {
    ((dim as f64 / scale as f64 * stage_scale).round() as usize).max(1)
}

fn clamp_unit(batch: &mut Array4<f32>) {
    batch.mapv_inplace(|v| v.clamp(0.0, 1.0));
}

// =============================================================================
// Pipeline
// =============================================================================

/// Stateful degradation pipeline.
///
/// Owns the diversity pool, so calls take `&mut self`.
#[derive(Debug)]
pub struct DegradationPipeline<C: ArtifactSimulator = JpegSimulator> {
    config: PipelineConfig,
    pool: DiversityPool,
    compressor: C,
    sharpener: UsmSharpener,
}

impl DegradationPipeline<JpegSimulator> {
    /// Pipeline with the block-DCT JPEG simulator.
    pub fn new(config: PipelineConfig) -> Self {
        Self::with_compressor(config, JpegSimulator::new())
    }
}

impl<C: ArtifactSimulator> DegradationPipeline<C> {
    /// Pipeline with a custom compression artifact simulator.
    pub fn with_compressor(config: PipelineConfig, compressor: C) -> Self {
        let pool = DiversityPool::new(config.queue_size);
        Self {
            config,
            pool,
            compressor,
            sharpener: UsmSharpener::default(),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn pool(&self) -> &DiversityPool {
        &self.pool
    }

    /// Degrade a `(b, c, h, w)` ground-truth batch with per-sample kernels.
    ///
    /// `kernels` holds either one triple per sample or a single triple that is
    /// broadcast over the batch.
    pub fn degrade_batch<R: RandomSource + ?Sized>(
        &mut self,
        gt: ArrayView4<f32>,
        kernels: &KernelBatch,
        rng: &mut R,
    ) -> Result<DegradedBatch> {
        let b = gt.len_of(Axis(0));
        if kernels.len() != b && kernels.len() != 1 {
            return Err(DegradeError::KernelBatchMismatch {
                kernels: kernels.len(),
                images: b,
            });
        }

        let params = DegradationParameters::draw(&self.config, rng);
        debug!(?params, batch = b, "Drew degradation parameters");

        let gt = if self.config.gt_usm {
            self.sharpener.sharpen(gt)
        } else {
            gt.to_owned()
        };
        let (_, _, ori_h, ori_w) = gt.dim();
        let scale = self.config.scale;

        // First degradation
        let mut out = filter2d(gt.view(), kernels.kernel1.view())?;
        out = resize_by(out.view(), params.first.resize.scale, params.first.resize.mode);
        apply_noise(&mut out, &params.first.noise, rng);
        clamp_unit(&mut out);
        out = self.compressor.compress(out.view(), params.first.jpeg_quality);

        // Second degradation
        if params.second_blur {
            out = filter2d(out.view(), kernels.kernel2.view())?;
        }
        let second_scale = params.second.resize.scale;
        out = resize(
            out.view(),
            second_stage_size(ori_h, scale, second_scale),
            second_stage_size(ori_w, scale, second_scale),
            params.second.resize.mode,
        );
        apply_noise(&mut out, &params.second.noise, rng);

        let (lq_h, lq_w) = ((ori_h / scale).max(1), (ori_w / scale).max(1));
        match params.final_order {
            FinalOrder::ResizeThenCompress => {
                out = resize(out.view(), lq_h, lq_w, params.final_mode);
                out = filter2d(out.view(), kernels.final_kernel.view())?;
                clamp_unit(&mut out);
                out = self.compressor.compress(out.view(), params.second.jpeg_quality);
            }
            FinalOrder::CompressThenResize => {
                clamp_unit(&mut out);
                out = self.compressor.compress(out.view(), params.second.jpeg_quality);
                out = resize(out.view(), lq_h, lq_w, params.final_mode);
                out = filter2d(out.view(), kernels.final_kernel.view())?;
            }
        }

        quantize_8bit(&mut out);

        let (gt, lq) = paired_random_crop(gt.view(), out.view(), self.config.gt_size, scale, rng)?;
        let (lq, gt) = self.pool.exchange(lq, gt, rng)?;

        Ok(DegradedBatch { lq, gt, params })
    }

    /// Degrade a single `(c, h, w)` image.
    pub fn degrade_single<R: RandomSource + ?Sized>(
        &mut self,
        gt: ArrayView3<f32>,
        kernels: &KernelTriple,
        rng: &mut R,
    ) -> Result<DegradedSample> {
        let batch = gt.insert_axis(Axis(0));
        let DegradedBatch { lq, gt, params } =
            self.degrade_batch(batch, &KernelBatch::single(kernels), rng)?;
        Ok(DegradedSample {
            lq: lq.index_axis_move(Axis(0), 0),
            gt: gt.index_axis_move(Axis(0), 0),
            params,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::NoCompression;
    use crate::config::KernelConfig;
    use crate::kernels::{pulse_kernel, KernelSynthesizer};
    use crate::noise::Noise;
    use crate::rng::testing::ScriptedSource;
    use approx::assert_abs_diff_eq;
    use ndarray::s;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn pulse_triple() -> KernelTriple {
        KernelTriple {
            kernel1: pulse_kernel(),
            kernel2: pulse_kernel(),
            final_kernel: pulse_kernel(),
        }
    }

    /// No sharpening, zero noise, pool disabled.
    fn quiet_config(gt_size: usize) -> PipelineConfig {
        let mut config = PipelineConfig {
            gt_usm: false,
            gt_size,
            queue_size: 0,
            ..PipelineConfig::default()
        };
        for stage in [&mut config.first, &mut config.second] {
            stage.gaussian_noise_prob = 1.0;
            stage.noise_range = (0.0, 0.0);
        }
        config
    }

    fn gradient(b: usize, h: usize, w: usize) -> Array4<f32> {
        Array4::from_shape_fn((b, 3, h, w), |(i, c, y, x)| {
            ((i * 5 + c * 11 + y * 3 + x * 2) % 255) as f32 / 255.0
        })
    }

    #[test]
    fn test_quantize_8bit() {
        let mut batch = Array4::from_shape_vec((1, 1, 1, 4), vec![0.6f32, -0.2, 1.3, 0.5]).unwrap();
        quantize_8bit(&mut batch);
        assert_eq!(batch[[0, 0, 0, 0]], 153.0 / 255.0);
        assert_eq!(batch[[0, 0, 0, 1]], 0.0);
        assert_eq!(batch[[0, 0, 0, 2]], 1.0);
        assert_eq!(batch[[0, 0, 0, 3]], 128.0 / 255.0);
    }

    #[test]
    fn test_second_stage_size_rounds() {
        // 64 / 4 * 1.1 = 17.6
        assert_eq!(second_stage_size(64, 4, 1.1), 18);
        // 64 / 4 * 0.53 = 8.48
        assert_eq!(second_stage_size(64, 4, 0.53), 8);
        // 64 / 4 * 0.3 = 4.8
        assert_eq!(second_stage_size(64, 4, 0.3), 5);
        assert_eq!(second_stage_size(64, 4, 1.0), 16);
        assert_eq!(second_stage_size(8, 4, 0.1), 1);
        assert_eq!(second_stage_size(2, 4, 0.3), 1);
    }

    #[test]
    fn test_scripted_parameter_draw() {
        let config = PipelineConfig::default();
        let script = [
            0.5, 0.5, 0.9, // first resize: down, 0.575, bicubic
            0.1, 0.5, 0.9, // first noise: gaussian 15.5, color
            0.0, // first quality 30
            0.9, // second blur skipped (0.9 >= 0.8)
            0.1, 0.5, 0.0, // second resize: up, 1.1, area
            0.9, 0.0, 0.1, // second noise: poisson 0.05, gray
            0.7, // compress first
            0.5, // final mode bilinear
            1.0, // final quality 95
        ];
        let mut src = ScriptedSource::new(&script);
        let params = DegradationParameters::draw(&config, &mut src);
        assert_eq!(src.remaining(), 0);

        assert_eq!(params.first.resize.direction, ResizeDirection::Down);
        assert_abs_diff_eq!(params.first.resize.scale, 0.575, epsilon = 1e-12);
        assert_eq!(params.first.resize.mode, ResizeMode::Bicubic);
        assert_eq!(params.first.noise.noise, Noise::Gaussian { sigma: 15.5 });
        assert!(!params.first.noise.gray);
        assert_eq!(params.first.jpeg_quality, 30.0);

        assert!(!params.second_blur);
        assert_eq!(params.second.resize.direction, ResizeDirection::Up);
        assert_abs_diff_eq!(params.second.resize.scale, 1.1, epsilon = 1e-12);
        assert_eq!(params.second.resize.mode, ResizeMode::Area);
        assert_eq!(params.second.noise.noise, Noise::Poisson { scale: 0.05 });
        assert!(params.second.noise.gray);

        assert_eq!(params.final_order, FinalOrder::CompressThenResize);
        assert_eq!(params.final_mode, ResizeMode::Bilinear);
        assert_eq!(params.second.jpeg_quality, 95.0);
    }

    #[test]
    fn test_keep_direction_has_unit_scale() {
        let mut stage = StageConfig::first_stage();
        stage.resize_prob = [0.0, 0.0, 1.0];
        let mut rng = StdRng::seed_from_u64(20);
        for _ in 0..10 {
            let step = ResizeStep::draw(&stage, &mut rng);
            assert_eq!(step.direction, ResizeDirection::Keep);
            assert_eq!(step.scale, 1.0);
        }
    }

    #[test]
    fn test_deterministic_path_dimensions_and_values() {
        let mut pipeline = DegradationPipeline::with_compressor(quiet_config(32), NoCompression);
        let gt = Array4::from_elem((2, 3, 64, 64), 0.6f32);
        let kernels = KernelBatch::stack(&[pulse_triple(), pulse_triple()]);
        let mut rng = StdRng::seed_from_u64(21);

        for _ in 0..5 {
            let out = pipeline.degrade_batch(gt.view(), &kernels, &mut rng).unwrap();
            assert_eq!(out.lq.dim(), (2, 3, 8, 8));
            assert_eq!(out.gt.dim(), (2, 3, 32, 32));
            for &v in out.lq.iter() {
                assert_abs_diff_eq!(v, 153.0 / 255.0, epsilon = 1e-6);
            }
            assert!(out.gt.iter().all(|&v| v == 0.6));
        }
    }

    #[test]
    fn test_gt_is_aligned_crop_of_input() {
        let mut pipeline = DegradationPipeline::with_compressor(quiet_config(16), NoCompression);
        let gt = gradient(1, 48, 40);
        let kernels = KernelBatch::single(&pulse_triple());
        let mut rng = StdRng::seed_from_u64(22);

        let out = pipeline.degrade_batch(gt.view(), &kernels, &mut rng).unwrap();
        let found = (0..=(48 - 16) / 4).any(|top| {
            (0..=(40 - 16) / 4).any(|left| {
                let (y, x) = (top * 4, left * 4);
                gt.slice(s![.., .., y..y + 16, x..x + 16]) == out.gt
            })
        });
        assert!(found);
        assert_eq!(out.lq.dim(), (1, 3, 4, 4));
    }

    #[test]
    fn test_both_final_orders_occur() {
        let config = PipelineConfig {
            gt_size: 32,
            queue_size: 0,
            ..PipelineConfig::default()
        };
        let mut pipeline = DegradationPipeline::new(config);
        let synthesizer = KernelSynthesizer::new(KernelConfig::default());
        let mut rng = StdRng::seed_from_u64(23);
        let gt = gradient(2, 64, 64);

        let mut seen = (false, false);
        for _ in 0..12 {
            let kernels = KernelBatch::stack(&synthesizer.synthesize_batch(2, &mut rng));
            let out = pipeline.degrade_batch(gt.view(), &kernels, &mut rng).unwrap();
            assert_eq!(out.lq.dim(), (2, 3, 8, 8));
            assert_eq!(out.gt.dim(), (2, 3, 32, 32));
            assert!(out.lq.iter().all(|&v| (0.0..=1.0).contains(&v)));
            match out.params.final_order {
                FinalOrder::ResizeThenCompress => seen.0 = true,
                FinalOrder::CompressThenResize => seen.1 = true,
            }
        }
        assert!(seen.0 && seen.1);
    }

    #[test]
    fn test_lq_is_quantized() {
        let config = PipelineConfig {
            gt_size: 32,
            queue_size: 0,
            ..PipelineConfig::default()
        };
        let mut pipeline = DegradationPipeline::new(config);
        let kernels = KernelSynthesizer::new(KernelConfig::default()).synthesize(&mut StdRng::seed_from_u64(24));
        let mut rng = StdRng::seed_from_u64(25);
        let gt = gradient(1, 64, 64);
        let out = pipeline
            .degrade_batch(gt.view(), &KernelBatch::single(&kernels), &mut rng)
            .unwrap();
        for &v in out.lq.iter() {
            let level = v * 255.0;
            assert_abs_diff_eq!(level, level.round(), epsilon = 1e-3);
        }
    }

    #[test]
    fn test_single_entry_point_shapes() {
        let mut pipeline = DegradationPipeline::with_compressor(quiet_config(32), NoCompression);
        let image = Array3::from_elem((3, 64, 64), 0.25f32);
        let mut rng = StdRng::seed_from_u64(26);
        let out = pipeline.degrade_single(image.view(), &pulse_triple(), &mut rng).unwrap();
        assert_eq!(out.lq.dim(), (3, 8, 8));
        assert_eq!(out.gt.dim(), (3, 32, 32));
    }

    #[test]
    fn test_pool_engages_after_capacity() {
        let config = PipelineConfig {
            queue_size: 4,
            ..quiet_config(32)
        };
        let mut pipeline = DegradationPipeline::with_compressor(config, NoCompression);
        let kernels = KernelBatch::single(&pulse_triple());
        let mut rng = StdRng::seed_from_u64(27);

        for call in 0..4 {
            let gt = Array4::from_elem((2, 3, 64, 64), 0.1 * call as f32);
            pipeline.degrade_batch(gt.view(), &kernels, &mut rng).unwrap();
        }
        assert!(pipeline.pool().is_full());
    }

    #[test]
    fn test_kernel_batch_mismatch() {
        let mut pipeline = DegradationPipeline::with_compressor(quiet_config(32), NoCompression);
        let gt = Array4::zeros((3, 3, 64, 64));
        let kernels = KernelBatch::stack(&[pulse_triple(), pulse_triple()]);
        let mut rng = StdRng::seed_from_u64(28);
        assert!(matches!(
            pipeline.degrade_batch(gt.view(), &kernels, &mut rng),
            Err(DegradeError::KernelBatchMismatch { kernels: 2, images: 3 })
        ));
    }

    #[test]
    fn test_pool_divisibility_error_surfaces() {
        let config = PipelineConfig {
            queue_size: 5,
            ..quiet_config(32)
        };
        let mut pipeline = DegradationPipeline::with_compressor(config, NoCompression);
        let gt = Array4::zeros((2, 3, 64, 64));
        let kernels = KernelBatch::single(&pulse_triple());
        let mut rng = StdRng::seed_from_u64(29);
        assert!(matches!(
            pipeline.degrade_batch(gt.view(), &kernels, &mut rng),
            Err(DegradeError::PoolBatchMismatch { capacity: 5, batch: 2 })
        ));
    }
}
