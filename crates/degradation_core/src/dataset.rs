//! Dataset layer: loading, augmentation and per-item degradation.
//!
//! Decoding lives behind [`ImageSource`]; this module only sees decoded
//! `HxWx3` float images in BGR order. Each item is augmented, padded or
//! cropped to a fixed square, converted to `CxHxW` RGB, given a fresh kernel
//! triple and run through the single-sample pipeline.

use std::io;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use ndarray::{s, Array3, ArrayView3, Axis};
use tracing::warn;

use crate::compression::{ArtifactSimulator, JpegSimulator};
use crate::config::{DatasetConfig, DegradationConfig};
use crate::error::{DegradeError, Result};
use crate::filtering::mirror_index;
use crate::kernels::{KernelSynthesizer, KernelTriple};
use crate::pipeline::{DegradationParameters, DegradationPipeline};
use crate::rng::RandomSource;

/// Indexed collection of decoded images.
pub trait ImageSource {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Decode image `index` as `HxWx3` BGR floats in `[0, 1]`.
    fn load(&self, index: usize) -> io::Result<Array3<f32>>;

    /// Location of image `index`, for logging and bookkeeping.
    fn path(&self, index: usize) -> PathBuf;
}

/// Images held in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemorySource {
    entries: Vec<(PathBuf, Array3<f32>)>,
}

impl InMemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, path: impl Into<PathBuf>, image: Array3<f32>) {
        self.entries.push((path.into(), image));
    }
}

impl ImageSource for InMemorySource {
    fn len(&self) -> usize {
        self.entries.len()
    }

    fn load(&self, index: usize) -> io::Result<Array3<f32>> {
        self.entries
            .get(index)
            .map(|(_, image)| image.clone())
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("no image at index {index}")))
    }

    fn path(&self, index: usize) -> PathBuf {
        self.entries
            .get(index)
            .map(|(path, _)| path.clone())
            .unwrap_or_default()
    }
}

/// One prepared training item.
#[derive(Debug, Clone)]
pub struct TrainingSample {
    /// Ground truth, `CxHxW` RGB, after sharpening and cropping.
    pub gt: Array3<f32>,
    /// Degraded counterpart at `1 / scale` resolution.
    pub lq: Array3<f32>,
    pub kernels: KernelTriple,
    pub path: PathBuf,
    pub params: DegradationParameters,
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Load `index`, retrying with a random index after each failure.
///
/// Returns the index that succeeded together with the image.
pub fn load_with_retry<S: ImageSource + ?Sized, R: RandomSource + ?Sized>(
    source: &S,
    index: usize,
    config: &DatasetConfig,
    rng: &mut R,
) -> Result<(usize, Array3<f32>)> {
    if source.is_empty() {
        return Err(DegradeError::EmptySource);
    }
    let attempts = config.load_retries.max(1);
    let mut index = index;
    let mut attempt = 0;
    loop {
        match source.load(index) {
            Ok(image) => return Ok((index, image)),
            Err(e) => {
                attempt += 1;
                warn!(
                    index,
                    path = %source.path(index).display(),
                    remaining = attempts - attempt,
                    error = %e,
                    "Image load failed"
                );
                if attempt == attempts {
                    return Err(DegradeError::LoadExhausted {
                        index,
                        attempts,
                        source: e,
                    });
                }
                index = rng.index(source.len());
                if config.retry_backoff_ms > 0 {
                    thread::sleep(Duration::from_millis(config.retry_backoff_ms));
                }
            }
        }
    }
}

/// Random horizontal flip, and with `rotate` random vertical flip and transpose.
pub fn augment<R: RandomSource + ?Sized>(
    image: Array3<f32>,
    hflip: bool,
    rotate: bool,
    rng: &mut R,
) -> Array3<f32> {
    let mut image = image;
    if hflip && rng.chance(0.5) {
        image.invert_axis(Axis(1));
    }
    if rotate {
        if rng.chance(0.5) {
            image.invert_axis(Axis(0));
        }
        if rng.chance(0.5) {
            image = image.permuted_axes([1, 0, 2]);
        }
    }
    image.as_standard_layout().into_owned()
}

/// Reflect-pad bottom and right up to `size`, then randomly crop to `size`.
pub fn pad_and_crop<R: RandomSource + ?Sized>(image: ArrayView3<f32>, size: usize, rng: &mut R) -> Array3<f32> {
    let (h, w, c) = image.dim();
    let padded = if h < size || w < size {
        let (ph, pw) = (h.max(size), w.max(size));
        Array3::from_shape_fn((ph, pw, c), |(y, x, ch)| {
            image[[mirror_index(y as isize, h), mirror_index(x as isize, w), ch]]
        })
    } else {
        image.to_owned()
    };

    let (ph, pw, _) = padded.dim();
    if ph == size && pw == size {
        return padded;
    }
    let top = rng.index(ph - size + 1);
    let left = rng.index(pw - size + 1);
    padded
        .slice(s![top..top + size, left..left + size, ..])
        .to_owned()
}

/// `HxWx3` BGR to `3xHxW` RGB.
pub fn bgr_hwc_to_rgb_chw(image: ArrayView3<f32>) -> Array3<f32> {
    let mut chw = image.permuted_axes([2, 0, 1]);
    chw.invert_axis(Axis(0));
    chw.as_standard_layout().into_owned()
}

// =============================================================================
// Dataset
// =============================================================================

/// Produces degraded training pairs from an [`ImageSource`].
pub struct DegradationDataset<S: ImageSource, C: ArtifactSimulator = JpegSimulator> {
    source: S,
    config: DatasetConfig,
    synthesizer: KernelSynthesizer,
    pipeline: DegradationPipeline<C>,
}

impl<S: ImageSource> DegradationDataset<S, JpegSimulator> {
    pub fn new(source: S, config: DegradationConfig) -> Self {
        let pipeline = DegradationPipeline::new(config.pipeline);
        Self::with_pipeline(source, config.dataset, KernelSynthesizer::new(config.kernels), pipeline)
    }
}

impl<S: ImageSource, C: ArtifactSimulator> DegradationDataset<S, C> {
    pub fn with_pipeline(
        source: S,
        config: DatasetConfig,
        synthesizer: KernelSynthesizer,
        pipeline: DegradationPipeline<C>,
    ) -> Self {
        Self {
            source,
            config,
            synthesizer,
            pipeline,
        }
    }

    pub fn len(&self) -> usize {
        self.source.len()
    }

    pub fn is_empty(&self) -> bool {
        self.source.is_empty()
    }

    pub fn pipeline(&self) -> &DegradationPipeline<C> {
        &self.pipeline
    }

    /// Load, augment and crop image `index` into a `3xSxS` RGB ground truth.
    pub fn load_gt<R: RandomSource + ?Sized>(&self, index: usize, rng: &mut R) -> Result<(PathBuf, Array3<f32>)> {
        let (index, image) = load_with_retry(&self.source, index, &self.config, rng)?;
        if image.len_of(Axis(2)) != 3 {
            return Err(DegradeError::InvalidImage(image.shape().to_vec()));
        }
        let image = augment(image, self.config.use_hflip, self.config.use_rot, rng);
        let image = pad_and_crop(image.view(), self.config.crop_pad_size, rng);
        Ok((self.source.path(index), bgr_hwc_to_rgb_chw(image.view())))
    }

    /// Prepare one degraded training pair.
    pub fn get_item<R: RandomSource + ?Sized>(&mut self, index: usize, rng: &mut R) -> Result<TrainingSample> {
        let (path, gt) = self.load_gt(index, rng)?;
        let kernels = self.synthesizer.synthesize(rng);
        let degraded = self.pipeline.degrade_single(gt.view(), &kernels, rng)?;
        Ok(TrainingSample {
            gt: degraded.gt,
            lq: degraded.lq,
            kernels,
            path,
            params: degraded.params,
        })
    }
}
