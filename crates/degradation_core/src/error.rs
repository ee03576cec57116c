//! Error type shared by the degradation pipeline, the diversity pool and the
//! dataset layer.

use std::io;

use thiserror::Error;

/// Errors surfaced by `degradation_core`.
///
/// Numeric configuration ranges are trusted; only structural mismatches and
/// loading failures are reported.
#[derive(Debug, Error)]
pub enum DegradeError {
    /// The pool capacity is not a multiple of the batch size.
    #[error("queue size {capacity} should be divisible by batch size {batch}")]
    PoolBatchMismatch { capacity: usize, batch: usize },

    /// A batch with a different shape was submitted after the pool was allocated.
    #[error("pool holds samples of shape {expected:?}, got batch of shape {actual:?}")]
    PoolShapeMismatch {
        expected: [usize; 4],
        actual: [usize; 4],
    },

    /// The number of per-sample kernels does not match the image batch.
    #[error("kernel batch has {kernels} entries but image batch has {images}")]
    KernelBatchMismatch { kernels: usize, images: usize },

    /// Ground truth is not `scale` times larger than the low-quality image.
    #[error("scale mismatch: gt {gt_h}x{gt_w} is not {scale}x lq {lq_h}x{lq_w}")]
    ScaleMismatch {
        gt_h: usize,
        gt_w: usize,
        lq_h: usize,
        lq_w: usize,
        scale: usize,
    },

    /// The low-quality image is smaller than the requested patch.
    #[error("lq image {lq_h}x{lq_w} is smaller than patch size {patch}")]
    PatchTooLarge {
        lq_h: usize,
        lq_w: usize,
        patch: usize,
    },

    /// Every retry of a sample load failed.
    #[error("failed to load sample after {attempts} attempts (last index {index})")]
    LoadExhausted {
        index: usize,
        attempts: usize,
        #[source]
        source: io::Error,
    },

    /// The image source is empty.
    #[error("image source contains no samples")]
    EmptySource,

    /// A loaded image does not have the expected HxWx3 layout.
    #[error("expected an HxWx3 image, got shape {0:?}")]
    InvalidImage(Vec<usize>),

    /// Configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Configuration could not be parsed.
    #[error("failed to parse configuration: {0}")]
    ConfigParse(#[from] serde_json::Error),

    /// Configuration file could not be read.
    #[error("failed to read configuration: {0}")]
    Io(#[from] io::Error),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, DegradeError>;
