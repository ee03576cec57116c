//! Second-order degradation synthesis for super-resolution training.
//!
//! Pure Rust implementation of the Real-ESRGAN style degradation model: clean
//! images are blurred, resized, corrupted with noise and compression artifacts
//! twice over, then paired with their (sharpened) ground truth. A diversity
//! pool mixes pairs across batches so samples within a batch do not share the
//! same degradation draw.

pub mod compression;
pub mod config;
pub mod crop;
pub mod dataset;
pub mod error;
pub mod filtering;
pub mod kernels;
pub mod noise;
pub mod pipeline;
pub mod pool;
pub mod resize;
pub mod rng;
pub mod sharpen;

// Re-export commonly used types at the crate root
pub use compression::{ArtifactSimulator, JpegSimulator, NoCompression};
pub use config::{DatasetConfig, DegradationConfig, KernelConfig, KernelStageConfig, PipelineConfig, StageConfig};
pub use dataset::{DegradationDataset, ImageSource, InMemorySource, TrainingSample};
pub use error::{DegradeError, Result};
pub use kernels::{KernelBatch, KernelFamily, KernelSynthesizer, KernelTriple};
pub use pipeline::{DegradationParameters, DegradationPipeline, DegradedBatch, DegradedSample};
pub use pool::DiversityPool;
pub use resize::ResizeMode;
pub use rng::RandomSource;
