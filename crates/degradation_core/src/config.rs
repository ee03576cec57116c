//! Configuration for kernel synthesis, the degradation pipeline and the
//! dataset layer.
//!
//! All parameters have defaults matching the Real-ESRGAN x4 training recipe.
//! Configurations deserialize from JSON with every field optional; missing
//! fields fall back to the defaults. The pipeline trusts its numeric ranges,
//! so [`DegradationConfig::validate`] is only run at the loading boundary.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{DegradeError, Result};
use crate::kernels::KernelFamily;

// =============================================================================
// Constants
// =============================================================================

/// Default per-family weights, in [`KernelFamily::ALL`] order.
const DEFAULT_KERNEL_PROB: [f64; 6] = [0.45, 0.25, 0.12, 0.03, 0.12, 0.03];

/// Default sinc probability for both blur stages.
const DEFAULT_SINC_PROB: f64 = 0.1;

/// Default probability of a sinc final kernel instead of the pulse.
const DEFAULT_FINAL_SINC_PROB: f64 = 0.8;

/// Default probability of the second-stage blur.
const DEFAULT_SECOND_BLUR_PROB: f64 = 0.8;

/// Default ground-truth training patch size.
const DEFAULT_GT_SIZE: usize = 256;

/// Default output downscale factor.
const DEFAULT_SCALE: usize = 4;

/// Default diversity pool capacity.
const DEFAULT_QUEUE_SIZE: usize = 180;

/// Default size images are padded/cropped to before degradation.
const DEFAULT_CROP_PAD_SIZE: usize = 512;

/// Default number of load attempts per sample.
const DEFAULT_LOAD_RETRIES: usize = 3;

/// Default pause between load attempts.
const DEFAULT_RETRY_BACKOFF_MS: u64 = 1_000;

// =============================================================================
// Types
// =============================================================================

/// Blur kernel parameters for one degradation stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelStageConfig {
    /// Candidate kernel families.
    pub kernel_list: Vec<KernelFamily>,
    /// Selection weight of each family in `kernel_list`.
    pub kernel_prob: Vec<f64>,
    /// Range of the Gaussian standard deviations (both axes).
    pub blur_sigma: (f64, f64),
    /// Shape exponent range for generalized Gaussian kernels.
    pub betag_range: (f64, f64),
    /// Shape exponent range for plateau kernels.
    pub betap_range: (f64, f64),
    /// Probability of a sinc kernel instead of a mixed kernel.
    pub sinc_prob: f64,
}

impl Default for KernelStageConfig {
    fn default() -> Self {
        Self {
            kernel_list: KernelFamily::ALL.to_vec(),
            kernel_prob: DEFAULT_KERNEL_PROB.to_vec(),
            blur_sigma: (0.2, 3.0),
            betag_range: (0.5, 4.0),
            betap_range: (1.0, 2.0),
            sinc_prob: DEFAULT_SINC_PROB,
        }
    }
}

/// Kernel synthesis parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// First-stage blur kernel.
    pub first: KernelStageConfig,
    /// Second-stage blur kernel. Default sigma range: (0.2, 1.5)
    pub second: KernelStageConfig,
    /// Probability of a sinc final kernel. Default: 0.8
    pub final_sinc_prob: f64,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            first: KernelStageConfig::default(),
            second: KernelStageConfig {
                blur_sigma: (0.2, 1.5),
                ..KernelStageConfig::default()
            },
            final_sinc_prob: DEFAULT_FINAL_SINC_PROB,
        }
    }
}

/// Resize, noise and compression parameters for one degradation stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageConfig {
    /// Probabilities of resizing up, down, or keeping the size.
    pub resize_prob: [f64; 3],
    /// Scale range `(min_down, max_up)`.
    pub resize_range: (f64, f64),
    /// Probability of Gaussian noise instead of Poisson noise.
    pub gaussian_noise_prob: f64,
    /// Gaussian sigma range in 8-bit units.
    pub noise_range: (f64, f64),
    /// Poisson noise scale range.
    pub poisson_scale_range: (f64, f64),
    /// Probability of single-channel noise shared by all channels.
    pub gray_noise_prob: f64,
    /// Compression quality factor range.
    pub jpeg_range: (f64, f64),
}

impl StageConfig {
    /// First-stage defaults.
    pub fn first_stage() -> Self {
        Self {
            resize_prob: [0.2, 0.7, 0.1],
            resize_range: (0.15, 1.5),
            gaussian_noise_prob: 0.5,
            noise_range: (1.0, 30.0),
            poisson_scale_range: (0.05, 3.0),
            gray_noise_prob: 0.4,
            jpeg_range: (30.0, 95.0),
        }
    }

    /// Second-stage defaults.
    pub fn second_stage() -> Self {
        Self {
            resize_prob: [0.3, 0.4, 0.3],
            resize_range: (0.3, 1.2),
            gaussian_noise_prob: 0.5,
            noise_range: (1.0, 25.0),
            poisson_scale_range: (0.05, 2.5),
            gray_noise_prob: 0.4,
            jpeg_range: (30.0, 95.0),
        }
    }

    fn validate(&self, name: &str) -> Result<()> {
        check_probs(name, "resize_prob", &self.resize_prob)?;
        check_range(name, "resize_range", self.resize_range)?;
        if self.resize_range.0 <= 0.0 || self.resize_range.0 > 1.0 || self.resize_range.1 < 1.0 {
            return Err(invalid(format!(
                "{name}.resize_range must satisfy 0 < min <= 1 <= max"
            )));
        }
        check_prob(name, "gaussian_noise_prob", self.gaussian_noise_prob)?;
        check_range(name, "noise_range", self.noise_range)?;
        check_range(name, "poisson_scale_range", self.poisson_scale_range)?;
        check_prob(name, "gray_noise_prob", self.gray_noise_prob)?;
        check_range(name, "jpeg_range", self.jpeg_range)?;
        if self.jpeg_range.0 < 1.0 || self.jpeg_range.1 > 100.0 {
            return Err(invalid(format!("{name}.jpeg_range must lie within [1, 100]")));
        }
        Ok(())
    }
}

impl Default for StageConfig {
    fn default() -> Self {
        Self::first_stage()
    }
}

/// Degradation pipeline parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// First-order degradation.
    pub first: StageConfig,
    /// Second-order degradation.
    pub second: StageConfig,
    /// Probability of blurring with the second-stage kernel. Default: 0.8
    pub second_blur_prob: f64,
    /// Sharpen the ground truth before degradation. Default: true
    pub gt_usm: bool,
    /// Ground-truth training patch size. Default: 256
    pub gt_size: usize,
    /// Output downscale factor. Default: 4
    pub scale: usize,
    /// Diversity pool capacity; 0 disables the pool. Default: 180
    pub queue_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            first: StageConfig::first_stage(),
            second: StageConfig::second_stage(),
            second_blur_prob: DEFAULT_SECOND_BLUR_PROB,
            gt_usm: true,
            gt_size: DEFAULT_GT_SIZE,
            scale: DEFAULT_SCALE,
            queue_size: DEFAULT_QUEUE_SIZE,
        }
    }
}

/// Dataset-level parameters: augmentation, crop size and load retries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetConfig {
    /// Random horizontal flips. Default: true
    pub use_hflip: bool,
    /// Random rotations by vertical flip and transpose. Default: false
    pub use_rot: bool,
    /// Images are padded then cropped to this square size. Default: 512
    pub crop_pad_size: usize,
    /// Attempts per sample before giving up. Default: 3
    pub load_retries: usize,
    /// Pause between attempts in milliseconds. Default: 1000
    pub retry_backoff_ms: u64,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            use_hflip: true,
            use_rot: false,
            crop_pad_size: DEFAULT_CROP_PAD_SIZE,
            load_retries: DEFAULT_LOAD_RETRIES,
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
        }
    }
}

/// Complete configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DegradationConfig {
    pub kernels: KernelConfig,
    pub pipeline: PipelineConfig,
    pub dataset: DatasetConfig,
}

impl DegradationConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and validate a JSON configuration.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Validate the configuration parameters.
    pub fn validate(&self) -> Result<()> {
        validate_kernel_stage("kernels.first", &self.kernels.first)?;
        validate_kernel_stage("kernels.second", &self.kernels.second)?;
        check_prob("kernels", "final_sinc_prob", self.kernels.final_sinc_prob)?;

        let p = &self.pipeline;
        p.first.validate("pipeline.first")?;
        p.second.validate("pipeline.second")?;
        check_prob("pipeline", "second_blur_prob", p.second_blur_prob)?;
        if p.scale == 0 {
            return Err(invalid("pipeline.scale must be > 0".to_string()));
        }
        if p.gt_size == 0 || p.gt_size % p.scale != 0 {
            return Err(invalid(format!(
                "pipeline.gt_size {} must be a positive multiple of scale {}",
                p.gt_size, p.scale
            )));
        }

        let d = &self.dataset;
        if d.crop_pad_size < p.gt_size {
            return Err(invalid(format!(
                "dataset.crop_pad_size {} must be >= gt_size {}",
                d.crop_pad_size, p.gt_size
            )));
        }
        if d.load_retries == 0 {
            return Err(invalid("dataset.load_retries must be > 0".to_string()));
        }
        Ok(())
    }
}

// =============================================================================
// Validation helpers
// =============================================================================

fn invalid(msg: String) -> DegradeError {
    DegradeError::InvalidConfig(msg)
}

fn check_prob(scope: &str, field: &str, p: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&p) {
        return Err(invalid(format!("{scope}.{field} must lie in [0, 1], got {p}")));
    }
    Ok(())
}

fn check_probs(scope: &str, field: &str, probs: &[f64]) -> Result<()> {
    if probs.is_empty() || probs.iter().any(|&p| p < 0.0) || probs.iter().sum::<f64>() <= 0.0 {
        return Err(invalid(format!(
            "{scope}.{field} must be non-negative with a positive sum"
        )));
    }
    Ok(())
}

fn check_range(scope: &str, field: &str, range: (f64, f64)) -> Result<()> {
    if range.0 > range.1 || range.0 < 0.0 {
        return Err(invalid(format!(
            "{scope}.{field} must be a non-negative (low, high) pair, got {range:?}"
        )));
    }
    Ok(())
}

fn validate_kernel_stage(scope: &str, stage: &KernelStageConfig) -> Result<()> {
    if stage.kernel_list.is_empty() {
        return Err(invalid(format!("{scope}.kernel_list must not be empty")));
    }
    if stage.kernel_list.len() != stage.kernel_prob.len() {
        return Err(invalid(format!(
            "{scope}.kernel_prob has {} entries for {} kernel families",
            stage.kernel_prob.len(),
            stage.kernel_list.len()
        )));
    }
    check_probs(scope, "kernel_prob", &stage.kernel_prob)?;
    check_range(scope, "blur_sigma", stage.blur_sigma)?;
    if stage.blur_sigma.0 <= 0.0 {
        return Err(invalid(format!("{scope}.blur_sigma must be > 0")));
    }
    check_range(scope, "betag_range", stage.betag_range)?;
    check_range(scope, "betap_range", stage.betap_range)?;
    check_prob(scope, "sinc_prob", stage.sinc_prob)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DegradationConfig::default();
        assert_eq!(config.pipeline.gt_size, 256);
        assert_eq!(config.pipeline.scale, 4);
        assert_eq!(config.pipeline.queue_size, 180);
        assert_eq!(config.kernels.first.kernel_list.len(), 6);
        assert_eq!(config.kernels.second.blur_sigma, (0.2, 1.5));
        assert_eq!(config.pipeline.second.resize_range, (0.3, 1.2));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_falls_back_to_defaults() {
        let json = r#"{
            "pipeline": { "queue_size": 64, "gt_usm": false, "first": { "jpeg_range": [50, 90] } },
            "kernels": { "first": { "kernel_list": ["iso", "plateau_aniso"], "kernel_prob": [0.5, 0.5] } }
        }"#;
        let config = DegradationConfig::from_json_str(json).unwrap();
        assert_eq!(config.pipeline.queue_size, 64);
        assert!(!config.pipeline.gt_usm);
        assert_eq!(config.pipeline.first.jpeg_range, (50.0, 90.0));
        assert_eq!(config.pipeline.first.noise_range, (1.0, 30.0));
        assert_eq!(
            config.kernels.first.kernel_list,
            vec![KernelFamily::Iso, KernelFamily::PlateauAniso]
        );
        assert_eq!(config.dataset.crop_pad_size, 512);
    }

    #[test]
    fn test_json_roundtrip_preserves_config() {
        let config = DegradationConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back = DegradationConfig::from_json_str(&json).unwrap();
        assert_eq!(config, back);
    }

    #[test]
    fn test_malformed_json_is_parse_error() {
        let err = DegradationConfig::from_json_str("{ not json").unwrap_err();
        assert!(matches!(err, DegradeError::ConfigParse(_)));
    }

    #[test]
    fn test_unknown_kernel_family_rejected() {
        let json = r#"{ "kernels": { "first": { "kernel_list": ["box"] } } }"#;
        assert!(matches!(
            DegradationConfig::from_json_str(json),
            Err(DegradeError::ConfigParse(_))
        ));
    }

    #[test]
    fn test_validation_mismatched_kernel_prob() {
        let mut config = DegradationConfig::default();
        config.kernels.second.kernel_prob.pop();
        assert!(matches!(config.validate(), Err(DegradeError::InvalidConfig(_))));
    }

    #[test]
    fn test_validation_gt_size_not_multiple_of_scale() {
        let mut config = DegradationConfig::default();
        config.pipeline.gt_size = 254;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_probability_out_of_range() {
        let mut config = DegradationConfig::default();
        config.pipeline.second.gray_noise_prob = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_inverted_range() {
        let mut config = DegradationConfig::default();
        config.pipeline.first.noise_range = (30.0, 1.0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = DegradationConfig::from_json_file("/nonexistent/degrade.json").unwrap_err();
        assert!(matches!(err, DegradeError::Io(_)));
    }
}
